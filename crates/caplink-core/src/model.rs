use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of mediator a provider is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Http,
    Blob,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Http => write!(f, "http"),
            ProviderKind::Blob => write!(f, "blob"),
        }
    }
}

/// Registry key of a link: one source, one contract, one target provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    pub source_component_id: String,
    pub contract_id: String,
    pub target_provider_id: String,
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -[{}]-> {}",
            self.source_component_id, self.contract_id, self.target_provider_id
        )
    }
}

/// Deployment-time binding of a component's contract use to a provider.
///
/// Values are opaque to the registry; mediators interpret keys such as
/// `ADDRESS` or `ROOT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDefinition {
    pub contract_id: String,
    pub source_component_id: String,
    pub target_provider_id: String,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl LinkDefinition {
    pub fn new(
        source_component_id: impl Into<String>,
        contract_id: impl Into<String>,
        target_provider_id: impl Into<String>,
    ) -> Self {
        Self {
            contract_id: contract_id.into(),
            source_component_id: source_component_id.into(),
            target_provider_id: target_provider_id.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> LinkKey {
        LinkKey {
            source_component_id: self.source_component_id.clone(),
            contract_id: self.contract_id.clone(),
            target_provider_id: self.target_provider_id.clone(),
        }
    }
}

/// A link as seen by a mediator, derived once per registry generation and
/// shared read-only by every invocation that resolves to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub provider_kind: ProviderKind,
    pub provider_id: String,
    pub source_component_id: String,
    pub contract_id: String,
    pub config: BTreeMap<String, String>,
    /// Generation this target was resolved from.
    pub generation: u64,
    /// Set on blob links whose `ROOT` overlaps another component's root. The
    /// component is confined to its own namespace under this directory.
    pub shared_root: Option<String>,
}

impl ResolvedTarget {
    pub fn value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One running copy of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInstance {
    pub instance_id: InstanceId,
    pub component_id: String,
    pub replica_index: u32,
}

pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + Sync + 'static>>;

/// Outgoing request body. Streams are forwarded chunk by chunk, never buffered.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Full(Vec<u8>),
    Stream(ChunkStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Full(bytes) => write!(f, "Body::Full({} bytes)", bytes.len()),
            Body::Stream(_) => write!(f, "Body::Stream(..)"),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Full(bytes)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Full(text.as_bytes().to_vec())
    }
}

/// `send-request(method, uri, headers, body)`.
#[derive(Debug)]
pub struct OutgoingRequest {
    pub method: String,
    /// Origin-form (`/path?query`) or absolute URI.
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl OutgoingRequest {
    pub fn get(uri: impl Into<String>) -> Self {
        Self {
            method: "GET".into(),
            uri: uri.into(),
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            ..Self::get(uri)
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }
}

/// Path-scoped storage request; `data` is only meaningful for `write`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRequest {
    pub path: String,
    pub data: Option<Vec<u8>>,
}

#[derive(Debug)]
pub enum Payload {
    Http(OutgoingRequest),
    Blob(BlobRequest),
}

impl Payload {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Payload::Http(_) => ProviderKind::Http,
            Payload::Blob(_) => ProviderKind::Blob,
        }
    }
}

/// A single capability call issued by a component. Never persisted.
#[derive(Debug)]
pub struct Invocation {
    pub source_component_id: String,
    pub contract_id: String,
    pub operation: String,
    pub payload: Payload,
    /// Calling instance; the call is aborted when that instance is torn down.
    pub origin: Option<InstanceId>,
}

impl Invocation {
    pub fn new(
        source_component_id: impl Into<String>,
        contract_id: impl Into<String>,
        operation: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            source_component_id: source_component_id.into(),
            contract_id: contract_id.into(),
            operation: operation.into(),
            payload,
            origin: None,
        }
    }

    pub fn from_instance(mut self, instance_id: InstanceId) -> Self {
        self.origin = Some(instance_id);
        self
    }

    pub fn send_request(source_component_id: impl Into<String>, request: OutgoingRequest) -> Self {
        Self::new(
            source_component_id,
            crate::contract::OUTGOING_HTTP,
            crate::contract::OP_SEND_REQUEST,
            Payload::Http(request),
        )
    }

    pub fn blob_read(source_component_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self::blob(source_component_id, crate::contract::OP_READ, path.into(), None)
    }

    pub fn blob_write(
        source_component_id: impl Into<String>,
        path: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self::blob(
            source_component_id,
            crate::contract::OP_WRITE,
            path.into(),
            Some(data.into()),
        )
    }

    pub fn blob_delete(source_component_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self::blob(source_component_id, crate::contract::OP_DELETE, path.into(), None)
    }

    fn blob(
        source_component_id: impl Into<String>,
        operation: &str,
        path: String,
        data: Option<Vec<u8>>,
    ) -> Self {
        Self::new(
            source_component_id,
            crate::contract::BLOBSTORE,
            operation,
            Payload::Blob(BlobRequest { path, data }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_key_display_names_all_three_parts() {
        let link = LinkDefinition::new("app", "blobstore", "fs");
        assert_eq!(link.key().to_string(), "app -[blobstore]-> fs");
    }

    #[test]
    fn blob_write_carries_data_and_contract() {
        let inv = Invocation::blob_write("app", "greeting.txt", "hello");
        assert_eq!(inv.contract_id, "blobstore");
        assert_eq!(inv.operation, "write");
        match inv.payload {
            Payload::Blob(req) => {
                assert_eq!(req.path, "greeting.txt");
                assert_eq!(req.data.as_deref(), Some(b"hello".as_slice()));
            }
            Payload::Http(_) => panic!("expected blob payload"),
        }
    }

    #[test]
    fn from_instance_binds_origin() {
        let id = InstanceId::new();
        let inv = Invocation::send_request("app", OutgoingRequest::get("/")).from_instance(id);
        assert_eq!(inv.origin, Some(id));
        assert_eq!(inv.payload.kind(), ProviderKind::Http);
    }
}

use caplink_core::{ContractError, LinkError, ManifestError, ProviderKind};
use thiserror::Error;

/// Network-layer failures of the outgoing-HTTP mediator. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("connection to {address} refused: {detail}")]
    Refused { address: String, detail: String },

    #[error("TLS failure talking to {address}: {detail}")]
    TlsFailure { address: String, detail: String },

    #[error("request to {address} timed out after {timeout_ms}ms")]
    Timeout { address: String, timeout_ms: u64 },

    #[error("request to {address} cancelled")]
    Cancelled { address: String },

    #[error("'{requested}' is outside the linked address {address}")]
    AddressNotPermitted { address: String, requested: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transport error talking to {address}: {detail}")]
    Transport { address: String, detail: String },
}

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("path '{path}' escapes the storage root: {reason}")]
    PathEscape { path: String, reason: String },

    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("storage I/O failure on '{path}': {source}")]
    IoFailure {
        path: String,
        source: std::io::Error,
    },

    #[error("blobstore link has no ROOT value")]
    MissingRoot,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to launch replica {replica_index} of '{component_id}': {detail}")]
    LaunchFailed {
        component_id: String,
        replica_index: u32,
        detail: String,
    },
}

/// Everything a dispatched invocation can fail with, returned verbatim to the
/// calling component.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error("no live instance of '{component_id}'")]
    NoLiveInstance { component_id: String },

    #[error("no mediator registered for {0} providers")]
    MediatorUnavailable(ProviderKind),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Blob(#[from] BlobError),
}

impl DispatchError {
    /// Short stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchError::Link(LinkError::LinkNotFound { .. }) => "link_not_found",
            DispatchError::Link(LinkError::AmbiguousLink { .. }) => "ambiguous_link",
            DispatchError::Link(_) => "link",
            DispatchError::Contract(_) => "contract_mismatch",
            DispatchError::NoLiveInstance { .. } => "no_live_instance",
            DispatchError::MediatorUnavailable(_) => "mediator_unavailable",
            DispatchError::Http(_) => "http",
            DispatchError::Blob(BlobError::PathEscape { .. }) => "path_escape",
            DispatchError::Blob(_) => "blob",
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("failed to load config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

use std::collections::{BTreeSet, HashMap};

use crate::error::ContractError;
use crate::model::{Invocation, Payload, ProviderKind, ResolvedTarget};

pub const OUTGOING_HTTP: &str = "outgoing-http";
pub const BLOBSTORE: &str = "blobstore";

pub const OP_SEND_REQUEST: &str = "send-request";
pub const OP_READ: &str = "read";
pub const OP_WRITE: &str = "write";
pub const OP_DELETE: &str = "delete";

/// Link value naming a blobstore link's storage root.
pub const BLOB_ROOT: &str = "ROOT";

/// A named, versionless capability surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityContract {
    pub contract_id: String,
    pub kind: ProviderKind,
    pub operation_names: BTreeSet<String>,
}

impl CapabilityContract {
    pub fn new(contract_id: impl Into<String>, kind: ProviderKind, operations: &[&str]) -> Self {
        Self {
            contract_id: contract_id.into(),
            kind,
            operation_names: operations.iter().map(|op| (*op).to_string()).collect(),
        }
    }

    pub fn supports(&self, operation: &str) -> bool {
        self.operation_names.contains(operation)
    }
}

/// Read-only reference set of contracts, keyed by id, with optional aliases.
#[derive(Debug, Clone, Default)]
pub struct ContractCatalog {
    contracts: HashMap<String, CapabilityContract>,
    aliases: HashMap<String, String>,
}

impl ContractCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `outgoing-http` and `blobstore` contracts plus their WASI aliases.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.insert(CapabilityContract::new(
            OUTGOING_HTTP,
            ProviderKind::Http,
            &[OP_SEND_REQUEST],
        ));
        catalog.insert(CapabilityContract::new(
            BLOBSTORE,
            ProviderKind::Blob,
            &[OP_READ, OP_WRITE, OP_DELETE],
        ));
        catalog.alias("wasi:http/outgoing-handler", OUTGOING_HTTP);
        catalog.alias("wasi:blobstore", BLOBSTORE);
        catalog
    }

    pub fn insert(&mut self, contract: CapabilityContract) {
        self.contracts.insert(contract.contract_id.clone(), contract);
    }

    pub fn alias(&mut self, alias: impl Into<String>, contract_id: impl Into<String>) {
        self.aliases.insert(alias.into(), contract_id.into());
    }

    /// Map an id or alias to the id the contract is registered under.
    pub fn canonical_id<'a>(&'a self, id: &'a str) -> Option<&'a str> {
        if let Some((key, _)) = self.contracts.get_key_value(id) {
            return Some(key.as_str());
        }
        self.aliases
            .get(id)
            .filter(|target| self.contracts.contains_key(*target))
            .map(String::as_str)
    }

    pub fn get(&self, id: &str) -> Option<&CapabilityContract> {
        self.canonical_id(id).and_then(|id| self.contracts.get(id))
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}

/// Check an invocation against its contract and the target it resolved to.
///
/// Pure: no shared state, safe to call from any number of tasks.
pub fn validate(
    catalog: &ContractCatalog,
    invocation: &Invocation,
    target: &ResolvedTarget,
) -> Result<(), ContractError> {
    let mismatch = |reason: String| ContractError::ContractMismatch {
        contract_id: invocation.contract_id.clone(),
        operation: invocation.operation.clone(),
        reason,
    };

    let contract = catalog
        .get(&invocation.contract_id)
        .ok_or_else(|| mismatch("contract is not known to this runtime".into()))?;

    if !contract.supports(&invocation.operation) {
        return Err(mismatch(format!(
            "operation not in contract (expected one of: {})",
            contract
                .operation_names
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    if target.provider_kind != contract.kind {
        return Err(mismatch(format!(
            "provider '{}' is {}, contract requires {}",
            target.provider_id, target.provider_kind, contract.kind
        )));
    }

    if target.contract_id != contract.contract_id {
        return Err(mismatch(format!(
            "resolved link is for contract '{}'",
            target.contract_id
        )));
    }

    let payload_kind = invocation.payload.kind();
    if payload_kind != contract.kind {
        return Err(mismatch(format!(
            "{payload_kind} payload sent to {} contract",
            contract.kind
        )));
    }

    if let Payload::Blob(request) = &invocation.payload
        && invocation.operation == OP_WRITE
        && request.data.is_none()
    {
        return Err(mismatch("write requires data".into()));
    }

    Ok(())
}

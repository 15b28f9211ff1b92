use thiserror::Error;

/// Failures resolving or registering link definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("no link for component '{source_component_id}' on contract '{contract_id}'")]
    LinkNotFound {
        source_component_id: String,
        contract_id: String,
    },

    #[error(
        "component '{source_component_id}' has {} links on contract '{contract_id}': {}",
        .candidates.len(),
        .candidates.join(", ")
    )]
    AmbiguousLink {
        source_component_id: String,
        contract_id: String,
        candidates: Vec<String>,
    },

    #[error("link targets undeclared provider: {0}")]
    UnknownProvider(String),

    #[error("link belongs to component '{found}', expected '{expected}'")]
    SourceMismatch { expected: String, found: String },
}

/// An invocation that does not fit the contract it names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    #[error("contract mismatch on '{contract_id}' operation '{operation}': {reason}")]
    ContractMismatch {
        contract_id: String,
        operation: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to parse manifest: {0}")]
    Parse(String),

    #[error("unknown contract '{contract}' referenced by {referenced_by}")]
    UnknownContract {
        contract: String,
        referenced_by: String,
    },

    #[error("component '{component}' links to undeclared provider '{target}'")]
    UndeclaredProvider { component: String, target: String },

    #[error("provider '{provider}' implements '{provided}' but is linked as '{linked}'")]
    KindMismatch {
        provider: String,
        provided: String,
        linked: String,
    },

    #[error("duplicate component id: {0}")]
    DuplicateComponent(String),

    #[error("duplicate provider id: {0}")]
    DuplicateProvider(String),

    #[error("duplicate link: {0}")]
    DuplicateLink(String),

    #[error("component '{component}' links '{contract}' to more than one provider: {targets:?}")]
    AmbiguousLink {
        component: String,
        contract: String,
        targets: Vec<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

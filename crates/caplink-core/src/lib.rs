//! Core model for caplink.
//!
//! A component may only reach a capability (outgoing HTTP, blob storage)
//! through a [`LinkDefinition`] declared at deploy time. This crate holds the
//! link model, the capability contracts and their validator, and the
//! generational [`LinkRegistry`] that resolves an invocation to its target.
//!
//! ```rust
//! use caplink_core::{ContractCatalog, Invocation, LinkDefinition, LinkRegistry, ProviderKind};
//!
//! let registry = LinkRegistry::new();
//! registry.register_provider("blob-fs", ProviderKind::Blob);
//! registry
//!     .register(LinkDefinition::new("app", "blobstore", "blob-fs").with_value("ROOT", "/tmp"))
//!     .unwrap();
//!
//! let generation = registry.snapshot();
//! let target = generation.resolve("app", "blobstore").unwrap();
//! let invocation = Invocation::blob_read("app", "greeting.txt");
//! caplink_core::validate(&ContractCatalog::builtin(), &invocation, &target).unwrap();
//! ```

pub mod contract;
pub mod error;
pub mod manifest;
pub mod model;
pub mod registry;

pub use contract::{CapabilityContract, ContractCatalog, validate};
pub use error::{ContractError, LinkError, ManifestError};
pub use manifest::{AppliedManifest, Manifest, ReplicaTarget};
pub use model::{
    BlobRequest, Body, ComponentInstance, InstanceId, Invocation, LinkDefinition, LinkKey,
    OutgoingRequest, Payload, ProviderKind, ResolvedTarget,
};
pub use registry::{Deployment, Generation, LinkRegistry};

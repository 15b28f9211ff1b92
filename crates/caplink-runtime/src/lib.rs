//! Runtime half of caplink: the dispatch router, the outgoing-HTTP and
//! blob-storage mediators, and the replica supervisor.
//!
//! [`Runtime`] wires them together. An invocation flows
//! registry → contract check → liveness → mediator, and every failure is
//! returned to the caller as a [`DispatchError`].

pub mod audit;
pub mod blob;
pub mod config;
pub mod containment;
pub mod error;
pub mod http;
pub mod mediator;
pub mod metrics;
pub mod pool;
pub mod router;
pub mod runtime;
pub mod supervisor;

pub use audit::{AuditEvent, AuditKind, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use blob::BlobMediator;
pub use config::{HttpConfig, RuntimeConfig, SupervisorConfig};
pub use error::{BlobError, DispatchError, HttpError, RuntimeError, SupervisorError};
pub use http::{HttpMediator, IncomingResponse, ResponseBody};
pub use mediator::{MediatedCall, Mediator, Reply};
pub use metrics::{DispatchMetrics, MetricsBackend, MetricsSnapshot};
pub use pool::ConnectionPool;
pub use router::DispatchRouter;
pub use runtime::Runtime;
pub use supervisor::{InProcessLauncher, InstanceLauncher, ReconcileReport, ReplicaSupervisor};

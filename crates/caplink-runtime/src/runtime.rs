use std::path::Path;
use std::sync::Arc;

use caplink_core::{ContractCatalog, Invocation, LinkRegistry, Manifest};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::blob::BlobMediator;
use crate::config::RuntimeConfig;
use crate::error::{DispatchError, RuntimeError};
use crate::http::HttpMediator;
use crate::mediator::Reply;
use crate::metrics::DispatchMetrics;
use crate::router::DispatchRouter;
use crate::supervisor::{InProcessLauncher, InstanceLauncher, ReplicaSupervisor};

/// A wired-up capability runtime: registry, supervisor, both mediators and
/// the router in front of them.
///
/// # Threading
///
/// `Runtime` is `Send + Sync` and is typically wrapped in `Arc`. Dispatch
/// takes no global lock; redeploys swap the link generation atomically.
pub struct Runtime {
    config: RuntimeConfig,
    catalog: Arc<ContractCatalog>,
    registry: Arc<LinkRegistry>,
    supervisor: Arc<ReplicaSupervisor>,
    http: Arc<HttpMediator>,
    router: DispatchRouter,
    shutdown: CancellationToken,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_parts(config, Arc::new(TracingAuditSink), Arc::new(InProcessLauncher))
    }

    /// Build with a custom audit sink and instance launcher.
    pub fn with_parts(
        config: RuntimeConfig,
        audit: Arc<dyn AuditSink>,
        launcher: Arc<dyn InstanceLauncher>,
    ) -> Self {
        let catalog = Arc::new(ContractCatalog::builtin());
        let registry = Arc::new(LinkRegistry::new());
        let supervisor = Arc::new(ReplicaSupervisor::new(launcher));
        let http = Arc::new(HttpMediator::new(&config.http));
        let blob = Arc::new(BlobMediator::new(audit));

        let router = DispatchRouter::new(
            Arc::clone(&registry),
            Arc::clone(&catalog),
            Arc::clone(&supervisor),
        )
        .with_mediator(http.clone())
        .with_mediator(blob);

        Self {
            config,
            catalog,
            registry,
            supervisor,
            http,
            router,
            shutdown: CancellationToken::new(),
        }
    }

    /// Validate `manifest`, publish its links as a new generation and adopt
    /// its replica targets. Returns the generation number.
    ///
    /// On error nothing changes: the previous generation stays current.
    pub async fn apply_manifest(&self, manifest: &Manifest) -> Result<u64, RuntimeError> {
        let applied = manifest.to_deployment(&self.catalog)?;
        let generation = self.registry.apply(applied.deployment)?;
        self.supervisor.apply_targets(&applied.replicas).await;
        let report = self.supervisor.reconcile().await;

        tracing::info!(
            app = %manifest.name,
            generation,
            started = report.started,
            stopped = report.stopped,
            "Manifest applied"
        );
        Ok(generation)
    }

    pub async fn apply_manifest_file(&self, path: &Path) -> Result<u64, RuntimeError> {
        let manifest = Manifest::from_file(path)?;
        self.apply_manifest(&manifest).await
    }

    pub async fn dispatch(&self, invocation: Invocation) -> Result<Reply, DispatchError> {
        self.router.dispatch(invocation).await
    }

    /// Keep replicas converging in the background until [`Runtime::shutdown`].
    pub fn spawn_reconciler(&self) -> JoinHandle<()> {
        Arc::clone(&self.supervisor).spawn_reconciler(
            self.config.supervisor.reconcile_interval(),
            self.shutdown.child_token(),
        )
    }

    /// Stop the reconciler and tear down every instance, cancelling their
    /// in-flight requests.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.supervisor.shutdown().await;
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ContractCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<LinkRegistry> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Arc<ReplicaSupervisor> {
        &self.supervisor
    }

    pub fn router(&self) -> &DispatchRouter {
        &self.router
    }

    pub fn http(&self) -> &HttpMediator {
        &self.http
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        self.router.metrics()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

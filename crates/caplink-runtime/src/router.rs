use std::collections::HashMap;
use std::sync::Arc;

use caplink_core::{ContractCatalog, Generation, Invocation, LinkRegistry, ProviderKind};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::error::DispatchError;
use crate::mediator::{MediatedCall, Mediator, Reply};
use crate::metrics::DispatchMetrics;
use crate::supervisor::ReplicaSupervisor;

/// Routes an invocation to the mediator serving the link it resolves to.
///
/// The router only composes: registry lookup, contract check, liveness, then
/// hand-off. Every failure comes back to the caller unchanged.
pub struct DispatchRouter {
    registry: Arc<LinkRegistry>,
    catalog: Arc<ContractCatalog>,
    supervisor: Arc<ReplicaSupervisor>,
    mediators: HashMap<ProviderKind, Arc<dyn Mediator>>,
    metrics: Arc<DispatchMetrics>,
}

impl DispatchRouter {
    pub fn new(
        registry: Arc<LinkRegistry>,
        catalog: Arc<ContractCatalog>,
        supervisor: Arc<ReplicaSupervisor>,
    ) -> Self {
        Self {
            registry,
            catalog,
            supervisor,
            mediators: HashMap::new(),
            metrics: Arc::new(DispatchMetrics::new()),
        }
    }

    /// Register the mediator for its provider kind, replacing any previous one.
    pub fn with_mediator(mut self, mediator: Arc<dyn Mediator>) -> Self {
        self.mediators.insert(mediator.kind(), mediator);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Dispatch against the generation current at the time of the call.
    pub async fn dispatch(&self, invocation: Invocation) -> Result<Reply, DispatchError> {
        let generation = self.registry.snapshot();
        self.dispatch_in(&generation, invocation).await
    }

    /// Dispatch against a specific generation. A redeploy that lands while
    /// this runs does not affect it.
    pub async fn dispatch_in(
        &self,
        generation: &Generation,
        invocation: Invocation,
    ) -> Result<Reply, DispatchError> {
        let span = tracing::debug_span!(
            "dispatch",
            component = %invocation.source_component_id,
            contract = %invocation.contract_id,
            operation = %invocation.operation,
            generation = generation.number(),
        );

        async move {
            self.metrics.record_dispatched();
            match self.route(generation, invocation).await {
                Ok(reply) => {
                    self.metrics.record_success();
                    tracing::debug!("Invocation completed");
                    Ok(reply)
                }
                Err(e) => {
                    self.metrics.record_failure(&e);
                    tracing::debug!(error = %e, kind = e.label(), "Invocation failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn route(
        &self,
        generation: &Generation,
        mut invocation: Invocation,
    ) -> Result<Reply, DispatchError> {
        if let Some(canonical) = self
            .catalog
            .canonical_id(&invocation.contract_id)
            .map(str::to_owned)
        {
            invocation.contract_id = canonical;
        }

        let target = generation.resolve(&invocation.source_component_id, &invocation.contract_id)?;
        caplink_core::validate(&self.catalog, &invocation, &target)?;

        let cancel = match invocation.origin {
            Some(origin) => match self.supervisor.lookup(origin).await {
                Some((instance, cancel)) if instance.component_id == invocation.source_component_id => cancel,
                _ => {
                    return Err(DispatchError::NoLiveInstance {
                        component_id: invocation.source_component_id,
                    });
                }
            },
            None => CancellationToken::new(),
        };

        let provider_instance = if self.supervisor.tracks(&target.provider_id).await {
            let picked = self.supervisor.pick_live(&target.provider_id).await;
            if picked.is_none() {
                return Err(DispatchError::NoLiveInstance {
                    component_id: target.provider_id.clone(),
                });
            }
            picked
        } else {
            None
        };

        let mediator = self
            .mediators
            .get(&target.provider_kind)
            .ok_or(DispatchError::MediatorUnavailable(target.provider_kind))?;

        tracing::debug!(
            provider = %target.provider_id,
            mediator = mediator.name(),
            "Forwarding to mediator"
        );

        mediator
            .execute(MediatedCall {
                target,
                operation: invocation.operation,
                payload: invocation.payload,
                cancel,
                provider_instance,
            })
            .await
    }
}

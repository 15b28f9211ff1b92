use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use caplink_core::{ComponentInstance, InstanceId, ReplicaTarget};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SupervisorError;

pub type LaunchFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SupervisorError>> + Send + 'a>>;
pub type StopFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Brings component instances up and down. The sandbox that actually hosts
/// them lives behind this trait.
pub trait InstanceLauncher: Send + Sync {
    fn start<'a>(&'a self, instance: &'a ComponentInstance) -> LaunchFuture<'a>;

    fn stop<'a>(&'a self, instance: &'a ComponentInstance) -> StopFuture<'a>;
}

/// Launcher for instances that live inside this process; starting one only
/// records it.
#[derive(Debug, Default)]
pub struct InProcessLauncher;

impl InstanceLauncher for InProcessLauncher {
    fn start<'a>(&'a self, instance: &'a ComponentInstance) -> LaunchFuture<'a> {
        Box::pin(async move {
            tracing::debug!(
                component = %instance.component_id,
                replica = instance.replica_index,
                instance = %instance.instance_id,
                "Started in-process instance"
            );
            Ok(())
        })
    }

    fn stop<'a>(&'a self, instance: &'a ComponentInstance) -> StopFuture<'a> {
        Box::pin(async move {
            tracing::debug!(
                component = %instance.component_id,
                instance = %instance.instance_id,
                "Stopped in-process instance"
            );
        })
    }
}

struct LiveInstance {
    instance: ComponentInstance,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ReplicaSet {
    desired: u32,
    /// Dropped from the deployment; forgotten once its live set is empty.
    retired: bool,
    /// replica_index → instance
    live: BTreeMap<u32, LiveInstance>,
}

/// Outcome of one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: usize,
    pub stopped: usize,
    pub failed: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.started == 0 && self.stopped == 0 && self.failed == 0
    }
}

/// Keeps the number of live instances per component converging on the
/// declared replica count.
///
/// The desired count is a target, not a guarantee: between reconcile passes
/// the live set may be smaller or larger, and callers must tolerate that.
/// Removing an instance cancels its token, which aborts anything it has in
/// flight.
pub struct ReplicaSupervisor {
    launcher: Arc<dyn InstanceLauncher>,
    /// component_id → desired count + live instances
    sets: RwLock<HashMap<String, ReplicaSet>>,
    cursor: AtomicUsize,
}

impl ReplicaSupervisor {
    pub fn new(launcher: Arc<dyn InstanceLauncher>) -> Self {
        Self {
            launcher,
            sets: RwLock::new(HashMap::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    pub async fn set_desired(&self, component_id: &str, replicas: u32) {
        let mut sets = self.sets.write().await;
        let set = sets.entry(component_id.to_string()).or_default();
        if set.desired != replicas {
            tracing::info!(component = component_id, from = set.desired, to = replicas, "Replica target changed");
        }
        set.desired = replicas;
        set.retired = false;
    }

    /// Adopt a deployment's replica targets. Tracked components missing from
    /// `targets` are scaled to zero and stop being tracked once their last
    /// instance is gone.
    pub async fn apply_targets(&self, targets: &[ReplicaTarget]) {
        let wanted: HashMap<&str, u32> = targets
            .iter()
            .map(|t| (t.component_id.as_str(), t.replicas))
            .collect();

        let mut sets = self.sets.write().await;
        for (component_id, set) in sets.iter_mut() {
            if !wanted.contains_key(component_id.as_str()) && !set.retired {
                tracing::info!(component = %component_id, "Component dropped from deployment, scaling to zero");
                set.desired = 0;
                set.retired = true;
            }
        }
        sets.retain(|_, set| !(set.retired && set.live.is_empty()));
        for (component_id, replicas) in wanted {
            let set = sets.entry(component_id.to_string()).or_default();
            set.desired = replicas;
            set.retired = false;
        }
    }

    pub async fn desired_count(&self, component_id: &str) -> u32 {
        self.sets
            .read()
            .await
            .get(component_id)
            .map_or(0, |set| set.desired)
    }

    pub async fn live_instances(&self, component_id: &str) -> BTreeSet<InstanceId> {
        self.sets
            .read()
            .await
            .get(component_id)
            .map(|set| set.live.values().map(|l| l.instance.instance_id).collect())
            .unwrap_or_default()
    }

    /// Whether `component_id` is under supervision at all. Untracked targets
    /// are not subject to liveness checks.
    pub async fn tracks(&self, component_id: &str) -> bool {
        self.sets.read().await.contains_key(component_id)
    }

    pub async fn is_live(&self, instance_id: InstanceId) -> bool {
        self.lookup(instance_id).await.is_some()
    }

    /// The live instance with this id and the token that fires when it is torn down.
    pub async fn lookup(&self, instance_id: InstanceId) -> Option<(ComponentInstance, CancellationToken)> {
        let sets = self.sets.read().await;
        sets.values()
            .flat_map(|set| set.live.values())
            .find(|l| l.instance.instance_id == instance_id)
            .map(|l| (l.instance.clone(), l.cancel.clone()))
    }

    pub async fn cancellation_token(&self, instance_id: InstanceId) -> Option<CancellationToken> {
        self.lookup(instance_id).await.map(|(_, cancel)| cancel)
    }

    /// A live instance of `component_id`, round-robin across replicas.
    pub async fn pick_live(&self, component_id: &str) -> Option<ComponentInstance> {
        let sets = self.sets.read().await;
        let set = sets.get(component_id)?;
        if set.live.is_empty() {
            return None;
        }
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % set.live.len();
        set.live.values().nth(slot).map(|l| l.instance.clone())
    }

    /// One pass toward the desired counts. Launch failures are logged and
    /// left for the next pass.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let (to_start, to_stop) = {
            let mut sets = self.sets.write().await;
            let mut to_start = Vec::new();
            let mut to_stop = Vec::new();
            for (component_id, set) in sets.iter_mut() {
                // Everything at or past the desired count goes, highest first,
                // before any gap below it is filled.
                let excess = set.live.split_off(&set.desired);
                to_stop.extend(excess.into_values().rev());
                for index in 0..set.desired {
                    if !set.live.contains_key(&index) {
                        to_start.push(ComponentInstance {
                            instance_id: InstanceId::new(),
                            component_id: component_id.clone(),
                            replica_index: index,
                        });
                    }
                }
            }
            sets.retain(|_, set| !(set.retired && set.live.is_empty()));
            (to_start, to_stop)
        };

        for live in to_stop {
            self.teardown(live).await;
            report.stopped += 1;
        }

        for instance in to_start {
            if let Err(e) = self.launcher.start(&instance).await {
                tracing::warn!(component = %instance.component_id, replica = instance.replica_index, "{e}");
                report.failed += 1;
                continue;
            }

            let mut sets = self.sets.write().await;
            let still_wanted = sets
                .get(&instance.component_id)
                .is_some_and(|set| instance.replica_index < set.desired && !set.live.contains_key(&instance.replica_index));
            if still_wanted {
                if let Some(set) = sets.get_mut(&instance.component_id) {
                    tracing::info!(
                        component = %instance.component_id,
                        replica = instance.replica_index,
                        instance = %instance.instance_id,
                        "Replica live"
                    );
                    set.live.insert(
                        instance.replica_index,
                        LiveInstance {
                            instance,
                            cancel: CancellationToken::new(),
                        },
                    );
                    report.started += 1;
                }
            } else {
                drop(sets);
                self.launcher.stop(&instance).await;
            }
        }

        if !report.is_noop() {
            tracing::debug!(
                started = report.started,
                stopped = report.stopped,
                failed = report.failed,
                "Reconcile pass finished"
            );
        }
        report
    }

    async fn teardown(&self, live: LiveInstance) {
        live.cancel.cancel();
        tracing::info!(
            component = %live.instance.component_id,
            replica = live.instance.replica_index,
            instance = %live.instance.instance_id,
            "Replica removed"
        );
        self.launcher.stop(&live.instance).await;
    }

    /// Reconcile every `interval` until `shutdown` fires.
    pub fn spawn_reconciler(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.reconcile().await;
                    }
                }
            }
            tracing::debug!("Reconciler stopped");
        })
    }

    /// Tear down every instance and forget all targets.
    pub async fn shutdown(&self) {
        let drained: Vec<LiveInstance> = {
            let mut sets = self.sets.write().await;
            sets.drain()
                .flat_map(|(_, set)| set.live.into_values())
                .collect()
        };
        let count = drained.len();
        for live in drained {
            self.teardown(live).await;
        }
        tracing::info!(stopped = count, "Supervisor shut down");
    }
}

impl Default for ReplicaSupervisor {
    fn default() -> Self {
        Self::new(Arc::new(InProcessLauncher))
    }
}

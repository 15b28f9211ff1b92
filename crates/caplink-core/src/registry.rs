use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;

use crate::contract::BLOB_ROOT;
use crate::error::LinkError;
use crate::model::{LinkDefinition, LinkKey, ProviderKind, ResolvedTarget};

/// A complete link set, applied as one unit on redeploy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deployment {
    pub providers: BTreeMap<String, ProviderKind>,
    pub links: Vec<LinkDefinition>,
}

/// One immutable snapshot of every registered link.
///
/// Resolutions made against a generation handle keep seeing that generation
/// even after the registry has moved on.
#[derive(Debug, Default)]
pub struct Generation {
    number: u64,
    providers: BTreeMap<String, ProviderKind>,
    links: BTreeMap<LinkKey, LinkDefinition>,
    /// (source, contract) → targets, precomputed for lock-free resolution
    resolved: HashMap<(String, String), Vec<Arc<ResolvedTarget>>>,
}

impl Generation {
    fn build(
        number: u64,
        providers: BTreeMap<String, ProviderKind>,
        links: BTreeMap<LinkKey, LinkDefinition>,
    ) -> Result<Self, LinkError> {
        let shared = shared_blob_roots(&providers, &links);

        let mut resolved: HashMap<(String, String), Vec<Arc<ResolvedTarget>>> = HashMap::new();
        for (key, link) in &links {
            let provider_kind = *providers
                .get(&key.target_provider_id)
                .ok_or_else(|| LinkError::UnknownProvider(key.target_provider_id.clone()))?;

            resolved
                .entry((key.source_component_id.clone(), key.contract_id.clone()))
                .or_default()
                .push(Arc::new(ResolvedTarget {
                    provider_kind,
                    provider_id: key.target_provider_id.clone(),
                    source_component_id: key.source_component_id.clone(),
                    contract_id: key.contract_id.clone(),
                    config: link.values.clone(),
                    generation: number,
                    shared_root: shared.get(key).cloned(),
                }));
        }

        Ok(Self {
            number,
            providers,
            links,
            resolved,
        })
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    /// Resolve the single link for `(source, contract)`.
    pub fn resolve(
        &self,
        source_component_id: &str,
        contract_id: &str,
    ) -> Result<Arc<ResolvedTarget>, LinkError> {
        let targets = self
            .resolved
            .get(&(source_component_id.to_string(), contract_id.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default();

        match targets {
            [] => Err(LinkError::LinkNotFound {
                source_component_id: source_component_id.into(),
                contract_id: contract_id.into(),
            }),
            [target] => Ok(Arc::clone(target)),
            many => Err(LinkError::AmbiguousLink {
                source_component_id: source_component_id.into(),
                contract_id: contract_id.into(),
                candidates: many.iter().map(|t| t.provider_id.clone()).collect(),
            }),
        }
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkDefinition> {
        self.links.values()
    }

    pub fn provider_kind(&self, provider_id: &str) -> Option<ProviderKind> {
        self.providers.get(provider_id).copied()
    }

    pub fn providers(&self) -> impl Iterator<Item = (&str, ProviderKind)> {
        self.providers.iter().map(|(id, kind)| (id.as_str(), *kind))
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Copy-on-write store of link definitions.
///
/// Readers load the current [`Generation`] without locking. Writers are
/// serialized, build a complete new generation, and publish it with one
/// atomic pointer swap, so no reader ever observes a partially applied update.
pub struct LinkRegistry {
    current: ArcSwap<Generation>,
    writer: Mutex<()>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Generation::default()),
            writer: Mutex::new(()),
        }
    }

    /// Handle to the current generation.
    pub fn snapshot(&self) -> Arc<Generation> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().number
    }

    pub fn resolve(
        &self,
        source_component_id: &str,
        contract_id: &str,
    ) -> Result<Arc<ResolvedTarget>, LinkError> {
        self.current.load().resolve(source_component_id, contract_id)
    }

    /// Declare (or re-declare) a provider and the kind of mediator serving it.
    pub fn register_provider(&self, provider_id: impl Into<String>, kind: ProviderKind) -> u64 {
        let provider_id = provider_id.into();
        let result = self.update(|providers, _| {
            providers.insert(provider_id.clone(), kind);
            Ok(())
        });
        // Adding a provider can't invalidate an existing link.
        result.unwrap_or_else(|_| self.generation())
    }

    /// Insert a link, or replace the one already registered under its key.
    pub fn register(&self, link: LinkDefinition) -> Result<u64, LinkError> {
        self.update(|providers, links| {
            ensure_provider(providers, &link)?;
            links.insert(link.key(), link);
            Ok(())
        })
    }

    /// Replace every link of `component_id` with `links`.
    pub fn apply_component(
        &self,
        component_id: &str,
        links: Vec<LinkDefinition>,
    ) -> Result<u64, LinkError> {
        self.update(|providers, current| {
            for link in &links {
                if link.source_component_id != component_id {
                    return Err(LinkError::SourceMismatch {
                        expected: component_id.into(),
                        found: link.source_component_id.clone(),
                    });
                }
                ensure_provider(providers, link)?;
            }
            current.retain(|key, _| key.source_component_id != component_id);
            current.extend(links.into_iter().map(|link| (link.key(), link)));
            Ok(())
        })
    }

    /// Drop every link sourced from `component_id`.
    pub fn remove_component(&self, component_id: &str) -> u64 {
        let result = self.update(|_, links| {
            links.retain(|key, _| key.source_component_id != component_id);
            Ok(())
        });
        result.unwrap_or_else(|_| self.generation())
    }

    /// Replace the whole registry contents with `deployment`.
    pub fn apply(&self, deployment: Deployment) -> Result<u64, LinkError> {
        self.update(|providers, links| {
            for link in &deployment.links {
                ensure_provider(&deployment.providers, link)?;
            }
            *providers = deployment.providers;
            *links = deployment
                .links
                .into_iter()
                .map(|link| (link.key(), link))
                .collect();
            Ok(())
        })
    }

    fn update<F>(&self, mutate: F) -> Result<u64, LinkError>
    where
        F: FnOnce(
            &mut BTreeMap<String, ProviderKind>,
            &mut BTreeMap<LinkKey, LinkDefinition>,
        ) -> Result<(), LinkError>,
    {
        let _guard = self.lock_writer();
        let previous = self.current.load_full();

        let mut providers = previous.providers.clone();
        let mut links = previous.links.clone();
        mutate(&mut providers, &mut links)?;

        let number = previous.number + 1;
        let next = Generation::build(number, providers, links)?;
        tracing::info!(
            generation = number,
            links = next.len(),
            "Link registry generation published"
        );
        self.current.store(Arc::new(next));
        Ok(number)
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        // The guarded value is `()`, so a poisoned lock carries no broken state.
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for LinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_provider(
    providers: &BTreeMap<String, ProviderKind>,
    link: &LinkDefinition,
) -> Result<(), LinkError> {
    if providers.contains_key(&link.target_provider_id) {
        Ok(())
    } else {
        Err(LinkError::UnknownProvider(link.target_provider_id.clone()))
    }
}

/// Blob links whose `ROOT` equals, contains or sits inside another
/// component's root, mapped to the outermost of the overlapping roots.
///
/// Every component in an overlapping set then lives in its own namespace
/// directly under that outermost root, so no two namespaces nest. Roots are
/// compared lexically; two spellings of one directory through a symlink are
/// not detected.
fn shared_blob_roots<'a>(
    providers: &BTreeMap<String, ProviderKind>,
    links: &'a BTreeMap<LinkKey, LinkDefinition>,
) -> HashMap<&'a LinkKey, String> {
    let roots: Vec<(&LinkKey, PathBuf)> = links
        .iter()
        .filter(|(key, _)| providers.get(&key.target_provider_id) == Some(&ProviderKind::Blob))
        .filter_map(|(key, link)| {
            let root = link.values.get(BLOB_ROOT)?;
            (!root.is_empty()).then(|| (key, lexical(root)))
        })
        .collect();

    let mut shared = HashMap::new();
    for (key, root) in &roots {
        let mut overlaps = false;
        let mut outermost = root;
        for (other, other_root) in &roots {
            if other.source_component_id == key.source_component_id {
                continue;
            }
            if root.starts_with(other_root) {
                overlaps = true;
                if outermost.starts_with(other_root) {
                    outermost = other_root;
                }
            } else if other_root.starts_with(root) {
                overlaps = true;
            }
        }
        if overlaps {
            shared.insert(*key, outermost.display().to_string());
        }
    }
    shared
}

/// Drop `.` segments and fold `..` into its parent without touching the
/// filesystem.
fn lexical(root: &str) -> PathBuf {
    let mut out = PathBuf::new();
    for part in Path::new(root).components() {
        match part {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}

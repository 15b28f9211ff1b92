use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::contract::ContractCatalog;
use crate::error::ManifestError;
use crate::model::LinkDefinition;
use crate::registry::Deployment;

/// The fields of an application manifest the runtime consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub id: String,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub contract: String,
    pub target: String,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// A capability provider. Without `replicas` it is not supervised and is
/// assumed always reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub id: String,
    pub contract: String,
    #[serde(default)]
    pub replicas: Option<u32>,
}

fn default_replicas() -> u32 {
    1
}

/// Desired replica count for one supervised component or provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaTarget {
    pub component_id: String,
    pub replicas: u32,
}

/// A validated manifest, split into what the registry and supervisor consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedManifest {
    pub deployment: Deployment,
    pub replicas: Vec<ReplicaTarget>,
}

impl Manifest {
    pub fn from_toml_str(content: &str) -> Result<Self, ManifestError> {
        toml::from_str(content).map_err(|e| ManifestError::Parse(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate against `catalog` and produce the deployment to apply.
    ///
    /// Contract aliases are normalised to their canonical id so that links
    /// resolve the same way regardless of which name the manifest used.
    pub fn to_deployment(&self, catalog: &ContractCatalog) -> Result<AppliedManifest, ManifestError> {
        let mut deployment = Deployment::default();
        let mut replicas = Vec::new();
        let mut provider_contracts: BTreeMap<&str, &str> = BTreeMap::new();

        for provider in &self.providers {
            let contract = catalog.get(&provider.contract).ok_or_else(|| {
                ManifestError::UnknownContract {
                    contract: provider.contract.clone(),
                    referenced_by: format!("provider '{}'", provider.id),
                }
            })?;
            if deployment
                .providers
                .insert(provider.id.clone(), contract.kind)
                .is_some()
            {
                return Err(ManifestError::DuplicateProvider(provider.id.clone()));
            }
            provider_contracts.insert(&provider.id, &contract.contract_id);
            if let Some(count) = provider.replicas {
                replicas.push(ReplicaTarget {
                    component_id: provider.id.clone(),
                    replicas: count,
                });
            }
        }

        let mut component_ids = HashSet::new();
        let mut link_keys = BTreeSet::new();
        for component in &self.components {
            if !component_ids.insert(component.id.as_str())
                || provider_contracts.contains_key(component.id.as_str())
            {
                return Err(ManifestError::DuplicateComponent(component.id.clone()));
            }
            replicas.push(ReplicaTarget {
                component_id: component.id.clone(),
                replicas: component.replicas,
            });

            // contract → first provider it was linked to
            let mut linked: BTreeMap<&str, &str> = BTreeMap::new();
            for link in &component.links {
                let contract_id = catalog.canonical_id(&link.contract).ok_or_else(|| {
                    ManifestError::UnknownContract {
                        contract: link.contract.clone(),
                        referenced_by: format!("component '{}'", component.id),
                    }
                })?;
                let provided = provider_contracts.get(link.target.as_str()).ok_or_else(|| {
                    ManifestError::UndeclaredProvider {
                        component: component.id.clone(),
                        target: link.target.clone(),
                    }
                })?;
                if *provided != contract_id {
                    return Err(ManifestError::KindMismatch {
                        provider: link.target.clone(),
                        provided: (*provided).to_string(),
                        linked: contract_id.to_string(),
                    });
                }

                let definition = LinkDefinition {
                    contract_id: contract_id.to_string(),
                    source_component_id: component.id.clone(),
                    target_provider_id: link.target.clone(),
                    values: link.values.clone(),
                };
                if !link_keys.insert(definition.key()) {
                    return Err(ManifestError::DuplicateLink(definition.key().to_string()));
                }
                if let Some(first) = linked.insert(contract_id, &link.target) {
                    return Err(ManifestError::AmbiguousLink {
                        component: component.id.clone(),
                        contract: contract_id.to_string(),
                        targets: vec![first.to_string(), link.target.clone()],
                    });
                }
                deployment.links.push(definition);
            }
        }

        tracing::debug!(
            manifest = %self.name,
            links = deployment.links.len(),
            providers = deployment.providers.len(),
            "Manifest validated"
        );

        Ok(AppliedManifest {
            deployment,
            replicas,
        })
    }
}

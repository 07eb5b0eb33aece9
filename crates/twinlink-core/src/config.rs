//! ---
//! twl_section: "04-configuration-orchestration"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "Configuration loading for the TwinLink runtime."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::connection::{ConnectionConfig, ProviderKind};
use crate::context::{ElementInfo, StaticServiceContext};
use crate::manager::validate_provider_uniqueness;
use twinlink_common::{CoreSettings, LoggingConfig};
use twinlink_model::{Datatype, ElementKind, OperationVariable, Reference, TypeInfo};

/// Declaration of one information-model element in the configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ElementDecl {
    #[serde(default)]
    pub kind: ElementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<Datatype>,
    /// Output parameters, meaningful for operation elements only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputDecl>,
}

/// Declared output parameter of an operation element.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputDecl {
    pub id_short: String,
    #[serde(default)]
    pub datatype: Datatype,
}

impl ElementDecl {
    fn to_element_info(&self) -> ElementInfo {
        ElementInfo {
            type_info: TypeInfo {
                kind: self.kind,
                datatype: self.datatype,
            },
            output_variables: self
                .outputs
                .iter()
                .map(|output| OperationVariable::declared(&output.id_short, output.datatype))
                .collect(),
        }
    }
}

/// Primary configuration object for the TwinLink runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub core: CoreSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Information-model elements the connections bind against.
    #[serde(default)]
    pub elements: IndexMap<Reference, ElementDecl>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    /// Adapter-specific sections keyed by adapter name, handed to the
    /// adapter crates untouched.
    #[serde(default)]
    pub adapters: toml::Table,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "TWINLINK_CONFIG";

    /// Load configuration from disk, respecting the `TWINLINK_CONFIG`
    /// override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source
    /// path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants: adapter and endpoint fields are
    /// set, no reference is bound to duplicate providers, and every
    /// bound reference is declared in `elements`.
    pub fn validate(&self) -> Result<()> {
        for (position, connection) in self.connections.iter().enumerate() {
            if connection.adapter.trim().is_empty() {
                return Err(anyhow!("connection {} has an empty adapter", position));
            }
            if connection.endpoint.trim().is_empty() {
                return Err(anyhow!("connection {} has an empty endpoint", position));
            }
            let empty_address = connection
                .value_providers
                .iter()
                .map(|(reference, config)| (reference, config.address.as_str()))
                .chain(
                    connection
                        .operation_providers
                        .iter()
                        .map(|(reference, config)| (reference, config.address.as_str())),
                )
                .chain(
                    connection
                        .subscription_providers
                        .iter()
                        .map(|(reference, config)| (reference, config.address.as_str())),
                )
                .find(|(_, address)| address.trim().is_empty());
            if let Some((reference, _)) = empty_address {
                return Err(anyhow!(
                    "connection {} has an empty provider address (reference: {})",
                    position,
                    reference
                ));
            }
        }
        validate_provider_uniqueness(&self.connections)
            .map_err(|err| anyhow!(err.to_string()))?;

        let mut undeclared = Vec::new();
        for connection in &self.connections {
            for kind in [
                ProviderKind::Value,
                ProviderKind::Operation,
                ProviderKind::Subscription,
            ] {
                for reference in connection.provider_references(kind) {
                    if !self.elements.contains_key(&reference) {
                        undeclared.push(format!("{} ({} provider)", reference, kind));
                    }
                }
            }
        }
        if !undeclared.is_empty() {
            return Err(anyhow!(
                "provider bindings reference undeclared elements: {}",
                undeclared.join(", ")
            ));
        }
        Ok(())
    }

    /// Build the in-memory service context from the declared elements.
    pub fn build_context(&self) -> StaticServiceContext {
        let context = StaticServiceContext::new();
        for (reference, decl) in &self.elements {
            context.insert(reference.clone(), decl.to_element_info());
        }
        context
    }
}

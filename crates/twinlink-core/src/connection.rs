//! ---
//! twl_section: "01-core-functionality"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "Asset-connection abstraction and concurrency machinery."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
//! Connection contract and configuration.
//!
//! A connection owns one protocol session to one asset endpoint and
//! the set of providers bound through it. Provider configuration is
//! adapter-agnostic here: `address` is interpreted by the adapter
//! (an OPC UA node id, a register number, a topic).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};

use crate::error::AssetConnectionError;
use crate::provider::{AssetOperationProvider, AssetSubscriptionProvider, AssetValueProvider};
use twinlink_model::Reference;

/// The three capabilities a connection can bind to a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Value,
    Operation,
    Subscription,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderKind::Value => "value",
            ProviderKind::Operation => "operation",
            ProviderKind::Subscription => "subscription",
        })
    }
}

/// Binds a reference to a readable/writable asset address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueProviderConfig {
    pub address: String,
    /// Index expression projecting one slot out of an array-valued
    /// address, `[2][0]` style. Absent means no projection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_index: Option<String>,
}

/// How strictly declared operation arguments are checked against the
/// variables that actually cross the provider boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentValidationMode {
    /// Pass arguments through unchecked; mismatches surface at the
    /// asset, if at all.
    None,
    /// Every declared argument must be present, extra or missing
    /// arguments are a contract violation.
    #[default]
    Require,
}

impl fmt::Display for ArgumentValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArgumentValidationMode::None => "none",
            ArgumentValidationMode::Require => "require",
        })
    }
}

/// Binds a reference to an invokable asset address.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationProviderConfig {
    pub address: String,
    /// Per-operation override of the blocking-invoke wait bound.
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke_timeout: Option<Duration>,
    /// Validation applied to the caller's input arguments.
    #[serde(default)]
    pub input_validation: ArgumentValidationMode,
    /// Validation applied to inout arguments, both on the way in and
    /// when reconciling what the asset returned.
    #[serde(default)]
    pub inout_validation: ArgumentValidationMode,
    /// Validation applied to the outputs the asset reports.
    #[serde(default)]
    pub output_validation: ArgumentValidationMode,
}

/// Binds a reference to an asset address that pushes value changes.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubscriptionProviderConfig {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_index: Option<String>,
    /// Requested sampling interval, where the protocol supports one.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_interval: Option<Duration>,
}

/// Full configuration of one asset connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Adapter registry key, e.g. `opcua`.
    pub adapter: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub value_providers: IndexMap<Reference, ValueProviderConfig>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub operation_providers: IndexMap<Reference, OperationProviderConfig>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub subscription_providers: IndexMap<Reference, SubscriptionProviderConfig>,
}

impl ConnectionConfig {
    /// References configured for one capability kind.
    pub fn provider_references(&self, kind: ProviderKind) -> Vec<Reference> {
        match kind {
            ProviderKind::Value => self.value_providers.keys().cloned().collect(),
            ProviderKind::Operation => self.operation_providers.keys().cloned().collect(),
            ProviderKind::Subscription => self.subscription_providers.keys().cloned().collect(),
        }
    }

    pub fn provider_count(&self) -> usize {
        self.value_providers.len()
            + self.operation_providers.len()
            + self.subscription_providers.len()
    }

    /// Fold the provider bindings of `other` into this configuration.
    /// Bindings for an already-bound reference replace the old ones.
    pub fn merge_providers(&mut self, other: &ConnectionConfig) {
        for (reference, config) in &other.value_providers {
            self.value_providers.insert(reference.clone(), config.clone());
        }
        for (reference, config) in &other.operation_providers {
            self.operation_providers
                .insert(reference.clone(), config.clone());
        }
        for (reference, config) in &other.subscription_providers {
            self.subscription_providers
                .insert(reference.clone(), config.clone());
        }
    }
}

/// One protocol session to one asset endpoint.
///
/// `connect` performs the adapter handshake and then registers every
/// provider from the connection's configuration; a registration
/// failure surfaces to the caller but does not roll back providers
/// registered before it. `disconnect` unregisters all providers first
/// and then tears the session down. Registering a provider for a
/// reference that already has one of the same kind replaces it.
#[async_trait]
pub trait AssetConnection: Send + Sync {
    /// Human-readable endpoint description for log output.
    fn info(&self) -> String;

    /// Adapter-defined equivalence: whether this connection already
    /// serves the endpoint `config` describes, so its providers can be
    /// registered here instead of opening a second session.
    fn serves(&self, config: &ConnectionConfig) -> bool;

    async fn connect(&self) -> Result<(), AssetConnectionError>;
    async fn disconnect(&self) -> Result<(), AssetConnectionError>;
    fn is_connected(&self) -> bool;

    /// Fold additional provider bindings into this connection.
    ///
    /// The default registers every binding immediately. Adapters that
    /// construct providers only after the protocol handshake override
    /// this to also stage the bindings for the next `connect`.
    fn merge_configuration(&self, config: &ConnectionConfig) -> Result<(), AssetConnectionError> {
        for (reference, provider_config) in &config.value_providers {
            self.register_value_provider(reference, provider_config.clone())?;
        }
        for (reference, provider_config) in &config.operation_providers {
            self.register_operation_provider(reference, provider_config.clone())?;
        }
        for (reference, provider_config) in &config.subscription_providers {
            self.register_subscription_provider(reference, provider_config.clone())?;
        }
        Ok(())
    }

    fn register_value_provider(
        &self,
        reference: &Reference,
        config: ValueProviderConfig,
    ) -> Result<(), AssetConnectionError>;
    fn register_operation_provider(
        &self,
        reference: &Reference,
        config: OperationProviderConfig,
    ) -> Result<(), AssetConnectionError>;
    fn register_subscription_provider(
        &self,
        reference: &Reference,
        config: SubscriptionProviderConfig,
    ) -> Result<(), AssetConnectionError>;

    fn unregister_value_provider(&self, reference: &Reference)
        -> Result<(), AssetConnectionError>;
    fn unregister_operation_provider(
        &self,
        reference: &Reference,
    ) -> Result<(), AssetConnectionError>;
    fn unregister_subscription_provider(
        &self,
        reference: &Reference,
    ) -> Result<(), AssetConnectionError>;

    fn value_provider(&self, reference: &Reference) -> Option<Arc<dyn AssetValueProvider>>;
    fn operation_provider(&self, reference: &Reference)
        -> Option<Arc<dyn AssetOperationProvider>>;
    fn subscription_provider(
        &self,
        reference: &Reference,
    ) -> Option<Arc<dyn AssetSubscriptionProvider>>;

    /// References with a currently registered provider of `kind`.
    fn registered_references(&self, kind: ProviderKind) -> Vec<Reference>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_config_deserializes_from_toml() {
        let toml = r#"
            adapter = "opcua"
            endpoint = "opc.tcp://plc-7:4840"
            username = "svc-twinlink"
            password = "hunter2"

            [value_providers."machines/press/temperature"]
            address = "ns=2;s=Press.Temperature"

            [value_providers."machines/press/forces"]
            address = "ns=2;s=Press.ForceMatrix"
            array_index = "[1][0]"

            [operation_providers."machines/press/calibrate"]
            address = "ns=2;s=Press.Calibrate"
            invoke_timeout = 10
            input_validation = "none"

            [subscription_providers."machines/press/temperature"]
            address = "ns=2;s=Press.Temperature"
            sampling_interval = 250
        "#;
        let config: ConnectionConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.adapter, "opcua");
        assert_eq!(config.provider_count(), 4);
        assert_eq!(
            config.provider_references(ProviderKind::Value),
            vec![
                Reference::from("machines/press/temperature"),
                Reference::from("machines/press/forces"),
            ]
        );
        assert_eq!(
            config.value_providers[&Reference::from("machines/press/forces")]
                .array_index
                .as_deref(),
            Some("[1][0]")
        );
        let calibrate = &config.operation_providers[&Reference::from("machines/press/calibrate")];
        assert_eq!(calibrate.invoke_timeout, Some(Duration::from_secs(10)));
        assert_eq!(calibrate.input_validation, ArgumentValidationMode::None);
        assert_eq!(calibrate.inout_validation, ArgumentValidationMode::Require);
        assert_eq!(calibrate.output_validation, ArgumentValidationMode::Require);
        assert_eq!(
            config.subscription_providers[&Reference::from("machines/press/temperature")]
                .sampling_interval,
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let toml = r#"
            adapter = "opcua"
            endpoint = "opc.tcp://plc-7:4840"
            endpiont_typo = "oops"
        "#;
        assert!(toml::from_str::<ConnectionConfig>(toml).is_err());
    }

    #[test]
    fn merge_replaces_bindings_for_already_bound_references() {
        let mut base: ConnectionConfig = toml::from_str(
            r#"
            adapter = "opcua"
            endpoint = "opc.tcp://plc-7:4840"

            [value_providers."a"]
            address = "ns=2;s=A"
        "#,
        )
        .unwrap();
        let incoming: ConnectionConfig = toml::from_str(
            r#"
            adapter = "opcua"
            endpoint = "opc.tcp://plc-7:4840"

            [value_providers."a"]
            address = "ns=2;s=A2"

            [value_providers."b"]
            address = "ns=2;s=B"
        "#,
        )
        .unwrap();
        base.merge_providers(&incoming);
        assert_eq!(base.value_providers.len(), 2);
        assert_eq!(base.value_providers[&Reference::from("a")].address, "ns=2;s=A2");
    }
}

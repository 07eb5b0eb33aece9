//! ---
//! twl_section: "05-connectivity-adapters"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "OPC UA asset connection adapter."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
//! Connection lifecycle for one OPC UA endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::address_space::ServerRegistry;
use crate::client::UaClient;
use crate::provider::{OpcUaOperationProvider, OpcUaSubscriptionProvider, OpcUaValueProvider};
use twinlink_common::CoreSettings;
use twinlink_core::connection::{
    AssetConnection, ConnectionConfig, OperationProviderConfig, ProviderKind,
    SubscriptionProviderConfig, ValueProviderConfig,
};
use twinlink_core::context::ServiceContext;
use twinlink_core::manager::ConnectionFactory;
use twinlink_core::provider::{
    AssetOperationProvider, AssetSubscriptionProvider, AssetValueProvider,
};
use twinlink_core::AssetConnectionError;
use twinlink_model::Reference;

/// Registry key this adapter is configured under.
pub const ADAPTER_NAME: &str = "opcua";

#[derive(Default)]
struct Providers {
    value: IndexMap<Reference, Arc<OpcUaValueProvider>>,
    operation: IndexMap<Reference, Arc<OpcUaOperationProvider>>,
    subscription: IndexMap<Reference, Arc<OpcUaSubscriptionProvider>>,
}

/// One OPC UA session plus the providers bound through it.
///
/// The configuration is kept behind a lock because the manager can
/// fold additional provider bindings into a running connection.
pub struct OpcUaAssetConnection {
    endpoint: String,
    config: Mutex<ConnectionConfig>,
    context: Arc<dyn ServiceContext>,
    client: Arc<UaClient>,
    default_invoke_timeout: Duration,
    providers: Mutex<Providers>,
}

impl OpcUaAssetConnection {
    pub fn new(
        config: ConnectionConfig,
        context: Arc<dyn ServiceContext>,
        registry: ServerRegistry,
        default_invoke_timeout: Duration,
    ) -> Self {
        let endpoint = config.endpoint.clone();
        let client = Arc::new(UaClient::new(endpoint.clone(), registry));
        Self {
            endpoint,
            config: Mutex::new(config),
            context,
            client,
            default_invoke_timeout,
            providers: Mutex::new(Providers::default()),
        }
    }

    /// Register every provider from the connection configuration.
    /// The first failure surfaces; providers registered before it stay
    /// registered.
    fn register_configured_providers(&self) -> Result<(), AssetConnectionError> {
        let config = self.config.lock().clone();
        self.register_providers_from(&config)
    }

    fn register_providers_from(&self, config: &ConnectionConfig) -> Result<(), AssetConnectionError> {
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

    fn unregister_all_providers(&self) {
        let mut providers = self.providers.lock();
        for (reference, provider) in providers.subscription.drain(..) {
            debug!(reference = %reference, "unregistering subscription provider");
            provider.shutdown();
        }
        providers.value.clear();
        providers.operation.clear();
    }
}

#[async_trait]
impl AssetConnection for OpcUaAssetConnection {
    fn info(&self) -> String {
        format!("opc ua connection ({})", self.endpoint)
    }

    fn serves(&self, config: &ConnectionConfig) -> bool {
        // Differing credentials mean a different session even against
        // the same endpoint.
        let own = self.config.lock();
        config.adapter == own.adapter
            && config.endpoint == own.endpoint
            && config.username == own.username
            && config.password == own.password
    }

    async fn connect(&self) -> Result<(), AssetConnectionError> {
        self.client.connect()?;
        self.register_configured_providers()?;
        info!(
            endpoint = %self.endpoint,
            providers = self.config.lock().provider_count(),
            "opc ua connection ready"
        );
        Ok(())
    }

    fn merge_configuration(&self, config: &ConnectionConfig) -> Result<(), AssetConnectionError> {
        self.config.lock().merge_providers(config);
        // Offline connections pick the staged bindings up on the next
        // connect; provider construction needs a live session.
        if self.is_connected() {
            self.register_providers_from(config)?;
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AssetConnectionError> {
        self.unregister_all_providers();
        self.client.disconnect();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    fn register_value_provider(
        &self,
        reference: &Reference,
        config: ValueProviderConfig,
    ) -> Result<(), AssetConnectionError> {
        let provider = Arc::new(OpcUaValueProvider::new(
            self.client.clone(),
            reference,
            &config,
            self.context.as_ref(),
        )?);
        // Last write wins for a reference already bound here.
        self.providers
            .lock()
            .value
            .insert(reference.clone(), provider);
        Ok(())
    }

    fn register_operation_provider(
        &self,
        reference: &Reference,
        config: OperationProviderConfig,
    ) -> Result<(), AssetConnectionError> {
        let provider = Arc::new(OpcUaOperationProvider::new(
            self.client.clone(),
            reference,
            &config,
            self.context.as_ref(),
            self.default_invoke_timeout,
        )?);
        self.providers
            .lock()
            .operation
            .insert(reference.clone(), provider);
        Ok(())
    }

    fn register_subscription_provider(
        &self,
        reference: &Reference,
        config: SubscriptionProviderConfig,
    ) -> Result<(), AssetConnectionError> {
        let provider = Arc::new(OpcUaSubscriptionProvider::new(
            self.client.clone(),
            reference.clone(),
            &config,
            self.context.clone(),
        )?);
        let replaced = self
            .providers
            .lock()
            .subscription
            .insert(reference.clone(), provider);
        if let Some(replaced) = replaced {
            replaced.shutdown();
        }
        Ok(())
    }

    fn unregister_value_provider(
        &self,
        reference: &Reference,
    ) -> Result<(), AssetConnectionError> {
        self.providers.lock().value.shift_remove(reference);
        Ok(())
    }

    fn unregister_operation_provider(
        &self,
        reference: &Reference,
    ) -> Result<(), AssetConnectionError> {
        self.providers.lock().operation.shift_remove(reference);
        Ok(())
    }

    fn unregister_subscription_provider(
        &self,
        reference: &Reference,
    ) -> Result<(), AssetConnectionError> {
        let removed = self.providers.lock().subscription.shift_remove(reference);
        if let Some(provider) = removed {
            provider.shutdown();
        }
        Ok(())
    }

    fn value_provider(&self, reference: &Reference) -> Option<Arc<dyn AssetValueProvider>> {
        self.providers
            .lock()
            .value
            .get(reference)
            .cloned()
            .map(|provider| provider as Arc<dyn AssetValueProvider>)
    }

    fn operation_provider(
        &self,
        reference: &Reference,
    ) -> Option<Arc<dyn AssetOperationProvider>> {
        self.providers
            .lock()
            .operation
            .get(reference)
            .cloned()
            .map(|provider| provider as Arc<dyn AssetOperationProvider>)
    }

    fn subscription_provider(
        &self,
        reference: &Reference,
    ) -> Option<Arc<dyn AssetSubscriptionProvider>> {
        self.providers
            .lock()
            .subscription
            .get(reference)
            .cloned()
            .map(|provider| provider as Arc<dyn AssetSubscriptionProvider>)
    }

    fn registered_references(&self, kind: ProviderKind) -> Vec<Reference> {
        let providers = self.providers.lock();
        match kind {
            ProviderKind::Value => providers.value.keys().cloned().collect(),
            ProviderKind::Operation => providers.operation.keys().cloned().collect(),
            ProviderKind::Subscription => providers.subscription.keys().cloned().collect(),
        }
    }
}

/// Creates [`OpcUaAssetConnection`]s for the manager.
pub struct OpcUaConnectionFactory {
    registry: ServerRegistry,
    settings: CoreSettings,
}

impl OpcUaConnectionFactory {
    pub fn new(registry: ServerRegistry, settings: CoreSettings) -> Self {
        Self { registry, settings }
    }
}

impl ConnectionFactory for OpcUaConnectionFactory {
    fn adapter(&self) -> &str {
        ADAPTER_NAME
    }

    fn create(
        &self,
        config: &ConnectionConfig,
        context: Arc<dyn ServiceContext>,
    ) -> Result<Arc<dyn AssetConnection>, AssetConnectionError> {
        Ok(Arc::new(OpcUaAssetConnection::new(
            config.clone(),
            context,
            self.registry.clone(),
            self.settings.invoke_timeout,
        )))
    }
}

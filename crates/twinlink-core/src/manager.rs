//! ---
//! twl_section: "01-core-functionality"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "Asset-connection abstraction and concurrency machinery."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
//! Cross-connection manager.
//!
//! Owns every asset connection in the process, enforces that no
//! reference is served by more than one provider of the same kind
//! across all of them, and supervises connection establishment with
//! silent retry after an initial warning.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::{AssetConnection, ConnectionConfig, ProviderKind};
use crate::context::ServiceContext;
use crate::error::AssetConnectionError;
use crate::provider::{AssetOperationProvider, AssetSubscriptionProvider, AssetValueProvider};
use twinlink_common::CoreSettings;
use twinlink_model::Reference;

/// Creates connections for one adapter kind, keyed by
/// [`ConnectionConfig::adapter`].
pub trait ConnectionFactory: Send + Sync {
    fn adapter(&self) -> &str;
    fn create(
        &self,
        config: &ConnectionConfig,
        context: Arc<dyn ServiceContext>,
    ) -> Result<Arc<dyn AssetConnection>, AssetConnectionError>;
}

struct ManagedConnection {
    config: ConnectionConfig,
    connection: Arc<dyn AssetConnection>,
}

/// Registry and supervisor of all asset connections.
pub struct AssetConnectionManager {
    context: Arc<dyn ServiceContext>,
    settings: CoreSettings,
    factories: Mutex<IndexMap<String, Arc<dyn ConnectionFactory>>>,
    inner: Mutex<Vec<ManagedConnection>>,
    shutdown: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AssetConnectionManager {
    pub fn new(context: Arc<dyn ServiceContext>, settings: CoreSettings) -> Self {
        let (shutdown, _) = broadcast::channel(8);
        Self {
            context,
            settings,
            factories: Mutex::new(IndexMap::new()),
            inner: Mutex::new(Vec::new()),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn register_factory(&self, factory: Arc<dyn ConnectionFactory>) {
        self.factories
            .lock()
            .insert(factory.adapter().to_owned(), factory);
    }

    /// Add a connection configuration.
    ///
    /// If an existing connection already serves the configured
    /// endpoint, the new provider bindings are folded into it instead
    /// of opening a second session. Cross-connection provider
    /// uniqueness is validated before anything is mutated, so a
    /// rejected configuration leaves the manager unchanged.
    pub fn add(&self, config: ConnectionConfig) -> Result<(), AssetConnectionError> {
        let mut inner = self.inner.lock();
        let existing = inner
            .iter()
            .position(|managed| managed.connection.serves(&config));

        let mut prospective: Vec<ConnectionConfig> =
            inner.iter().map(|managed| managed.config.clone()).collect();
        match existing {
            Some(index) => prospective[index].merge_providers(&config),
            None => prospective.push(config.clone()),
        }
        validate_provider_uniqueness(&prospective)?;

        match existing {
            Some(index) => {
                debug!(
                    endpoint = %config.endpoint,
                    providers = config.provider_count(),
                    "binding providers onto existing connection"
                );
                inner[index].connection.merge_configuration(&config)?;
                inner[index].config.merge_providers(&config);
            }
            None => {
                let factory = self
                    .factories
                    .lock()
                    .get(&config.adapter)
                    .cloned()
                    .ok_or_else(|| {
                        AssetConnectionError::invalid_configuration(format!(
                            "unknown adapter (adapter: {})",
                            config.adapter
                        ))
                    })?;
                let connection = factory.create(&config, self.context.clone())?;
                inner.push(ManagedConnection { config, connection });
            }
        }
        Ok(())
    }

    /// Re-check cross-connection provider uniqueness over the current
    /// configuration set.
    pub fn validate(&self) -> Result<(), AssetConnectionError> {
        let inner = self.inner.lock();
        let configs: Vec<ConnectionConfig> =
            inner.iter().map(|managed| managed.config.clone()).collect();
        validate_provider_uniqueness(&configs)
    }

    pub fn connections(&self) -> Vec<Arc<dyn AssetConnection>> {
        self.inner
            .lock()
            .iter()
            .map(|managed| managed.connection.clone())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn value_provider(&self, reference: &Reference) -> Option<Arc<dyn AssetValueProvider>> {
        self.inner
            .lock()
            .iter()
            .find_map(|managed| managed.connection.value_provider(reference))
    }

    pub fn operation_provider(
        &self,
        reference: &Reference,
    ) -> Option<Arc<dyn AssetOperationProvider>> {
        self.inner
            .lock()
            .iter()
            .find_map(|managed| managed.connection.operation_provider(reference))
    }

    pub fn subscription_provider(
        &self,
        reference: &Reference,
    ) -> Option<Arc<dyn AssetSubscriptionProvider>> {
        self.inner
            .lock()
            .iter()
            .find_map(|managed| managed.connection.subscription_provider(reference))
    }

    pub fn has_value_provider(&self, reference: &Reference) -> bool {
        self.value_provider(reference).is_some()
    }

    pub fn has_operation_provider(&self, reference: &Reference) -> bool {
        self.operation_provider(reference).is_some()
    }

    pub fn has_subscription_provider(&self, reference: &Reference) -> bool {
        self.subscription_provider(reference).is_some()
    }

    /// True iff every managed connection is currently connected.
    pub fn is_fully_connected(&self) -> bool {
        self.inner
            .lock()
            .iter()
            .all(|managed| managed.connection.is_connected())
    }

    /// Start connecting every managed connection.
    ///
    /// Each connection gets its own supervision task that retries at
    /// the configured interval until the handshake succeeds or the
    /// manager is stopped. The first failure is logged at warn level,
    /// subsequent attempts at debug, so a dead asset does not flood
    /// the log.
    pub async fn start(&self) {
        let connections = self.connections();
        let retry_interval = self.settings.retry_interval;
        for connection in connections {
            let mut shutdown = self.shutdown.subscribe();
            let handle = tokio::spawn(async move {
                let mut warned = false;
                loop {
                    match connection.connect().await {
                        Ok(()) => {
                            info!(endpoint = %connection.info(), "asset connection established");
                            break;
                        }
                        Err(err) if !warned => {
                            warned = true;
                            warn!(
                                endpoint = %connection.info(),
                                error = %err,
                                retry_ms = retry_interval.as_millis() as u64,
                                "failed to connect to asset, retrying"
                            );
                        }
                        Err(err) => {
                            debug!(endpoint = %connection.info(), error = %err, "retry failed");
                        }
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(retry_interval) => {}
                        _ = shutdown.recv() => break,
                    }
                }
            });
            self.tasks.lock().push(handle);
        }
    }

    /// Stop supervision tasks and disconnect every connection.
    /// Disconnect failures are logged, not surfaced; shutdown always
    /// completes.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(());
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        for connection in self.connections() {
            if let Err(err) = connection.disconnect().await {
                warn!(
                    endpoint = %connection.info(),
                    error = %err,
                    "failed to disconnect asset connection"
                );
            }
        }
    }
}

/// Fail with one aggregated configuration error naming every reference
/// bound to more than one provider of the same kind.
pub(crate) fn validate_provider_uniqueness(
    configs: &[ConnectionConfig],
) -> Result<(), AssetConnectionError> {
    let mut messages = Vec::new();
    for kind in [
        ProviderKind::Value,
        ProviderKind::Operation,
        ProviderKind::Subscription,
    ] {
        let mut counts: IndexMap<Reference, usize> = IndexMap::new();
        for config in configs {
            for reference in config.provider_references(kind) {
                *counts.entry(reference).or_insert(0) += 1;
            }
        }
        for (reference, count) in counts {
            if count > 1 {
                messages.push(format!(
                    "reference {} is bound to {} {} providers",
                    reference, count, kind
                ));
            }
        }
    }
    if messages.is_empty() {
        Ok(())
    } else {
        Err(AssetConnectionError::invalid_configuration(format!(
            "duplicate provider bindings: {}",
            messages.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{
        OperationProviderConfig, SubscriptionProviderConfig, ValueProviderConfig,
    };
    use crate::context::StaticServiceContext;
    use crate::error::AssetConnectionError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use twinlink_model::TypedValue;

    struct ConstValueProvider(TypedValue);

    impl AssetValueProvider for ConstValueProvider {
        fn get(&self) -> Result<TypedValue, AssetConnectionError> {
            Ok(self.0.clone())
        }
        fn set(&self, _value: TypedValue) -> Result<(), AssetConnectionError> {
            Ok(())
        }
    }

    struct StubConnection {
        endpoint: String,
        connected: AtomicBool,
        failures_left: AtomicUsize,
        value_providers: Mutex<IndexMap<Reference, Arc<dyn AssetValueProvider>>>,
    }

    impl StubConnection {
        fn new(config: &ConnectionConfig, failures: usize) -> Self {
            let value_providers = config
                .value_providers
                .keys()
                .map(|reference| {
                    (
                        reference.clone(),
                        Arc::new(ConstValueProvider(TypedValue::Int(1)))
                            as Arc<dyn AssetValueProvider>,
                    )
                })
                .collect();
            Self {
                endpoint: config.endpoint.clone(),
                connected: AtomicBool::new(false),
                failures_left: AtomicUsize::new(failures),
                value_providers: Mutex::new(value_providers),
            }
        }
    }

    #[async_trait]
    impl AssetConnection for StubConnection {
        fn info(&self) -> String {
            self.endpoint.clone()
        }
        fn serves(&self, config: &ConnectionConfig) -> bool {
            config.endpoint == self.endpoint
        }
        async fn connect(&self) -> Result<(), AssetConnectionError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                    left.checked_sub(1)
                })
                .is_ok()
            {
                return Err(AssetConnectionError::connectivity("endpoint unreachable"));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), AssetConnectionError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        fn register_value_provider(
            &self,
            reference: &Reference,
            _config: ValueProviderConfig,
        ) -> Result<(), AssetConnectionError> {
            self.value_providers.lock().insert(
                reference.clone(),
                Arc::new(ConstValueProvider(TypedValue::Int(1))),
            );
            Ok(())
        }
        fn register_operation_provider(
            &self,
            _reference: &Reference,
            _config: OperationProviderConfig,
        ) -> Result<(), AssetConnectionError> {
            Ok(())
        }
        fn register_subscription_provider(
            &self,
            _reference: &Reference,
            _config: SubscriptionProviderConfig,
        ) -> Result<(), AssetConnectionError> {
            Ok(())
        }
        fn unregister_value_provider(
            &self,
            reference: &Reference,
        ) -> Result<(), AssetConnectionError> {
            self.value_providers.lock().shift_remove(reference);
            Ok(())
        }
        fn unregister_operation_provider(
            &self,
            _reference: &Reference,
        ) -> Result<(), AssetConnectionError> {
            Ok(())
        }
        fn unregister_subscription_provider(
            &self,
            _reference: &Reference,
        ) -> Result<(), AssetConnectionError> {
            Ok(())
        }
        fn value_provider(&self, reference: &Reference) -> Option<Arc<dyn AssetValueProvider>> {
            self.value_providers.lock().get(reference).cloned()
        }
        fn operation_provider(
            &self,
            _reference: &Reference,
        ) -> Option<Arc<dyn AssetOperationProvider>> {
            None
        }
        fn subscription_provider(
            &self,
            _reference: &Reference,
        ) -> Option<Arc<dyn AssetSubscriptionProvider>> {
            None
        }
        fn registered_references(&self, kind: ProviderKind) -> Vec<Reference> {
            match kind {
                ProviderKind::Value => self.value_providers.lock().keys().cloned().collect(),
                _ => Vec::new(),
            }
        }
    }

    struct StubFactory {
        created: AtomicUsize,
        connect_failures: usize,
    }

    impl StubFactory {
        fn new(connect_failures: usize) -> Self {
            Self {
                created: AtomicUsize::new(0),
                connect_failures,
            }
        }
    }

    impl ConnectionFactory for StubFactory {
        fn adapter(&self) -> &str {
            "stub"
        }
        fn create(
            &self,
            config: &ConnectionConfig,
            _context: Arc<dyn ServiceContext>,
        ) -> Result<Arc<dyn AssetConnection>, AssetConnectionError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubConnection::new(config, self.connect_failures)))
        }
    }

    fn settings() -> CoreSettings {
        CoreSettings {
            retry_interval: Duration::from_millis(10),
            invoke_timeout: Duration::from_secs(5),
        }
    }

    fn config_with_value_reference(endpoint: &str, reference: &str) -> ConnectionConfig {
        let mut config = ConnectionConfig {
            adapter: "stub".to_owned(),
            endpoint: endpoint.to_owned(),
            username: None,
            password: None,
            value_providers: IndexMap::new(),
            operation_providers: IndexMap::new(),
            subscription_providers: IndexMap::new(),
        };
        config.value_providers.insert(
            Reference::from(reference),
            ValueProviderConfig {
                address: "addr".to_owned(),
                array_index: None,
            },
        );
        config
    }

    fn manager_with_stub_factory(factory: Arc<StubFactory>) -> AssetConnectionManager {
        let manager =
            AssetConnectionManager::new(Arc::new(StaticServiceContext::new()), settings());
        manager.register_factory(factory);
        manager
    }

    #[test]
    fn duplicate_value_reference_across_connections_is_rejected() {
        let manager = manager_with_stub_factory(Arc::new(StubFactory::new(0)));
        manager
            .add(config_with_value_reference("stub://a", "shared/ref"))
            .unwrap();
        let err = manager
            .add(config_with_value_reference("stub://b", "shared/ref"))
            .unwrap_err();
        assert!(matches!(err, AssetConnectionError::InvalidConfiguration(_)));
        let message = err.to_string();
        assert!(message.contains("shared/ref"));
        assert!(message.contains('2'));
        // The rejected configuration must not have been committed.
        assert_eq!(manager.connection_count(), 1);
        manager.validate().unwrap();
    }

    #[test]
    fn equivalent_connection_is_reused_instead_of_recreated() {
        let factory = Arc::new(StubFactory::new(0));
        let manager = manager_with_stub_factory(factory.clone());
        manager
            .add(config_with_value_reference("stub://a", "ref/one"))
            .unwrap();
        manager
            .add(config_with_value_reference("stub://a", "ref/two"))
            .unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(manager.connection_count(), 1);
        // The folded-in binding is live on the shared connection.
        assert!(manager.has_value_provider(&Reference::from("ref/two")));
    }

    #[test]
    fn unknown_adapter_is_a_configuration_error() {
        let manager =
            AssetConnectionManager::new(Arc::new(StaticServiceContext::new()), settings());
        let err = manager
            .add(config_with_value_reference("stub://a", "ref/one"))
            .unwrap_err();
        assert!(err.to_string().contains("unknown adapter"));
    }

    #[test]
    fn provider_lookup_answers_absence_without_error() {
        let manager = manager_with_stub_factory(Arc::new(StubFactory::new(0)));
        manager
            .add(config_with_value_reference("stub://a", "ref/one"))
            .unwrap();
        assert!(manager.has_value_provider(&Reference::from("ref/one")));
        assert!(!manager.has_value_provider(&Reference::from("ref/other")));
        assert!(!manager.has_operation_provider(&Reference::from("ref/one")));
        assert!(manager
            .value_provider(&Reference::from("ref/other"))
            .is_none());
    }

    #[tokio::test]
    async fn start_retries_until_the_connection_succeeds() {
        let manager = manager_with_stub_factory(Arc::new(StubFactory::new(2)));
        manager
            .add(config_with_value_reference("stub://flaky", "ref/one"))
            .unwrap();
        assert!(!manager.is_fully_connected());

        manager.start().await;
        for _ in 0..200 {
            if manager.is_fully_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(manager.is_fully_connected());

        manager.stop().await;
        assert!(!manager.is_fully_connected());
    }
}

//! ---
//! twl_section: "01-core-functionality"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "Asset-connection abstraction and concurrency machinery."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
//! Core of the TwinLink connectivity layer.
//!
//! This crate defines the capability contracts protocol adapters
//! implement per bound reference (value, operation, subscription), the
//! sync-over-async operation-invocation bridge, the subscription
//! multiplexer that shares one protocol subscription among many
//! listeners, the array/path addressing scheme, and the connection
//! lifecycle plus the cross-connection manager that owns it all.

pub mod arrayindex;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod manager;
pub mod multiplexer;
pub mod provider;

pub use arrayindex::{
    get_element, navigate, set_element, unwrap_value, wrap_value, ArrayIndex, ArrayIndexError,
};
pub use config::AppConfig;
pub use connection::{
    ArgumentValidationMode, AssetConnection, ConnectionConfig, OperationProviderConfig,
    ProviderKind, SubscriptionProviderConfig, ValueProviderConfig,
};
pub use context::{resolve_property_datatype, ElementInfo, ServiceContext, StaticServiceContext};
pub use error::AssetConnectionError;
pub use manager::{AssetConnectionManager, ConnectionFactory};
pub use multiplexer::{NotificationSink, SubscriptionMultiplexer, SubscriptionTransport};
pub use provider::{
    AssetOperationProvider, AssetSubscriptionProvider, AssetValueProvider, InvocationCallback,
    InvocationResult, ListenerHandle, NewDataListener,
};

//! ---
//! twl_section: "05-connectivity-adapters"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "OPC UA asset connection adapter."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
//! OPC UA adapter.
//!
//! Speaks to in-process OPC UA endpoints registered in a
//! [`ServerRegistry`]: node reads/writes, method calls, and monitored
//! items, surfaced through the core's provider contracts. Endpoint
//! addresses use the `opc.tcp://` scheme; node addresses are OPC UA
//! node id strings such as `ns=2;s=Press.Temperature`.

pub mod address_space;
pub mod client;
pub mod connection;
pub mod provider;
pub mod simulation;

pub use address_space::{AddressSpace, MethodHandler, ServerRegistry, StatusCode};
pub use client::UaClient;
pub use connection::{OpcUaAssetConnection, OpcUaConnectionFactory, ADAPTER_NAME};
pub use provider::{OpcUaOperationProvider, OpcUaSubscriptionProvider, OpcUaValueProvider};
pub use simulation::OpcUaSimulationConfig;

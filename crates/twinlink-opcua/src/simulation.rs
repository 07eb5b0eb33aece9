//! ---
//! twl_section: "05-connectivity-adapters"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "OPC UA asset connection adapter."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
//! Configuration-driven seeding of simulated endpoints.
//!
//! Read from the `opcua` adapter section of the application
//! configuration; each declared server becomes an in-process address
//! space in the registry. Method nodes carry code, so they are seeded
//! programmatically, not from configuration.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address_space::{AddressSpace, ServerRegistry};

/// Initial state of one simulated variable node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableSeed {
    pub initial: serde_json::Value,
    /// Array dimensionality of the node, 0 for scalars.
    #[serde(default)]
    pub rank: usize,
}

/// Variable nodes of one simulated endpoint, keyed by node id.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ServerSeed {
    #[serde(default)]
    pub variables: IndexMap<String, VariableSeed>,
}

/// Simulated endpoints, keyed by endpoint URL.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct OpcUaSimulationConfig {
    #[serde(default)]
    pub servers: IndexMap<String, ServerSeed>,
}

impl OpcUaSimulationConfig {
    /// Register every declared endpoint in `registry`.
    pub fn apply(&self, registry: &ServerRegistry) {
        for (endpoint, seed) in &self.servers {
            let space = Arc::new(AddressSpace::new());
            for (node_id, variable) in &seed.variables {
                space.insert_variable(node_id.clone(), variable.initial.clone(), variable.rank);
            }
            debug!(
                endpoint = %endpoint,
                variables = seed.variables.len(),
                "registered simulated opc ua endpoint"
            );
            registry.register(endpoint.clone(), space);
        }
    }
}

//! ---
//! twl_section: "05-connectivity-adapters"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "OPC UA asset connection adapter."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
//! Client session against one OPC UA endpoint.
//!
//! Wraps an [`AddressSpace`] resolved from the [`ServerRegistry`] and
//! translates bad status codes into adapter-agnostic connectivity
//! errors. The endpoint is re-resolved on every `connect` attempt, so
//! an endpoint that comes up later is reached by the retry loop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::address_space::{AddressSpace, MethodSignature, MonitorCallback, ServerRegistry, StatusCode};
use twinlink_core::AssetConnectionError;

pub struct UaClient {
    endpoint: String,
    registry: ServerRegistry,
    session: Mutex<Option<Arc<AddressSpace>>>,
}

impl UaClient {
    pub fn new(endpoint: impl Into<String>, registry: ServerRegistry) -> Self {
        Self {
            endpoint: endpoint.into(),
            registry,
            session: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn connect(&self) -> Result<(), AssetConnectionError> {
        let space = self.registry.resolve(&self.endpoint).ok_or_else(|| {
            AssetConnectionError::connectivity(format!(
                "endpoint not reachable (endpoint: {})",
                self.endpoint
            ))
        })?;
        debug!(endpoint = %self.endpoint, "opc ua session established");
        *self.session.lock() = Some(space);
        Ok(())
    }

    pub fn disconnect(&self) {
        *self.session.lock() = None;
    }

    pub fn is_connected(&self) -> bool {
        self.session.lock().is_some()
    }

    fn session(&self) -> Result<Arc<AddressSpace>, AssetConnectionError> {
        self.session.lock().clone().ok_or_else(|| {
            AssetConnectionError::connectivity(format!(
                "no active session (endpoint: {})",
                self.endpoint
            ))
        })
    }

    fn bad_status(&self, operation: &str, node_id: &str, status: StatusCode) -> AssetConnectionError {
        AssetConnectionError::connectivity(format!(
            "{} failed with bad status code (node: {}, status: {})",
            operation, node_id, status
        ))
    }

    pub fn read_value(&self, node_id: &str) -> Result<Value, AssetConnectionError> {
        self.session()?
            .read(node_id)
            .map_err(|status| self.bad_status("read", node_id, status))
    }

    pub fn write_value(&self, node_id: &str, value: Value) -> Result<(), AssetConnectionError> {
        self.session()?
            .write(node_id, value)
            .map_err(|status| self.bad_status("write", node_id, status))
    }

    pub fn variable_rank(&self, node_id: &str) -> Result<usize, AssetConnectionError> {
        self.session()?
            .variable_rank(node_id)
            .map_err(|status| self.bad_status("rank lookup", node_id, status))
    }

    pub fn method_signature(&self, node_id: &str) -> Result<MethodSignature, AssetConnectionError> {
        self.session()?
            .method_signature(node_id)
            .map_err(|status| self.bad_status("method lookup", node_id, status))
    }

    pub fn call_method(
        &self,
        node_id: &str,
        inputs: &[Value],
    ) -> Result<Vec<Value>, AssetConnectionError> {
        self.session()?
            .call(node_id, inputs)
            .map_err(|status| self.bad_status("method call", node_id, status))
    }

    /// Create a monitored item for `node_id`. The simulated transport
    /// samples on write, so `sampling_interval` is accepted for API
    /// parity and logged only.
    pub fn create_monitored_item(
        &self,
        node_id: &str,
        sampling_interval: Option<Duration>,
        callback: MonitorCallback,
    ) -> Result<u64, AssetConnectionError> {
        if let Some(interval) = sampling_interval {
            debug!(
                endpoint = %self.endpoint,
                node = node_id,
                sampling_ms = interval.as_millis() as u64,
                "sampling interval requested"
            );
        }
        self.session()?
            .create_monitor(node_id, callback)
            .map_err(|status| self.bad_status("monitored item creation", node_id, status))
    }

    pub fn delete_monitored_item(&self, id: u64) -> Result<(), AssetConnectionError> {
        self.session()?.delete_monitor(id);
        Ok(())
    }
}

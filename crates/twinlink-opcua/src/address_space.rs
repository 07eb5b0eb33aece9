//! ---
//! twl_section: "05-connectivity-adapters"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "OPC UA asset connection adapter."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
//! In-process OPC UA server surface.
//!
//! An [`AddressSpace`] holds variable and method nodes and the
//! monitored items observing them; a [`ServerRegistry`] maps endpoint
//! URLs to address spaces so clients resolve endpoints the same way on
//! every connection attempt.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;

/// Wire-level result codes, modelled on the OPC UA status code names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StatusCode {
    #[error("Good")]
    Good,
    #[error("BadNodeIdUnknown")]
    BadNodeIdUnknown,
    #[error("BadTypeMismatch")]
    BadTypeMismatch,
    #[error("BadMethodInvalid")]
    BadMethodInvalid,
    #[error("BadArgumentsMissing")]
    BadArgumentsMissing,
    #[error("BadInternalError")]
    BadInternalError,
}

/// Server-side implementation of one method node.
pub type MethodHandler = Arc<dyn Fn(&[Value]) -> Result<Vec<Value>, StatusCode> + Send + Sync>;

/// Callback fired with the new node value whenever a monitored
/// variable is written.
pub type MonitorCallback = Arc<dyn Fn(Value) + Send + Sync>;

struct VariableNode {
    value: Value,
    /// Array dimensionality: 0 for scalars, 1 for arrays, 2 for
    /// matrices.
    rank: usize,
}

#[derive(Clone)]
pub struct MethodSignature {
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,
}

struct MethodNode {
    signature: MethodSignature,
    handler: MethodHandler,
}

struct Monitor {
    node_id: String,
    callback: MonitorCallback,
}

#[derive(Default)]
struct SpaceInner {
    variables: IndexMap<String, VariableNode>,
    methods: IndexMap<String, MethodNode>,
    monitors: IndexMap<u64, Monitor>,
    next_monitor: u64,
}

/// Node store of one endpoint.
#[derive(Default)]
pub struct AddressSpace {
    inner: Mutex<SpaceInner>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_variable(&self, node_id: impl Into<String>, initial: Value, rank: usize) {
        self.inner
            .lock()
            .variables
            .insert(node_id.into(), VariableNode {
                value: initial,
                rank,
            });
    }

    pub fn insert_method(
        &self,
        node_id: impl Into<String>,
        input_names: Vec<String>,
        output_names: Vec<String>,
        handler: MethodHandler,
    ) {
        self.inner.lock().methods.insert(node_id.into(), MethodNode {
            signature: MethodSignature {
                input_names,
                output_names,
            },
            handler,
        });
    }

    pub fn read(&self, node_id: &str) -> Result<Value, StatusCode> {
        let inner = self.inner.lock();
        inner
            .variables
            .get(node_id)
            .map(|node| node.value.clone())
            .ok_or(StatusCode::BadNodeIdUnknown)
    }

    /// Write a variable node and fire every monitor observing it.
    ///
    /// Writes must preserve the array/scalar shape of the node;
    /// changing it is a type mismatch.
    pub fn write(&self, node_id: &str, value: Value) -> Result<(), StatusCode> {
        let callbacks: Vec<(MonitorCallback, Value)> = {
            let mut inner = self.inner.lock();
            let node = inner
                .variables
                .get_mut(node_id)
                .ok_or(StatusCode::BadNodeIdUnknown)?;
            if node.value.is_array() != value.is_array() {
                return Err(StatusCode::BadTypeMismatch);
            }
            node.value = value.clone();
            inner
                .monitors
                .values()
                .filter(|monitor| monitor.node_id == node_id)
                .map(|monitor| (monitor.callback.clone(), value.clone()))
                .collect()
        };
        for (callback, value) in callbacks {
            callback(value);
        }
        Ok(())
    }

    pub fn variable_rank(&self, node_id: &str) -> Result<usize, StatusCode> {
        self.inner
            .lock()
            .variables
            .get(node_id)
            .map(|node| node.rank)
            .ok_or(StatusCode::BadNodeIdUnknown)
    }

    pub fn method_signature(&self, node_id: &str) -> Result<MethodSignature, StatusCode> {
        self.inner
            .lock()
            .methods
            .get(node_id)
            .map(|node| node.signature.clone())
            .ok_or(StatusCode::BadMethodInvalid)
    }

    pub fn call(&self, node_id: &str, inputs: &[Value]) -> Result<Vec<Value>, StatusCode> {
        let (expected_inputs, handler) = {
            let inner = self.inner.lock();
            let node = inner
                .methods
                .get(node_id)
                .ok_or(StatusCode::BadMethodInvalid)?;
            (node.signature.input_names.len(), node.handler.clone())
        };
        if inputs.len() < expected_inputs {
            return Err(StatusCode::BadArgumentsMissing);
        }
        handler(inputs)
    }

    /// Register a monitored item for a variable node. The callback is
    /// fired on every subsequent write to the node.
    pub fn create_monitor(
        &self,
        node_id: &str,
        callback: MonitorCallback,
    ) -> Result<u64, StatusCode> {
        let mut inner = self.inner.lock();
        if !inner.variables.contains_key(node_id) {
            return Err(StatusCode::BadNodeIdUnknown);
        }
        inner.next_monitor += 1;
        let id = inner.next_monitor;
        inner.monitors.insert(id, Monitor {
            node_id: node_id.to_owned(),
            callback,
        });
        Ok(id)
    }

    pub fn delete_monitor(&self, id: u64) {
        self.inner.lock().monitors.shift_remove(&id);
    }

    pub fn monitor_count(&self) -> usize {
        self.inner.lock().monitors.len()
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("AddressSpace")
            .field("variables", &inner.variables.len())
            .field("methods", &inner.methods.len())
            .field("monitors", &inner.monitors.len())
            .finish()
    }
}

/// Maps endpoint URLs to the address spaces serving them.
#[derive(Default, Clone)]
pub struct ServerRegistry {
    inner: Arc<Mutex<IndexMap<String, Arc<AddressSpace>>>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, endpoint: impl Into<String>, space: Arc<AddressSpace>) {
        self.inner.lock().insert(endpoint.into(), space);
    }

    pub fn resolve(&self, endpoint: &str) -> Option<Arc<AddressSpace>> {
        self.inner.lock().get(endpoint).cloned()
    }

    pub fn deregister(&self, endpoint: &str) {
        self.inner.lock().shift_remove(endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_write_and_status_codes() {
        let space = AddressSpace::new();
        space.insert_variable("ns=2;s=T", json!(20.0), 0);

        assert_eq!(space.read("ns=2;s=T").unwrap(), json!(20.0));
        assert_eq!(space.read("ns=2;s=X").unwrap_err(), StatusCode::BadNodeIdUnknown);

        space.write("ns=2;s=T", json!(21.5)).unwrap();
        assert_eq!(space.read("ns=2;s=T").unwrap(), json!(21.5));
        assert_eq!(
            space.write("ns=2;s=T", json!([1, 2])).unwrap_err(),
            StatusCode::BadTypeMismatch
        );
    }

    #[test]
    fn monitors_fire_on_write_and_stop_after_delete() {
        let space = AddressSpace::new();
        space.insert_variable("ns=2;s=T", json!(0.0), 0);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let callback: MonitorCallback = {
            let seen = seen.clone();
            Arc::new(move |value| seen.lock().push(value))
        };
        let id = space.create_monitor("ns=2;s=T", callback).unwrap();

        space.write("ns=2;s=T", json!(1.0)).unwrap();
        space.delete_monitor(id);
        space.write("ns=2;s=T", json!(2.0)).unwrap();

        assert_eq!(seen.lock().as_slice(), &[json!(1.0)]);
    }

    #[test]
    fn method_call_enforces_argument_count() {
        let space = AddressSpace::new();
        space.insert_method(
            "ns=2;s=Add",
            vec!["a".to_owned(), "b".to_owned()],
            vec!["sum".to_owned()],
            Arc::new(|inputs: &[Value]| {
                let a = inputs[0].as_i64().ok_or(StatusCode::BadTypeMismatch)?;
                let b = inputs[1].as_i64().ok_or(StatusCode::BadTypeMismatch)?;
                Ok(vec![json!(a + b)])
            }),
        );

        assert_eq!(space.call("ns=2;s=Add", &[json!(2), json!(3)]).unwrap(), vec![json!(5)]);
        assert_eq!(
            space.call("ns=2;s=Add", &[json!(2)]).unwrap_err(),
            StatusCode::BadArgumentsMissing
        );
        assert_eq!(
            space.call("ns=2;s=Missing", &[]).unwrap_err(),
            StatusCode::BadMethodInvalid
        );
    }

    #[test]
    fn registry_resolves_registered_endpoints() {
        let registry = ServerRegistry::new();
        assert!(registry.resolve("opc.tcp://plc-7:4840").is_none());
        registry.register("opc.tcp://plc-7:4840", Arc::new(AddressSpace::new()));
        assert!(registry.resolve("opc.tcp://plc-7:4840").is_some());
    }
}

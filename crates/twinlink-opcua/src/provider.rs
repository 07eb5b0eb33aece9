//! ---
//! twl_section: "05-connectivity-adapters"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "OPC UA asset connection adapter."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
//! Provider implementations backed by a [`UaClient`] session.
//!
//! Value and subscription providers support array projection: the
//! adapter always reads and writes the whole node value on the wire
//! and the configured index expression selects the slot presented to
//! the caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::address_space::MonitorCallback;
use crate::client::UaClient;
use twinlink_core::connection::{
    ArgumentValidationMode, OperationProviderConfig, SubscriptionProviderConfig,
    ValueProviderConfig,
};
use twinlink_core::context::{resolve_property_datatype, ServiceContext};
use twinlink_core::multiplexer::{NotificationSink, SubscriptionMultiplexer, SubscriptionTransport};
use twinlink_core::provider::{
    AssetOperationProvider, AssetSubscriptionProvider, AssetValueProvider, InvocationCallback,
    InvocationResult, ListenerHandle, NewDataListener,
};
use twinlink_core::{unwrap_value, wrap_value, ArrayIndex, AssetConnectionError};
use twinlink_model::{from_wire, to_wire, Datatype, ElementKind, OperationVariable, Reference, TypedValue};

fn parse_index(expression: Option<&str>) -> Result<ArrayIndex, AssetConnectionError> {
    match expression {
        Some(expression) => Ok(ArrayIndex::parse(expression)?),
        None => Ok(ArrayIndex::empty()),
    }
}

/// The index must not address deeper than the variable's declared
/// dimensionality.
fn validate_rank(
    client: &UaClient,
    node_id: &str,
    index: &ArrayIndex,
) -> Result<(), AssetConnectionError> {
    if index.is_empty() {
        return Ok(());
    }
    let rank = client.variable_rank(node_id)?;
    if index.len() > rank {
        return Err(AssetConnectionError::invalid_configuration(format!(
            "array index exceeds variable dimensionality (node: {}, index: {}, rank: {})",
            node_id, index, rank
        )));
    }
    Ok(())
}

/// Reads and writes one node, optionally projected to one array slot.
pub struct OpcUaValueProvider {
    client: Arc<UaClient>,
    node_id: String,
    datatype: Datatype,
    index: ArrayIndex,
}

impl OpcUaValueProvider {
    pub fn new(
        client: Arc<UaClient>,
        reference: &Reference,
        config: &ValueProviderConfig,
        context: &dyn ServiceContext,
    ) -> Result<Self, AssetConnectionError> {
        let datatype = resolve_property_datatype(context, reference)?;
        let index = parse_index(config.array_index.as_deref())?;
        validate_rank(&client, &config.address, &index)?;
        Ok(Self {
            client,
            node_id: config.address.clone(),
            datatype,
            index,
        })
    }
}

impl fmt::Debug for OpcUaValueProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcUaValueProvider")
            .field("node_id", &self.node_id)
            .field("datatype", &self.datatype)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl AssetValueProvider for OpcUaValueProvider {
    fn get(&self) -> Result<TypedValue, AssetConnectionError> {
        let raw = self.client.read_value(&self.node_id)?;
        let projected = unwrap_value(&raw, &self.index)?;
        Ok(from_wire(&projected, self.datatype)?)
    }

    fn set(&self, value: TypedValue) -> Result<(), AssetConnectionError> {
        let wire = to_wire(&value);
        let full = if self.index.is_empty() {
            wire
        } else {
            // Read-modify-write of the whole compound value, leaving
            // all other slots as the asset last reported them.
            let container = self.client.read_value(&self.node_id)?;
            wrap_value(container, wire, &self.index)?
        };
        self.client.write_value(&self.node_id, full)
    }
}

/// Invokes one method node.
///
/// The method's wire arguments are positional; they are matched to the
/// caller's named variables through the argument names the server
/// declares for the node.
pub struct OpcUaOperationProvider {
    client: Arc<UaClient>,
    node_id: String,
    output_variables: Vec<OperationVariable>,
    invoke_timeout: Duration,
    input_validation: ArgumentValidationMode,
    inout_validation: ArgumentValidationMode,
    output_validation: ArgumentValidationMode,
}

impl fmt::Debug for OpcUaOperationProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcUaOperationProvider")
            .field("node_id", &self.node_id)
            .field("invoke_timeout", &self.invoke_timeout)
            .finish_non_exhaustive()
    }
}

impl OpcUaOperationProvider {
    pub fn new(
        client: Arc<UaClient>,
        reference: &Reference,
        config: &OperationProviderConfig,
        context: &dyn ServiceContext,
        default_invoke_timeout: Duration,
    ) -> Result<Self, AssetConnectionError> {
        let type_info = context.type_info(reference).ok_or_else(|| {
            AssetConnectionError::invalid_configuration(format!(
                "could not resolve type information (reference: {})",
                reference
            ))
        })?;
        if type_info.kind != ElementKind::Operation {
            return Err(AssetConnectionError::invalid_configuration(format!(
                "unsupported element kind (reference: {}, kind: {:?}, expected: Operation)",
                reference, type_info.kind
            )));
        }
        let output_variables = context
            .operation_output_variables(reference)
            .unwrap_or_default();
        Ok(Self {
            client,
            node_id: config.address.clone(),
            output_variables,
            invoke_timeout: config.invoke_timeout.unwrap_or(default_invoke_timeout),
            input_validation: config.input_validation,
            inout_validation: config.inout_validation,
            output_validation: config.output_validation,
        })
    }

    fn execute(
        &self,
        input: Vec<OperationVariable>,
        inout: Vec<OperationVariable>,
    ) -> Result<(Vec<OperationVariable>, Vec<OperationVariable>), AssetConnectionError> {
        let signature = self.client.method_signature(&self.node_id)?;

        let mut wire_inputs = Vec::with_capacity(signature.input_names.len());
        for name in &signature.input_names {
            let variable = input
                .iter()
                .chain(inout.iter())
                .find(|candidate| candidate.id_short == *name);
            // Inout arguments show up on both sides of the signature.
            let mode = if signature.output_names.contains(name) {
                self.inout_validation
            } else {
                self.input_validation
            };
            match (variable, mode) {
                (Some(variable), _) => wire_inputs.push(to_wire(&variable.value)),
                (None, ArgumentValidationMode::Require) => {
                    return Err(AssetConnectionError::contract_violation(format!(
                        "missing argument for method invocation (node: {}, argument: {})",
                        self.node_id, name
                    )))
                }
                (None, ArgumentValidationMode::None) => wire_inputs.push(Value::Null),
            }
        }

        let wire_outputs = self.client.call_method(&self.node_id, &wire_inputs)?;
        let outputs_by_name: IndexMap<&str, &Value> = signature
            .output_names
            .iter()
            .map(String::as_str)
            .zip(wire_outputs.iter())
            .collect();

        // Shape the result along the declared output parameters; the
        // declared datatype drives the wire conversion.
        let mut output = Vec::with_capacity(self.output_variables.len());
        for declared in &self.output_variables {
            let value = match outputs_by_name.get(declared.id_short.as_str()) {
                Some(raw) => from_wire(raw, declared.value.datatype())?,
                None if self.output_validation == ArgumentValidationMode::Require => {
                    return Err(AssetConnectionError::contract_violation(format!(
                        "no value returned for declared output (node: {}, output: {})",
                        self.node_id, declared.id_short
                    )))
                }
                None => declared.value.clone(),
            };
            output.push(OperationVariable::new(declared.id_short.clone(), value));
        }

        let mut returned_inout = Vec::with_capacity(inout.len());
        for variable in inout {
            let value = match outputs_by_name.get(variable.id_short.as_str()) {
                Some(raw) => from_wire(raw, variable.value.datatype())?,
                None => variable.value.clone(),
            };
            returned_inout.push(OperationVariable::new(variable.id_short, value));
        }
        Ok((output, returned_inout))
    }
}

impl AssetOperationProvider for OpcUaOperationProvider {
    fn invoke_async(
        &self,
        input: Vec<OperationVariable>,
        inout: Vec<OperationVariable>,
        callback: InvocationCallback,
    ) -> Result<(), AssetConnectionError> {
        // Method calls on the client are synchronous, so the callback
        // fires before this returns.
        let result = match self.execute(input, inout) {
            Ok((output, inout)) => InvocationResult::Success { output, inout },
            Err(err) => InvocationResult::Failure(err),
        };
        callback(result);
        Ok(())
    }

    fn invoke_timeout(&self) -> Duration {
        self.invoke_timeout
    }

    fn inout_validation(&self) -> ArgumentValidationMode {
        self.inout_validation
    }
}

/// Wire subscription for one node, created and destroyed by the
/// multiplexer boundary transitions.
pub(crate) struct OpcUaSubscriptionTransport {
    client: Arc<UaClient>,
    node_id: String,
    index: ArrayIndex,
    sampling_interval: Option<Duration>,
    monitor: Mutex<Option<u64>>,
}

impl SubscriptionTransport for OpcUaSubscriptionTransport {
    fn open(&self, sink: NotificationSink) -> Result<(), AssetConnectionError> {
        let index = self.index.clone();
        let node_id = self.node_id.clone();
        let callback: MonitorCallback = Arc::new(move |raw: Value| {
            match unwrap_value(&raw, &index) {
                Ok(projected) => sink(projected),
                Err(err) => warn!(
                    node = %node_id,
                    error = %err,
                    "dropping notification, array projection failed"
                ),
            }
        });
        let id =
            self.client
                .create_monitored_item(&self.node_id, self.sampling_interval, callback)?;
        *self.monitor.lock() = Some(id);
        Ok(())
    }

    fn close(&self) -> Result<(), AssetConnectionError> {
        if let Some(id) = self.monitor.lock().take() {
            self.client.delete_monitored_item(id)?;
        }
        Ok(())
    }
}

/// Push notifications for one node, shared among listeners.
pub struct OpcUaSubscriptionProvider {
    multiplexer: SubscriptionMultiplexer,
    transport: Arc<OpcUaSubscriptionTransport>,
}

impl OpcUaSubscriptionProvider {
    pub fn new(
        client: Arc<UaClient>,
        reference: Reference,
        config: &SubscriptionProviderConfig,
        context: Arc<dyn ServiceContext>,
    ) -> Result<Self, AssetConnectionError> {
        let index = parse_index(config.array_index.as_deref())?;
        validate_rank(&client, &config.address, &index)?;
        let transport = Arc::new(OpcUaSubscriptionTransport {
            client,
            node_id: config.address.clone(),
            index,
            sampling_interval: config.sampling_interval,
            monitor: Mutex::new(None),
        });
        let multiplexer = SubscriptionMultiplexer::new(reference, context, transport.clone());
        Ok(Self {
            multiplexer,
            transport,
        })
    }

    pub fn is_active(&self) -> bool {
        self.multiplexer.is_active()
    }

    /// Tear down the wire subscription regardless of remaining
    /// listeners, used when the provider is unregistered or the
    /// connection goes down.
    pub(crate) fn shutdown(&self) {
        if let Err(err) = self.transport.close() {
            warn!(
                reference = %self.multiplexer.reference(),
                error = %err,
                "failed to close subscription during shutdown"
            );
        }
    }
}

impl AssetSubscriptionProvider for OpcUaSubscriptionProvider {
    fn add_listener(
        &self,
        listener: NewDataListener,
    ) -> Result<ListenerHandle, AssetConnectionError> {
        self.multiplexer.add_listener(listener)
    }

    fn remove_listener(&self, handle: ListenerHandle) -> Result<(), AssetConnectionError> {
        self.multiplexer.remove_listener(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_space::{AddressSpace, ServerRegistry, StatusCode};
    use serde_json::json;
    use twinlink_core::context::{ElementInfo, StaticServiceContext};

    fn connected_client(space: Arc<AddressSpace>) -> Arc<UaClient> {
        let registry = ServerRegistry::new();
        registry.register("opc.tcp://sim:4840", space);
        let client = Arc::new(UaClient::new("opc.tcp://sim:4840", registry));
        client.connect().unwrap();
        client
    }

    fn operation_config(address: &str) -> OperationProviderConfig {
        OperationProviderConfig {
            address: address.to_owned(),
            invoke_timeout: None,
            input_validation: ArgumentValidationMode::default(),
            inout_validation: ArgumentValidationMode::default(),
            output_validation: ArgumentValidationMode::default(),
        }
    }

    #[test]
    fn value_provider_projects_an_array_slot_for_reads_and_writes() {
        let space = Arc::new(AddressSpace::new());
        space.insert_variable("ns=2;s=Forces", json!([[1.0, 2.0], [3.0, 4.0]]), 2);
        let client = connected_client(space.clone());
        let context = StaticServiceContext::new()
            .with_element("press/force", ElementInfo::property(Datatype::Double));

        let provider = OpcUaValueProvider::new(
            client,
            &Reference::from("press/force"),
            &ValueProviderConfig {
                address: "ns=2;s=Forces".to_owned(),
                array_index: Some("[1][0]".to_owned()),
            },
            &context,
        )
        .unwrap();

        assert_eq!(provider.get().unwrap(), TypedValue::Double(3.0));

        provider.set(TypedValue::Double(9.5)).unwrap();
        assert_eq!(
            space.read("ns=2;s=Forces").unwrap(),
            json!([[1.0, 2.0], [9.5, 4.0]])
        );
        assert_eq!(provider.get().unwrap(), TypedValue::Double(9.5));
    }

    #[test]
    fn value_provider_rejects_index_deeper_than_the_variable_rank() {
        let space = Arc::new(AddressSpace::new());
        space.insert_variable("ns=2;s=Vector", json!([1.0, 2.0]), 1);
        let client = connected_client(space);
        let context = StaticServiceContext::new()
            .with_element("press/x", ElementInfo::property(Datatype::Double));

        let err = OpcUaValueProvider::new(
            client,
            &Reference::from("press/x"),
            &ValueProviderConfig {
                address: "ns=2;s=Vector".to_owned(),
                array_index: Some("[0][0]".to_owned()),
            },
            &context,
        )
        .unwrap_err();
        assert!(matches!(err, AssetConnectionError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("dimensionality"));
    }

    #[test]
    fn operation_provider_maps_named_variables_to_positional_arguments() {
        let space = Arc::new(AddressSpace::new());
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
        let client = connected_client(space);
        let context = StaticServiceContext::new().with_element(
            "plc/add",
            ElementInfo::operation(vec![OperationVariable::declared("sum", Datatype::Int)]),
        );

        let provider = OpcUaOperationProvider::new(
            client,
            &Reference::from("plc/add"),
            &operation_config("ns=2;s=Add"),
            &context,
            Duration::from_secs(5),
        )
        .unwrap();

        let input = vec![
            OperationVariable::new("b", TypedValue::Int(4)),
            OperationVariable::new("a", TypedValue::Int(38)),
        ];
        let output = provider.invoke(input, &mut Vec::new()).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].id_short, "sum");
        assert_eq!(output[0].value, TypedValue::Int(42));
    }

    #[test]
    fn operation_provider_updates_inout_arguments_from_echoed_outputs() {
        let space = Arc::new(AddressSpace::new());
        space.insert_method(
            "ns=2;s=Step",
            vec!["counter".to_owned()],
            vec!["counter".to_owned()],
            Arc::new(|inputs: &[Value]| {
                let current = inputs[0].as_i64().ok_or(StatusCode::BadTypeMismatch)?;
                Ok(vec![json!(current + 1)])
            }),
        );
        let client = connected_client(space);
        let context = StaticServiceContext::new()
            .with_element("plc/step", ElementInfo::operation(Vec::new()));

        let provider = OpcUaOperationProvider::new(
            client,
            &Reference::from("plc/step"),
            &operation_config("ns=2;s=Step"),
            &context,
            Duration::from_secs(5),
        )
        .unwrap();

        let mut inout = vec![OperationVariable::new("counter", TypedValue::Int(7))];
        provider.invoke(Vec::new(), &mut inout).unwrap();
        assert_eq!(inout[0].value, TypedValue::Int(8));
    }

    #[test]
    fn operation_provider_rejects_missing_arguments_by_default() {
        let space = Arc::new(AddressSpace::new());
        space.insert_method(
            "ns=2;s=Add",
            vec!["a".to_owned(), "b".to_owned()],
            vec!["sum".to_owned()],
            Arc::new(|_inputs: &[Value]| Ok(vec![json!(0)])),
        );
        let client = connected_client(space);
        let context = StaticServiceContext::new().with_element(
            "plc/add",
            ElementInfo::operation(vec![OperationVariable::declared("sum", Datatype::Int)]),
        );

        let provider = OpcUaOperationProvider::new(
            client,
            &Reference::from("plc/add"),
            &operation_config("ns=2;s=Add"),
            &context,
            Duration::from_secs(5),
        )
        .unwrap();

        let input = vec![OperationVariable::new("a", TypedValue::Int(1))];
        let err = provider.invoke(input, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, AssetConnectionError::ContractViolation(_)));
        assert!(err.to_string().contains("argument: b"));
    }

    #[test]
    fn unchecked_input_mode_passes_missing_arguments_as_null() {
        let space = Arc::new(AddressSpace::new());
        space.insert_method(
            "ns=2;s=Add",
            vec!["a".to_owned(), "b".to_owned()],
            vec!["sum".to_owned()],
            Arc::new(|inputs: &[Value]| {
                let a = inputs[0].as_i64().ok_or(StatusCode::BadTypeMismatch)?;
                let b = inputs[1].as_i64().unwrap_or(0);
                Ok(vec![json!(a + b)])
            }),
        );
        let client = connected_client(space);
        let context = StaticServiceContext::new().with_element(
            "plc/add",
            ElementInfo::operation(vec![OperationVariable::declared("sum", Datatype::Int)]),
        );

        let mut config = operation_config("ns=2;s=Add");
        config.input_validation = ArgumentValidationMode::None;
        let provider = OpcUaOperationProvider::new(
            client,
            &Reference::from("plc/add"),
            &config,
            &context,
            Duration::from_secs(5),
        )
        .unwrap();

        let input = vec![OperationVariable::new("a", TypedValue::Int(40))];
        let output = provider.invoke(input, &mut Vec::new()).unwrap();
        assert_eq!(output[0].value, TypedValue::Int(40));
    }

    #[test]
    fn missing_declared_output_is_a_contract_violation_unless_unchecked() {
        let space = Arc::new(AddressSpace::new());
        space.insert_method(
            "ns=2;s=Probe",
            Vec::new(),
            vec!["raw".to_owned()],
            Arc::new(|_inputs: &[Value]| Ok(vec![json!(1)])),
        );
        let client = connected_client(space);
        let context = StaticServiceContext::new().with_element(
            "plc/probe",
            ElementInfo::operation(vec![OperationVariable::declared("offset", Datatype::Int)]),
        );

        let provider = OpcUaOperationProvider::new(
            client.clone(),
            &Reference::from("plc/probe"),
            &operation_config("ns=2;s=Probe"),
            &context,
            Duration::from_secs(5),
        )
        .unwrap();
        let err = provider.invoke(Vec::new(), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, AssetConnectionError::ContractViolation(_)));
        assert!(err.to_string().contains("output: offset"));

        let mut config = operation_config("ns=2;s=Probe");
        config.output_validation = ArgumentValidationMode::None;
        let provider = OpcUaOperationProvider::new(
            client,
            &Reference::from("plc/probe"),
            &config,
            &context,
            Duration::from_secs(5),
        )
        .unwrap();
        let output = provider.invoke(Vec::new(), &mut Vec::new()).unwrap();
        // The declared default stands in for the missing output.
        assert_eq!(output[0].value, TypedValue::Int(0));
    }

    #[test]
    fn operation_provider_requires_operation_elements() {
        let space = Arc::new(AddressSpace::new());
        let client = connected_client(space);
        let context = StaticServiceContext::new()
            .with_element("sensors/t", ElementInfo::property(Datatype::Double));

        let err = OpcUaOperationProvider::new(
            client,
            &Reference::from("sensors/t"),
            &operation_config("ns=2;s=T"),
            &context,
            Duration::from_secs(5),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unsupported element kind"));
    }

    #[test]
    fn subscription_provider_delivers_projected_writes() {
        let space = Arc::new(AddressSpace::new());
        space.insert_variable("ns=2;s=Forces", json!([[0.0], [0.0]]), 2);
        let client = connected_client(space.clone());
        let context = Arc::new(
            StaticServiceContext::new()
                .with_element("press/force", ElementInfo::property(Datatype::Double)),
        );

        let provider = OpcUaSubscriptionProvider::new(
            client,
            Reference::from("press/force"),
            &SubscriptionProviderConfig {
                address: "ns=2;s=Forces".to_owned(),
                array_index: Some("[1][0]".to_owned()),
                sampling_interval: Some(Duration::from_millis(100)),
            },
            context,
        )
        .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let listener: NewDataListener = {
            let seen = seen.clone();
            Arc::new(move |value: &TypedValue| seen.lock().push(value.clone()))
        };
        let handle = provider.add_listener(listener).unwrap();
        assert!(provider.is_active());
        assert_eq!(space.monitor_count(), 1);

        space.write("ns=2;s=Forces", json!([[1.5], [2.5]])).unwrap();
        assert_eq!(seen.lock().as_slice(), &[TypedValue::Double(2.5)]);

        provider.remove_listener(handle).unwrap();
        assert!(!provider.is_active());
        assert_eq!(space.monitor_count(), 0);
    }
}

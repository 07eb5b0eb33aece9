//! ---
//! twl_section: "01-core-functionality"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "Asset-connection abstraction and concurrency machinery."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
//! Type and metadata resolution consumed by the connectivity layer.
//!
//! Providers need to know what kind of element a [`Reference`] points
//! at and which datatype its value carries. That knowledge lives in
//! the information model, not in the adapters, and reaches the core
//! through the [`ServiceContext`] seam.

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::AssetConnectionError;
use twinlink_model::{Datatype, ElementKind, OperationVariable, Reference, TypeInfo};

/// Read-only view into the information model.
///
/// Both lookups answer `None` for references the model does not
/// contain; translating absence into a configuration error is the
/// caller's job, so error messages can name the operation that needed
/// the metadata.
pub trait ServiceContext: Send + Sync {
    /// Element kind and value datatype for `reference`.
    fn type_info(&self, reference: &Reference) -> Option<TypeInfo>;

    /// Declared output parameter list of the operation at `reference`.
    fn operation_output_variables(&self, reference: &Reference)
        -> Option<Vec<OperationVariable>>;
}

/// Everything the connectivity layer knows about one model element.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementInfo {
    pub type_info: TypeInfo,
    pub output_variables: Vec<OperationVariable>,
}

impl ElementInfo {
    pub fn property(datatype: Datatype) -> Self {
        Self {
            type_info: TypeInfo::property(datatype),
            output_variables: Vec::new(),
        }
    }

    pub fn operation(output_variables: Vec<OperationVariable>) -> Self {
        Self {
            type_info: TypeInfo {
                kind: ElementKind::Operation,
                datatype: None,
            },
            output_variables,
        }
    }

    pub fn of_kind(kind: ElementKind) -> Self {
        Self {
            type_info: TypeInfo {
                kind,
                datatype: None,
            },
            output_variables: Vec::new(),
        }
    }
}

/// In-memory [`ServiceContext`] fed from configuration.
///
/// Insertion order is preserved so diagnostics listing elements stay
/// stable across runs.
#[derive(Debug, Default)]
pub struct StaticServiceContext {
    elements: RwLock<IndexMap<Reference, ElementInfo>>,
}

impl StaticServiceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, reference: Reference, info: ElementInfo) {
        self.elements.write().insert(reference, info);
    }

    pub fn with_element(self, reference: impl Into<Reference>, info: ElementInfo) -> Self {
        self.elements.write().insert(reference.into(), info);
        self
    }

    pub fn len(&self) -> usize {
        self.elements.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.read().is_empty()
    }
}

impl ServiceContext for StaticServiceContext {
    fn type_info(&self, reference: &Reference) -> Option<TypeInfo> {
        self.elements
            .read()
            .get(reference)
            .map(|info| info.type_info.clone())
    }

    fn operation_output_variables(
        &self,
        reference: &Reference,
    ) -> Option<Vec<OperationVariable>> {
        let elements = self.elements.read();
        let info = elements.get(reference)?;
        if info.type_info.kind != ElementKind::Operation {
            return None;
        }
        Some(info.output_variables.clone())
    }
}

/// Resolve the value datatype of the property at `reference`.
///
/// Distinguishes three configuration-error causes: the reference does
/// not resolve at all, it resolves to a non-property element, or it
/// resolves to a property with no declared datatype.
pub fn resolve_property_datatype(
    context: &dyn ServiceContext,
    reference: &Reference,
) -> Result<Datatype, AssetConnectionError> {
    let type_info = context.type_info(reference).ok_or_else(|| {
        AssetConnectionError::invalid_configuration(format!(
            "could not resolve type information (reference: {})",
            reference
        ))
    })?;
    if type_info.kind != ElementKind::Property {
        return Err(AssetConnectionError::invalid_configuration(format!(
            "unsupported element kind (reference: {}, kind: {:?}, expected: Property)",
            reference, type_info.kind
        )));
    }
    type_info.datatype.ok_or_else(|| {
        AssetConnectionError::invalid_configuration(format!(
            "missing datatype for property (reference: {})",
            reference
        ))
    })
}

//! ---
//! twl_section: "02-information-model"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "Typed value representation and wire conversion."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::datatype::Datatype;
use crate::value::TypedValue;

/// Classification of an information-model element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    /// Scalar element carrying a single typed value. The only kind
    /// asset connections can bind value and subscription providers to.
    #[default]
    Property,
    /// Structural grouping of other elements.
    Collection,
    /// Invokable element.
    Operation,
    /// Event emitter.
    Event,
}

/// Type metadata resolved for a reference.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    pub kind: ElementKind,
    pub datatype: Option<Datatype>,
}

impl TypeInfo {
    pub fn property(datatype: Datatype) -> Self {
        Self {
            kind: ElementKind::Property,
            datatype: Some(datatype),
        }
    }
}

/// Named operation parameter.
///
/// Matching between caller-supplied and asset-returned parameters is
/// done by `id_short`, the element's local short name.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationVariable {
    pub id_short: String,
    pub value: TypedValue,
}

impl OperationVariable {
    pub fn new(id_short: impl Into<String>, value: TypedValue) -> Self {
        Self {
            id_short: id_short.into(),
            value,
        }
    }

    /// Declared variable carrying the neutral default of its datatype.
    pub fn declared(id_short: impl Into<String>, datatype: Datatype) -> Self {
        Self::new(id_short, TypedValue::default_for(datatype))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_variable_carries_datatype_default() {
        let variable = OperationVariable::declared("result", Datatype::Double);
        assert_eq!(variable.id_short, "result");
        assert_eq!(variable.value, TypedValue::Double(0.0));
        assert_eq!(variable.value.datatype(), Datatype::Double);
    }
}

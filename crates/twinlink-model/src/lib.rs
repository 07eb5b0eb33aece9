//! ---
//! twl_section: "02-information-model"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "Typed value representation and wire conversion."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
//! Value model shared by the TwinLink core and its protocol adapters.
//!
//! This crate defines the opaque [`Reference`] used to address
//! information-model elements, the closed [`Datatype`] set with its
//! tagged [`TypedValue`] union, and the conversion between typed values
//! and the JSON wire representation adapters exchange with assets.

pub mod datatype;
pub mod operation;
pub mod reference;
pub mod value;

pub use datatype::Datatype;
pub use operation::{ElementKind, OperationVariable, TypeInfo};
pub use reference::Reference;
pub use value::{from_wire, to_wire, ConversionError, TypedValue};

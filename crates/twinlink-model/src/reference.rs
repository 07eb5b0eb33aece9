//! ---
//! twl_section: "02-information-model"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "Typed value representation and wire conversion."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of an information-model element.
///
/// References are used as map keys throughout the connectivity layer;
/// equality is structural. The contained string is treated as a fully
/// qualified element path (e.g. `submodel1/property1`) but the core
/// never interprets its internal structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Reference {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Reference {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::str::FromStr for Reference {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

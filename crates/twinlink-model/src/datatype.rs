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

/// Closed set of value datatypes supported by asset connections.
///
/// The lexical names follow the XML Schema datatype vocabulary used by
/// the information model (`xs:string`, `xs:unsignedByte`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Datatype {
    String,
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    UnsignedByte,
    UnsignedShort,
    UnsignedInt,
    UnsignedLong,
    Float,
    Double,
    Date,
    Time,
    DateTime,
    HexBinary,
    Base64Binary,
    AnyUri,
    LangString,
}

impl Datatype {
    /// Fallback datatype when the model does not declare one.
    pub const DEFAULT: Datatype = Datatype::String;

    /// Lexical name of the datatype.
    pub fn name(&self) -> &'static str {
        match self {
            Datatype::String => "xs:string",
            Datatype::Boolean => "xs:boolean",
            Datatype::Byte => "xs:byte",
            Datatype::Short => "xs:short",
            Datatype::Int => "xs:int",
            Datatype::Long => "xs:long",
            Datatype::UnsignedByte => "xs:unsignedByte",
            Datatype::UnsignedShort => "xs:unsignedShort",
            Datatype::UnsignedInt => "xs:unsignedInt",
            Datatype::UnsignedLong => "xs:unsignedLong",
            Datatype::Float => "xs:float",
            Datatype::Double => "xs:double",
            Datatype::Date => "xs:date",
            Datatype::Time => "xs:time",
            Datatype::DateTime => "xs:dateTime",
            Datatype::HexBinary => "xs:hexBinary",
            Datatype::Base64Binary => "xs:base64Binary",
            Datatype::AnyUri => "xs:anyURI",
            Datatype::LangString => "rdf:langString",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Datatype::Byte
                | Datatype::Short
                | Datatype::Int
                | Datatype::Long
                | Datatype::UnsignedByte
                | Datatype::UnsignedShort
                | Datatype::UnsignedInt
                | Datatype::UnsignedLong
                | Datatype::Float
                | Datatype::Double
        )
    }
}

impl Default for Datatype {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Datatype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "xs:string" | "string" => Ok(Datatype::String),
            "xs:boolean" | "boolean" => Ok(Datatype::Boolean),
            "xs:byte" | "byte" => Ok(Datatype::Byte),
            "xs:short" | "short" => Ok(Datatype::Short),
            "xs:int" | "int" => Ok(Datatype::Int),
            "xs:long" | "long" => Ok(Datatype::Long),
            "xs:unsignedByte" | "unsignedByte" => Ok(Datatype::UnsignedByte),
            "xs:unsignedShort" | "unsignedShort" => Ok(Datatype::UnsignedShort),
            "xs:unsignedInt" | "unsignedInt" => Ok(Datatype::UnsignedInt),
            "xs:unsignedLong" | "unsignedLong" => Ok(Datatype::UnsignedLong),
            "xs:float" | "float" => Ok(Datatype::Float),
            "xs:double" | "double" => Ok(Datatype::Double),
            "xs:date" | "date" => Ok(Datatype::Date),
            "xs:time" | "time" => Ok(Datatype::Time),
            "xs:dateTime" | "dateTime" => Ok(Datatype::DateTime),
            "xs:hexBinary" | "hexBinary" => Ok(Datatype::HexBinary),
            "xs:base64Binary" | "base64Binary" => Ok(Datatype::Base64Binary),
            "xs:anyURI" | "anyURI" => Ok(Datatype::AnyUri),
            "rdf:langString" | "langString" => Ok(Datatype::LangString),
            other => Err(format!("unknown datatype: {}", other)),
        }
    }
}

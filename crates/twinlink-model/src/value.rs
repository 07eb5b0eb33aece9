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

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde_json::Value;
use thiserror::Error;

use crate::datatype::Datatype;

/// Raised when a value cannot be converted to or from a given datatype.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Lexical representation does not parse as the requested datatype.
    #[error("failed to parse '{value}' as {datatype}: {reason}")]
    Parse {
        datatype: Datatype,
        value: String,
        reason: String,
    },
    /// Numeric value does not fit the requested datatype.
    #[error("value {value} out of range for {datatype}")]
    OutOfRange { datatype: Datatype, value: String },
    /// Wire value has a shape that cannot map onto the requested datatype.
    #[error("wire value {value} cannot be converted to {datatype}")]
    IncompatibleWireType { datatype: Datatype, value: String },
}

/// Tagged value union over the supported datatypes.
///
/// The string representation produced by [`fmt::Display`] and consumed
/// by [`TypedValue::parse`] is the lexical form of the corresponding
/// datatype; it is the primary contract for parsing configuration
/// defaults and for bridging incompatible wire types.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    String(String),
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    UnsignedByte(u8),
    UnsignedShort(u16),
    UnsignedInt(u32),
    UnsignedLong(u64),
    Float(f32),
    Double(f64),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTime<FixedOffset>),
    HexBinary(Vec<u8>),
    Base64Binary(Vec<u8>),
    AnyUri(String),
    LangString { text: String, language: String },
}

impl TypedValue {
    /// Datatype tag of this value.
    pub fn datatype(&self) -> Datatype {
        match self {
            TypedValue::String(_) => Datatype::String,
            TypedValue::Boolean(_) => Datatype::Boolean,
            TypedValue::Byte(_) => Datatype::Byte,
            TypedValue::Short(_) => Datatype::Short,
            TypedValue::Int(_) => Datatype::Int,
            TypedValue::Long(_) => Datatype::Long,
            TypedValue::UnsignedByte(_) => Datatype::UnsignedByte,
            TypedValue::UnsignedShort(_) => Datatype::UnsignedShort,
            TypedValue::UnsignedInt(_) => Datatype::UnsignedInt,
            TypedValue::UnsignedLong(_) => Datatype::UnsignedLong,
            TypedValue::Float(_) => Datatype::Float,
            TypedValue::Double(_) => Datatype::Double,
            TypedValue::Date(_) => Datatype::Date,
            TypedValue::Time(_) => Datatype::Time,
            TypedValue::DateTime(_) => Datatype::DateTime,
            TypedValue::HexBinary(_) => Datatype::HexBinary,
            TypedValue::Base64Binary(_) => Datatype::Base64Binary,
            TypedValue::AnyUri(_) => Datatype::AnyUri,
            TypedValue::LangString { .. } => Datatype::LangString,
        }
    }

    /// Neutral default value for a datatype, used to shape declared
    /// operation output variables before the asset fills them in.
    pub fn default_for(datatype: Datatype) -> Self {
        match datatype {
            Datatype::String => TypedValue::String(String::new()),
            Datatype::Boolean => TypedValue::Boolean(false),
            Datatype::Byte => TypedValue::Byte(0),
            Datatype::Short => TypedValue::Short(0),
            Datatype::Int => TypedValue::Int(0),
            Datatype::Long => TypedValue::Long(0),
            Datatype::UnsignedByte => TypedValue::UnsignedByte(0),
            Datatype::UnsignedShort => TypedValue::UnsignedShort(0),
            Datatype::UnsignedInt => TypedValue::UnsignedInt(0),
            Datatype::UnsignedLong => TypedValue::UnsignedLong(0),
            Datatype::Float => TypedValue::Float(0.0),
            Datatype::Double => TypedValue::Double(0.0),
            Datatype::Date => TypedValue::Date(NaiveDate::default()),
            Datatype::Time => TypedValue::Time(NaiveTime::default()),
            Datatype::DateTime => TypedValue::DateTime(DateTime::default()),
            Datatype::HexBinary => TypedValue::HexBinary(Vec::new()),
            Datatype::Base64Binary => TypedValue::Base64Binary(Vec::new()),
            Datatype::AnyUri => TypedValue::AnyUri(String::new()),
            Datatype::LangString => TypedValue::LangString {
                text: String::new(),
                language: String::new(),
            },
        }
    }

    /// Parse the lexical form of a value for the given datatype.
    pub fn parse(datatype: Datatype, value: &str) -> Result<Self, ConversionError> {
        let parse_err = |reason: String| ConversionError::Parse {
            datatype,
            value: value.to_owned(),
            reason,
        };
        match datatype {
            Datatype::String => Ok(TypedValue::String(value.to_owned())),
            Datatype::Boolean => match value {
                "true" | "1" => Ok(TypedValue::Boolean(true)),
                "false" | "0" => Ok(TypedValue::Boolean(false)),
                _ => Err(parse_err("expected boolean literal".to_owned())),
            },
            Datatype::Byte => value
                .parse()
                .map(TypedValue::Byte)
                .map_err(|e: std::num::ParseIntError| parse_err(e.to_string())),
            Datatype::Short => value
                .parse()
                .map(TypedValue::Short)
                .map_err(|e: std::num::ParseIntError| parse_err(e.to_string())),
            Datatype::Int => value
                .parse()
                .map(TypedValue::Int)
                .map_err(|e: std::num::ParseIntError| parse_err(e.to_string())),
            Datatype::Long => value
                .parse()
                .map(TypedValue::Long)
                .map_err(|e: std::num::ParseIntError| parse_err(e.to_string())),
            Datatype::UnsignedByte => value
                .parse()
                .map(TypedValue::UnsignedByte)
                .map_err(|e: std::num::ParseIntError| parse_err(e.to_string())),
            Datatype::UnsignedShort => value
                .parse()
                .map(TypedValue::UnsignedShort)
                .map_err(|e: std::num::ParseIntError| parse_err(e.to_string())),
            Datatype::UnsignedInt => value
                .parse()
                .map(TypedValue::UnsignedInt)
                .map_err(|e: std::num::ParseIntError| parse_err(e.to_string())),
            Datatype::UnsignedLong => value
                .parse()
                .map(TypedValue::UnsignedLong)
                .map_err(|e: std::num::ParseIntError| parse_err(e.to_string())),
            Datatype::Float => value
                .parse()
                .map(TypedValue::Float)
                .map_err(|e: std::num::ParseFloatError| parse_err(e.to_string())),
            Datatype::Double => value
                .parse()
                .map(TypedValue::Double)
                .map_err(|e: std::num::ParseFloatError| parse_err(e.to_string())),
            Datatype::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(TypedValue::Date)
                .map_err(|e| parse_err(e.to_string())),
            Datatype::Time => NaiveTime::parse_from_str(value, "%H:%M:%S%.f")
                .map(TypedValue::Time)
                .map_err(|e| parse_err(e.to_string())),
            Datatype::DateTime => DateTime::parse_from_rfc3339(value)
                .map(TypedValue::DateTime)
                .map_err(|e| parse_err(e.to_string())),
            Datatype::HexBinary => hex::decode(value)
                .map(TypedValue::HexBinary)
                .map_err(|e| parse_err(e.to_string())),
            Datatype::Base64Binary => BASE64
                .decode(value)
                .map(TypedValue::Base64Binary)
                .map_err(|e| parse_err(e.to_string())),
            Datatype::AnyUri => Ok(TypedValue::AnyUri(value.to_owned())),
            Datatype::LangString => match value.rsplit_once('@') {
                Some((text, language)) if !language.is_empty() => Ok(TypedValue::LangString {
                    text: text.to_owned(),
                    language: language.to_owned(),
                }),
                _ => Err(parse_err("expected 'text@language'".to_owned())),
            },
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::String(v) | TypedValue::AnyUri(v) => f.write_str(v),
            TypedValue::Boolean(v) => write!(f, "{}", v),
            TypedValue::Byte(v) => write!(f, "{}", v),
            TypedValue::Short(v) => write!(f, "{}", v),
            TypedValue::Int(v) => write!(f, "{}", v),
            TypedValue::Long(v) => write!(f, "{}", v),
            TypedValue::UnsignedByte(v) => write!(f, "{}", v),
            TypedValue::UnsignedShort(v) => write!(f, "{}", v),
            TypedValue::UnsignedInt(v) => write!(f, "{}", v),
            TypedValue::UnsignedLong(v) => write!(f, "{}", v),
            TypedValue::Float(v) => write!(f, "{}", v),
            TypedValue::Double(v) => write!(f, "{}", v),
            TypedValue::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            TypedValue::Time(v) => write!(f, "{}", v.format("%H:%M:%S%.f")),
            TypedValue::DateTime(v) => f.write_str(&v.to_rfc3339()),
            TypedValue::HexBinary(v) => f.write_str(&hex::encode(v)),
            TypedValue::Base64Binary(v) => f.write_str(&BASE64.encode(v)),
            TypedValue::LangString { text, language } => write!(f, "{}@{}", text, language),
        }
    }
}

/// Convert a JSON wire value into a [`TypedValue`] of the given datatype.
///
/// Numbers are range-checked against the target width; strings are
/// parsed via the lexical form, which bridges adapters whose wire type
/// differs from the declared model datatype.
pub fn from_wire(value: &Value, datatype: Datatype) -> Result<TypedValue, ConversionError> {
    let incompatible = || ConversionError::IncompatibleWireType {
        datatype,
        value: value.to_string(),
    };
    let out_of_range = || ConversionError::OutOfRange {
        datatype,
        value: value.to_string(),
    };
    match value {
        Value::String(s) => TypedValue::parse(datatype, s),
        Value::Bool(b) => match datatype {
            Datatype::Boolean => Ok(TypedValue::Boolean(*b)),
            Datatype::String => Ok(TypedValue::String(b.to_string())),
            _ => Err(incompatible()),
        },
        Value::Number(n) => match datatype {
            Datatype::Byte => int_from_wire(n, out_of_range).map(TypedValue::Byte),
            Datatype::Short => int_from_wire(n, out_of_range).map(TypedValue::Short),
            Datatype::Int => int_from_wire(n, out_of_range).map(TypedValue::Int),
            Datatype::Long => n.as_i64().map(TypedValue::Long).ok_or_else(out_of_range),
            Datatype::UnsignedByte => uint_from_wire(n, out_of_range).map(TypedValue::UnsignedByte),
            Datatype::UnsignedShort => {
                uint_from_wire(n, out_of_range).map(TypedValue::UnsignedShort)
            }
            Datatype::UnsignedInt => uint_from_wire(n, out_of_range).map(TypedValue::UnsignedInt),
            Datatype::UnsignedLong => n
                .as_u64()
                .map(TypedValue::UnsignedLong)
                .ok_or_else(out_of_range),
            Datatype::Float => {
                let v = n.as_f64().ok_or_else(incompatible)?;
                let narrowed = v as f32;
                // The cast saturates to infinity outside f32 range.
                if v.is_finite() && !narrowed.is_finite() {
                    return Err(out_of_range());
                }
                Ok(TypedValue::Float(narrowed))
            }
            Datatype::Double => n.as_f64().map(TypedValue::Double).ok_or_else(incompatible),
            Datatype::String => Ok(TypedValue::String(n.to_string())),
            _ => Err(incompatible()),
        },
        _ => Err(incompatible()),
    }
}

fn int_from_wire<T, E>(n: &serde_json::Number, err: E) -> Result<T, ConversionError>
where
    T: TryFrom<i64>,
    E: Fn() -> ConversionError,
{
    n.as_i64()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(err)
}

fn uint_from_wire<T, E>(n: &serde_json::Number, err: E) -> Result<T, ConversionError>
where
    T: TryFrom<u64>,
    E: Fn() -> ConversionError,
{
    n.as_u64()
        .and_then(|v| T::try_from(v).ok())
        .ok_or_else(err)
}

/// Convert a [`TypedValue`] into its JSON wire representation.
pub fn to_wire(value: &TypedValue) -> Value {
    match value {
        TypedValue::String(v) | TypedValue::AnyUri(v) => Value::from(v.clone()),
        TypedValue::Boolean(v) => Value::from(*v),
        TypedValue::Byte(v) => Value::from(*v),
        TypedValue::Short(v) => Value::from(*v),
        TypedValue::Int(v) => Value::from(*v),
        TypedValue::Long(v) => Value::from(*v),
        TypedValue::UnsignedByte(v) => Value::from(*v),
        TypedValue::UnsignedShort(v) => Value::from(*v),
        TypedValue::UnsignedInt(v) => Value::from(*v),
        TypedValue::UnsignedLong(v) => Value::from(*v),
        TypedValue::Float(v) => Value::from(*v),
        TypedValue::Double(v) => Value::from(*v),
        // Date, time, and binary variants travel in lexical form.
        other => Value::from(other.to_string()),
    }
}

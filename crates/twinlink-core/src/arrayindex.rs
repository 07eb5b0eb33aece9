//! ---
//! twl_section: "01-core-functionality"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "Asset-connection abstraction and concurrency machinery."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
//! Array/path addressing for compound wire values.
//!
//! An index expression of the form `[2][0]` projects a single scalar
//! element out of a (multi-dimensional) array value, so a protocol
//! adapter can bind one slot of a compound value to an individual
//! information-model element while always reading and writing the
//! whole compound value on the wire.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

const EXPECTED_GRAMMAR: &str = "([digits])+";

/// Failures of index-expression parsing and array navigation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArrayIndexError {
    #[error(
        "invalid array index expression (expression: {expression}, expected format: {})",
        EXPECTED_GRAMMAR
    )]
    InvalidExpression { expression: String },
    #[error(
        "error accessing array at given index - intermediate element is null (requested index: {requested}, failing sub-path: {at})"
    )]
    NullIntermediate { requested: String, at: String },
    #[error(
        "error accessing array at given index - element is not an array (requested index: {requested}, failing sub-path: {at})"
    )]
    NotAnArray { requested: String, at: String },
    #[error("array index out of bounds (requested index: {requested}, index: {index}, length: {len})")]
    OutOfBounds {
        requested: String,
        index: usize,
        len: usize,
    },
}

/// Ordered sequence of non-negative indices into a nested array value.
///
/// The empty sequence means "whole value, no projection".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArrayIndex(Vec<usize>);

impl ArrayIndex {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn from_components(components: Vec<usize>) -> Self {
        Self(components)
    }

    /// Parse an index expression of the form `[x][y]...[z]`.
    ///
    /// Empty or blank input yields the empty index; anything else must
    /// fully match the grammar `([digits])+`.
    pub fn parse(expression: &str) -> Result<Self, ArrayIndexError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }
        let invalid = || ArrayIndexError::InvalidExpression {
            expression: expression.to_owned(),
        };
        let mut components = Vec::new();
        let mut rest = trimmed;
        while !rest.is_empty() {
            let stripped = rest.strip_prefix('[').ok_or_else(invalid)?;
            let end = stripped.find(']').ok_or_else(invalid)?;
            let digits = &stripped[..end];
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            components.push(digits.parse().map_err(|_| invalid())?);
            rest = &stripped[end + 1..];
        }
        Ok(Self(components))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn components(&self) -> &[usize] {
        &self.0
    }

    /// String form of the first `depth` components, used in diagnostics.
    fn prefix_string(&self, depth: usize) -> String {
        self.0
            .iter()
            .take(depth)
            .map(|c| format!("[{}]", c))
            .collect()
    }
}

impl fmt::Display for ArrayIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for component in &self.0 {
            write!(f, "[{}]", component)?;
        }
        Ok(())
    }
}

/// Navigate to the array holding the final index component.
///
/// Walks all but the last component, dereferencing one array level per
/// component, and requires the element reached that way to itself be an
/// array. The empty index returns the container unchanged.
pub fn navigate<'a>(container: &'a Value, index: &ArrayIndex) -> Result<&'a Value, ArrayIndexError> {
    let components = index.components();
    if components.is_empty() {
        return Ok(container);
    }
    let requested = index.to_string();
    let mut current = container;
    for (depth, &i) in components[..components.len() - 1].iter().enumerate() {
        let arr = expect_array(current, &requested, index, depth)?;
        current = arr.get(i).ok_or_else(|| ArrayIndexError::OutOfBounds {
            requested: requested.clone(),
            index: i,
            len: arr.len(),
        })?;
    }
    expect_array(current, &requested, index, components.len() - 1)?;
    Ok(current)
}

/// `depth` is the number of components already dereferenced to reach
/// `value`; the failing sub-path names the offending element itself.
fn expect_array<'a>(
    value: &'a Value,
    requested: &str,
    index: &ArrayIndex,
    depth: usize,
) -> Result<&'a Vec<Value>, ArrayIndexError> {
    match value {
        Value::Array(arr) => Ok(arr),
        Value::Null => Err(ArrayIndexError::NullIntermediate {
            requested: requested.to_owned(),
            at: index.prefix_string(depth),
        }),
        _ => Err(ArrayIndexError::NotAnArray {
            requested: requested.to_owned(),
            at: index.prefix_string(depth),
        }),
    }
}

fn expect_array_mut<'a>(
    value: &'a mut Value,
    requested: &str,
    index: &ArrayIndex,
    depth: usize,
) -> Result<&'a mut Vec<Value>, ArrayIndexError> {
    match value {
        Value::Array(arr) => Ok(arr),
        Value::Null => Err(ArrayIndexError::NullIntermediate {
            requested: requested.to_owned(),
            at: index.prefix_string(depth),
        }),
        _ => Err(ArrayIndexError::NotAnArray {
            requested: requested.to_owned(),
            at: index.prefix_string(depth),
        }),
    }
}

fn navigate_mut<'a>(
    container: &'a mut Value,
    index: &ArrayIndex,
) -> Result<&'a mut Vec<Value>, ArrayIndexError> {
    let components = index.components();
    let requested = index.to_string();
    let mut current = container;
    for (depth, &i) in components[..components.len() - 1].iter().enumerate() {
        let arr = expect_array_mut(current, &requested, index, depth)?;
        let len = arr.len();
        current = arr.get_mut(i).ok_or(ArrayIndexError::OutOfBounds {
            requested: requested.clone(),
            index: i,
            len,
        })?;
    }
    expect_array_mut(current, &requested, index, components.len() - 1)
}

/// Read the element at `index`. The empty index returns the whole
/// container.
pub fn get_element(container: &Value, index: &ArrayIndex) -> Result<Value, ArrayIndexError> {
    let components = index.components();
    if components.is_empty() {
        return Ok(container.clone());
    }
    let parent = navigate(container, index)?;
    let arr = expect_array(parent, &index.to_string(), index, components.len() - 1)?;
    let last = components[components.len() - 1];
    arr.get(last)
        .cloned()
        .ok_or_else(|| ArrayIndexError::OutOfBounds {
            requested: index.to_string(),
            index: last,
            len: arr.len(),
        })
}

/// Write `value` into the element at `index`, leaving all other
/// elements of the container untouched. The empty index is a no-op.
pub fn set_element(
    container: &mut Value,
    value: Value,
    index: &ArrayIndex,
) -> Result<(), ArrayIndexError> {
    let components = index.components();
    if components.is_empty() {
        return Ok(());
    }
    let arr = navigate_mut(container, index)?;
    let last = components[components.len() - 1];
    let len = arr.len();
    let slot = arr
        .get_mut(last)
        .ok_or_else(|| ArrayIndexError::OutOfBounds {
            requested: index.to_string(),
            index: last,
            len,
        })?;
    *slot = value;
    Ok(())
}

/// Project the scalar element out of a wire value if an index is set,
/// otherwise return the wire value unchanged.
pub fn unwrap_value(wire_value: &Value, index: &ArrayIndex) -> Result<Value, ArrayIndexError> {
    if index.is_empty() {
        return Ok(wire_value.clone());
    }
    get_element(wire_value, index)
}

/// Write `element_value` back into the container at `index` and return
/// the full container; with the empty index the element value passes
/// through unchanged.
pub fn wrap_value(
    mut container: Value,
    element_value: Value,
    index: &ArrayIndex,
) -> Result<Value, ArrayIndexError> {
    if index.is_empty() {
        return Ok(element_value);
    }
    set_element(&mut container, element_value, index)?;
    Ok(container)
}

//! ---
//! twl_section: "01-core-functionality"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "Asset-connection abstraction and concurrency machinery."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
use thiserror::Error;

use crate::arrayindex::ArrayIndexError;
use twinlink_model::ConversionError;

/// Adapter-agnostic error type for all asset-connection operations.
///
/// Callers never see adapter-specific error types: adapters wrap their
/// native failures into one of these variants before the error leaves
/// the core.
#[derive(Debug, Error)]
pub enum AssetConnectionError {
    /// Fatal misconfiguration, surfaced at setup or registration time:
    /// malformed index expressions, dimensionality mismatches,
    /// unresolved or unsupported references, duplicate providers.
    #[error("invalid asset connection configuration: {0}")]
    InvalidConfiguration(String),
    /// Potentially transient wire-level failure: handshake errors,
    /// read/write/invoke failures, bad status codes.
    #[error("asset connection failure: {message}")]
    Connectivity {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    /// Programming or configuration error that is fatal to the call:
    /// in/out argument mismatches, invalid array navigation.
    #[error("asset connection contract violation: {0}")]
    ContractViolation(String),
}

impl AssetConnectionError {
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity {
            message: message.into(),
            source: None,
        }
    }

    pub fn connectivity_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connectivity {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn contract_violation(message: impl Into<String>) -> Self {
        Self::ContractViolation(message.into())
    }
}

impl From<ArrayIndexError> for AssetConnectionError {
    fn from(err: ArrayIndexError) -> Self {
        match err {
            // A malformed expression is caught when configuration is
            // parsed; the navigation failures indicate a mismatch
            // between configuration and the actual wire value.
            ArrayIndexError::InvalidExpression { .. } => {
                AssetConnectionError::InvalidConfiguration(err.to_string())
            }
            _ => AssetConnectionError::ContractViolation(err.to_string()),
        }
    }
}

impl From<ConversionError> for AssetConnectionError {
    fn from(err: ConversionError) -> Self {
        AssetConnectionError::Connectivity {
            message: "value conversion failed".to_owned(),
            source: Some(Box::new(err)),
        }
    }
}

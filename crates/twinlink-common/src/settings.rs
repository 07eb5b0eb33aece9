//! ---
//! twl_section: "01-core-functionality"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "Shared primitives and utilities for the TwinLink runtime."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};

fn default_retry_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_invoke_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Runtime settings shared by all asset connections.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreSettings {
    /// Delay between reconnection attempts for a failed connection.
    #[serde(default = "default_retry_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_interval: Duration,
    /// Upper bound for the blocking operation-invocation wrapper.
    /// Individual operation providers may override this per operation.
    #[serde(default = "default_invoke_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub invoke_timeout: Duration,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            retry_interval: default_retry_interval(),
            invoke_timeout: default_invoke_timeout(),
        }
    }
}

//! ---
//! twl_section: "01-core-functionality"
//! twl_subsection: "module"
//! twl_type: "source"
//! twl_scope: "code"
//! twl_description: "Shared primitives and utilities for the TwinLink runtime."
//! twl_version: "v0.0.0-prealpha"
//! twl_owner: "tbd"
//! ---
//! Shared primitives for the TwinLink workspace: runtime settings and
//! the tracing bootstrap consumed by the daemon and by tests.

pub mod logging;
pub mod settings;

pub use logging::{init_tracing, LogFormat, LoggingConfig};
pub use settings::CoreSettings;

#![forbid(unsafe_code)]
//! Decision engine for the backstop rollback controller.
//!
//! Everything here is a pure function of its arguments plus an immutable
//! [`ControllerConfig`]; no clocks, no I/O, no shared state. The server
//! crate supplies history, the cached known-good revision, and `now`.

mod config;
mod decide;

pub use config::{validate_startup_config_contract, ControllerConfig, CONFIG_SCHEMA_VERSION};
pub use decide::decide;

pub const CRATE_NAME: &str = "backstop-engine";

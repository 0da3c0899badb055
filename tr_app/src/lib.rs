//! # tr_app
//!
//! Process-level glue around the admission gate: configuration files,
//! tracing setup and shutdown handling for the binaries.

pub mod cli;
pub mod config_loader;
pub mod shutdown_handler;
pub mod sim;
pub mod tracing_setup;

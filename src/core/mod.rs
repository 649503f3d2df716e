//! Core logic: settings schema, layered config, validation, logging, state.

pub mod config;
pub mod eventlog;
pub mod logging;
pub mod parser;
pub mod state;
pub mod types;

//! Shared types for the tether workspace: the error enum every crate
//! returns, the TOML configuration model, and structured trace events.

pub mod config;
pub mod error;
pub mod trace;

pub use error::{Error, Result};

//! Nadhir core crate - shared types, error taxonomy, and configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::NadhirConfig;
pub use error::{NadhirError, Result};
pub use types::*;

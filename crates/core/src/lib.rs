//! Core types and errors for the fetch engine.

pub mod error;
pub mod record;

pub use error::{Error, Result};
pub use record::*;

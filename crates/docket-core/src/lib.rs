//! # docket-core
//!
//! Core types, traits, and abstractions for docket.
//!
//! This crate provides the job, queue and document models, the error
//! taxonomy, and the collaborator traits the other docket crates implement.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;

/// Generate a time-ordered job identifier.
pub fn new_v7() -> uuid::Uuid {
    uuid::Uuid::now_v7()
}

//! Consentry Core
//!
//! Core types and utilities shared across Consentry components.
//!
//! This crate provides:
//! - Error types and result handling
//! - Element kinds and the consent category vocabulary
//! - The accepted-category set consulted by the transformer
//! - A bounded buffer for capturing complete response bodies

pub mod buffer;
pub mod error;
pub mod types;

pub use buffer::ResponseBuffer;
pub use error::{Error, Result};
pub use types::{AcceptedCategories, ElementKind};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::buffer::ResponseBuffer;
    pub use crate::error::{Error, Result};
    pub use crate::types::{attr, category, AcceptedCategories, ElementKind};
}

//! Parley Context - fitting conversations into a model's context window
//!
//! This crate provides:
//! - Conversation message types
//! - Token counting (estimate by default, tokenizer-backed behind `token-counting`)
//! - The model catalog
//! - Token budgets and budget-aware truncation

pub mod catalog;
pub mod context;
pub mod error;
pub mod tokens;
pub mod truncate;
pub mod window;

pub use catalog::{ModelCatalog, ModelSpec, StaticCatalog};
pub use context::{Message, MessageRole};
pub use error::{ContextError, ContextResult};
pub use tokens::{EstimateCounter, TokenCounter};
pub use truncate::{normalize, ContextTruncator, Truncation};
pub use window::TokenBudget;

/// Prelude for common imports
pub mod prelude {
    pub use crate::catalog::{ModelCatalog, ModelSpec, StaticCatalog};
    pub use crate::context::{Message, MessageRole};
    pub use crate::error::{ContextError, ContextResult};
    pub use crate::tokens::{EstimateCounter, TokenCounter};
    pub use crate::truncate::{ContextTruncator, Truncation};
    pub use crate::window::TokenBudget;
}

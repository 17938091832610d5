//! Error types for context fitting

use thiserror::Error;

/// Context fitting error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("system messages need {system_tokens} tokens but the budget is {budget}")]
    BudgetExceeded { system_tokens: usize, budget: usize },

    #[error("prompt needs {prompt_tokens} tokens but {model} accepts at most {limit}")]
    PromptTooLong {
        model: String,
        prompt_tokens: usize,
        limit: usize,
    },

    #[error("Token counting error: {0}")]
    TokenCountError(String),
}

/// Result type for context operations
pub type ContextResult<T> = Result<T, ContextError>;

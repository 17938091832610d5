//! Completion backend implementations
//!
//! Each upstream family gets its own [`CompletionBackend`](crate::CompletionBackend)
//! implementation; callers pick one and inject it into the orchestrator.

pub mod openai;

pub use openai::OpenAIBackend;

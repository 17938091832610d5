//! Parley Gateway - completion relay over HTTP
//!
//! This crate exposes the completion runtime to HTTP clients:
//! - Blocking and SSE-streamed chat completions
//! - The model catalog
//! - Health and Prometheus metrics endpoints

pub mod error;
pub mod metrics;
pub mod router;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use router::build_routes;
pub use state::AppState;

/// Gateway version
pub const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

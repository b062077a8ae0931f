//! HTTP request router for LLM Serve
//!
//! This crate exposes one POST endpoint per configured model path plus
//! `/health` and `/models`, and maps lifecycle manager errors onto HTTP
//! status codes.

pub mod error;
pub mod routes;
pub mod schema;
pub mod server;

// Re-export commonly used types
pub use error::ApiError;
pub use routes::{build_router, ModelBinding};
pub use schema::{GenerateRequestBody, GenerateResponseBody};
pub use server::ApiServer;

//! Shared types for the dispatch marketplace
//!
//! Domain models, request/response payloads and the unified error system used
//! by the server and by any client talking to it.

pub mod error;
pub mod models;
pub mod request;
pub mod response;
pub mod util;

// Re-exports
pub use axum::Json;
pub use http;
pub use serde::{Deserialize, Serialize};

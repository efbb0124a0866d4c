//! Data models for the execution engine.
//!
//! - `server` - target endpoint descriptors and backend tags
//! - `result` - backend-agnostic tabular results and cell formatting

pub mod result;
pub mod server;

pub use result::ResultTable;
pub use server::{BackendKind, Server};

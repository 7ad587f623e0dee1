//! Storage module for nethealth.
//!
//! Holds the shared model types, the in-memory check history and the
//! JSON-backed persistence gateway.

mod history;
mod models;
mod persist;

pub use history::*;
pub use models::*;
pub use persist::*;

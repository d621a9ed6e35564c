//! API models for the postgen service
//!
//! Shapes of the JSON bodies served by the generator backend. The updater
//! only reads `/api/health` and `/api/styles`; the generation models are kept
//! here so the whole surface lives in one place.

pub mod models;

pub use models::*;

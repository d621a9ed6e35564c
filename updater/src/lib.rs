//! Postgen Updater Library
//!
//! Update orchestration for the containerized postgen service: backup, fetch,
//! change classification, rebuild, restart, health check and rollback.

pub mod app;
pub mod context;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod lock;
pub mod logs;
pub mod storage;
pub mod utils;

//! Deployment module

pub mod backup;
pub mod classify;
pub mod compose;
pub mod fsm;
pub mod git;
pub mod health;
pub mod orchestrator;
pub mod process;
pub mod retry;

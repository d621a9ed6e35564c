//! Integration tests

mod common;
mod test_orchestrator;

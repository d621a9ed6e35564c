//! Command line application

pub mod options;
pub mod output;
pub mod run;

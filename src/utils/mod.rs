//! Shared helpers for logging and progress reporting

pub mod logging;

//! Logging utilities
//!
//! Standardized messages for the start and end of pipeline stages.

use std::time::Duration;

/// Log the start of a stage for one geography
pub fn log_operation_start(operation: &str, scope: &str) {
    log::info!("{operation} for {scope}");
}

/// Log the completion of a stage with the number of items it produced
pub fn log_operation_complete(operation: &str, scope: &str, items: usize, elapsed: Duration) {
    log::info!("Finished {operation} for {scope}: {items} items in {elapsed:?}");
}

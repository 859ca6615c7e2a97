//! Command handlers for the CLI application.
//!
//! - `encode` / `decode`: frame tools, no device needed
//! - `catalog`: preset and effect listings
//! - `simulate`: transfers against the simulated speaker
//! - `firmware`: image validation
//! - `config`: config file management

pub mod catalog;
pub mod config;
pub mod decode;
pub mod encode;
pub mod firmware;
pub mod simulate;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Result type for command handlers
pub type CommandResult = anyhow::Result<()>;

/// Set up a Ctrl-C handler that sets the returned flag when triggered
pub fn setup_interrupt_handler() -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);

    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }

    interrupted
}

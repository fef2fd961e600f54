// Crate root: declare modules and control visibility
pub mod bridge;
pub mod commands;
pub mod config;
pub mod debug;
pub mod elf_items;
pub mod engine;
pub mod error;
pub mod loader;
pub mod memory;
pub mod native;
pub mod protocol;
pub mod sim;
pub mod symbols;
pub mod utils;
pub mod xfer;

// Re-export commonly used API from the library for binaries/tests
pub use bridge::{Bridge, DebugBridge, TargetState};
pub use config::Config;
pub use error::{BridgeError, Result};

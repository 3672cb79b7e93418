//! Structured error types for symscope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! These errors stay inside the engine/provider boundary: the public
//! resolution API reports absence, never failure.

use thiserror::Error;

/// Errors from the process-wide debug-session slot.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A debug session is already active in this process")]
    Busy,
}

/// Errors from enumerating the loaded modules of the address space.
#[derive(Error, Debug)]
pub enum ModuleListError {
    #[error("Failed to read {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record in {path}: {record:?}")]
    MalformedRecord { path: String, record: String },

    #[error("No loadable modules found in the address-space snapshot")]
    Empty,
}

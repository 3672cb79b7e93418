//! Domain model for symscope
//!
//! This module contains core domain types and errors that provide:
//! - Self-documenting record types for resolved addresses
//! - Explicit absence (`Option`) instead of empty-string/zero sentinels
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{FunctionInfo, ModuleKind, ModuleRecord, SourceLocation, Symbol};

pub use errors::{ModuleListError, SessionError};

//! The seam between the resolution engine and a platform debug backend
//!
//! The engine only ever talks to a [`DebugProvider`]; the shipped backend is
//! [`crate::symbolization::DwarfProvider`], and tests substitute fakes.

use crate::domain::types::{FunctionInfo, SourceLocation};

/// Lifecycle state of a debug provider.
///
/// `Uninitialized → {Ready, Failed}` during `initialize`; `Failed` never
/// transitions on its own — only another `initialize` call retries. `Closed`
/// is terminal for the provider instance. (Initialization is synchronous, so
/// the transient in-between state is never observable.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Uninitialized,
    Ready,
    Failed,
    Closed,
}

/// Raw lookup result for one address.
///
/// Each field comes from an independent sub-query; any of them failing leaves
/// that field `None` without affecting the others.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressInfo {
    pub module: Option<String>,
    pub location: Option<SourceLocation>,
    pub function: Option<FunctionInfo>,
}

/// A platform backend that owns the debug session and answers address
/// queries.
pub trait DebugProvider {
    /// Bring the backend up. Idempotent: once the provider is ready, further
    /// calls are no-ops returning `true`. A failed attempt may be retried by
    /// calling again.
    fn initialize(&mut self) -> bool;

    /// Query module, source location and function info for one address.
    ///
    /// Never fails: missing information is reported as absent fields.
    fn lookup(&mut self, address: u64) -> AddressInfo;

    /// Tear the backend down, releasing the session and restoring any
    /// previously captured session state. Idempotent.
    fn shutdown(&mut self);

    fn state(&self) -> ProviderState;
}

//! Record types produced and consumed by the symbolication pipeline
//!
//! A [`Symbol`] is the outward-facing result for one queried address. Every
//! sub-result (owning module, source location, function) is optional: debug
//! information is routinely missing for parts of the address space, and a
//! partially filled record is a normal outcome, not an error.

use serde::Serialize;
use std::fmt;

/// A resolved (or partially resolved) description of one code address.
///
/// Once constructed, a `Symbol` is immutable; the engine hands out references
/// to the same record for every later query of the same address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    /// The queried instruction address.
    pub address: u64,
    /// Image name/path of the owning module, when one is registered for the
    /// address.
    pub module: Option<String>,
    /// Source file and line, when line records are available.
    pub location: Option<SourceLocation>,
    /// Function name and offset-into-function, when symbol info is available.
    pub function: Option<FunctionInfo>,
}

/// Source code location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

/// A function covering the queried address.
///
/// `offset` is the byte displacement of the queried address from the start of
/// the function; it only exists together with the name, so an absent function
/// can never carry a stale offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionInfo {
    pub name: String,
    pub offset: u64,
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.address)?;
        match &self.function {
            Some(function) => write!(f, " {} +0x{:x}", function.name, function.offset)?,
            None => write!(f, " <unknown>")?,
        }
        if let Some(module) = &self.module {
            write!(f, " ({module})")?;
        }
        if let Some(location) = &self.location {
            write!(f, " at {}:{}", location.file, location.line)?;
        }
        Ok(())
    }
}

/// Kind of a discovered module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModuleKind {
    /// An image mapped into userspace (executable or shared library).
    User,
    /// The kernel image or a loadable kernel module.
    Kernel,
}

/// One discovered module, as reported by module enumeration.
///
/// These records are ephemeral: the debug provider consumes them during
/// initialization to register each module and then discards them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleRecord {
    /// Image name or path.
    pub name: String,
    /// Base address the module is loaded at.
    pub base: u64,
    /// Size of the mapped image in bytes.
    pub size: u64,
    pub kind: ModuleKind,
}

impl ModuleRecord {
    /// Check if an address falls within this module's mapped range.
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address - self.base < self.size
    }
}

impl fmt::Display for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ 0x{:x}..0x{:x}",
            self.name,
            self.base,
            self.base.saturating_add(self.size)
        )
    }
}

//! # Symbol Resolution and Address Translation
//!
//! This module turns raw instruction-pointer addresses captured during stack
//! sampling into human-readable records: owning module, source file and
//! line, function name and offset into that function.
//!
//! ## The Symbolization Problem
//!
//! A sampled stack is a list of raw addresses like `0x55f3a2b4c780`. Turning
//! one into `worker::run at src/worker.rs:42, +0x23 into the function`
//! requires three independent pieces of information:
//! - which **module** (executable, shared library, kernel image) is mapped
//!   over that address, and at what base;
//! - the module's **DWARF line programs**, mapping image-relative addresses
//!   to file and line;
//! - the module's **symbol table**, mapping addresses to function starts.
//!
//! Any of the three can be missing — stripped binaries, anonymous mappings,
//! kernel space without privilege — so every lookup result is a partial
//! record, and a missing piece is an expected outcome rather than an error.
//!
//! ## Pipeline
//!
//! ```text
//!   resolve(address)
//!        │
//!        ▼
//!   SymbolEngine ──── cache hit ──▶ &Symbol (stable for the engine's life)
//!        │ miss
//!        ▼
//!   DebugProvider::initialize()     (lazy, idempotent, retried on demand)
//!        │  ├─ claim the process-wide session slot (evict + restore-later
//!        │  │  when a debugger already holds it)
//!        │  └─ ModuleEnumerator::enumerate() → register every module
//!        ▼
//!   DebugProvider::lookup(address)  (module / line / function sub-queries)
//! ```
//!
//! ## Address translation
//!
//! Position-independent images are loaded at a randomized base, while their
//! debug data speaks image-relative addresses; lookups rebase sampled
//! addresses against the owning module's base before consulting DWARF. The
//! kernel is anchored the same way through the `_text` symbol.

pub mod dwarf;
pub mod engine;
pub mod kallsyms;
pub mod modules;
pub mod provider;

pub use dwarf::DwarfProvider;
pub use engine::{EngineConfig, SymbolEngine};
pub use kallsyms::KernelSymbolTable;
pub use modules::{expand_module_path, ModuleEnumerator, ProcfsEnumerator, SYSROOT_ENV};
pub use provider::{AddressInfo, DebugProvider, ProviderState};

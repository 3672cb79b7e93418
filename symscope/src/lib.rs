//! # symscope - Address Symbolication for In-Process Profilers
//!
//! symscope is the symbolication subsystem of a sampling profiler: it turns
//! the raw instruction-pointer addresses a stack walker captures into
//! human-readable symbol records (owning module, source file and line,
//! function name and offset). It negotiates with the single process-wide
//! debug session, discovers every loaded module — including kernel modules
//! the process cannot see through its own listings — and degrades gracefully
//! wherever debug information is missing.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Stack Capture (collaborator)                │
//! │         hands the engine one 64-bit address at a time       │
//! └───────────────────────────┬─────────────────────────────────┘
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     symscope (this crate)                   │
//! │                                                             │
//! │  ┌──────────────┐    ┌───────────────┐   ┌──────────────┐  │
//! │  │ SymbolEngine │───▶│ DebugProvider │──▶│   Module     │  │
//! │  │ (cache +     │    │ (session +    │   │  Enumerator  │  │
//! │  │  retries)    │    │  lookups)     │   │  (procfs)    │  │
//! │  └──────────────┘    └───────┬───────┘   └──────────────┘  │
//! │                              │                              │
//! │                      ┌───────┴────────┐                     │
//! │                      │  SessionHost   │                     │
//! │                      │ (process-wide  │                     │
//! │                      │  slot, evict + │                     │
//! │                      │  restore)      │                     │
//! │                      └────────────────┘                     │
//! └───────────────────────────┬─────────────────────────────────┘
//!                             ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │               Reporting (collaborator)                      │
//! │     serializes Symbol records for captured stack frames     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`symbolization`]: the engine, the provider seam and its DWARF/procfs
//!   implementation, module discovery, and the kernel symbol table
//! - [`session`]: the process-wide debug-session slot with its
//!   capture/evict/restore protocol
//! - [`domain`]: record types ([`domain::Symbol`]) and structured errors
//!
//! ## Key Properties
//!
//! - **Lazy and idempotent**: nothing happens until the first address is
//!   resolved; a provider that failed to come up is re-attempted on demand.
//! - **Append-only cache**: an address that resolved once keeps returning
//!   the identical record for the lifetime of the engine.
//! - **Partial results are normal**: module without function, function
//!   without line info — whatever is known is reported, the rest is absent.
//! - **Polite to other consumers**: when a debugger already owns the debug
//!   session, it is evicted for the profiler's lifetime and its exact
//!   configuration is reinstated at shutdown.
//!
//! ## Typical Usage
//!
//! ```no_run
//! use symscope::symbolization::{DwarfProvider, SymbolEngine};
//!
//! let mut engine = SymbolEngine::new(Box::new(DwarfProvider::for_current_process()));
//! if let Some(symbol) = engine.resolve(0x55f3_a2b4_c780) {
//!     println!("{symbol}");
//! }
//! ```

pub mod domain;
pub mod session;
pub mod symbolization;

//! Process-wide debug-session state
//!
//! A process has exactly one debug-session slot: one consumer at a time may
//! own the loaded-module registry and drive symbol queries. Other consumers
//! (an attached debugger agent, a second profiler) share the same ambient
//! configuration — the option flags and the symbol search path — so a
//! consumer that takes the slot over is responsible for putting that
//! configuration back when it is done.
//!
//! [`SessionHost`] models the slot as an explicit resource instead of bare
//! process globals: the real process-wide instance comes from
//! [`SessionHost::process`], and tests inject their own host so session
//! negotiation is exercised without touching global state.
//!
//! All host state sits behind a mutex, which also serializes the
//! open/evict/restore dance when several threads race to initialize.

use bitflags::bitflags;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use crate::domain::errors::SessionError;

/// Upper bound on a captured search path, in bytes.
///
/// A snapshot taken for later restoration never stores more than this; the
/// restore is byte-for-byte for paths within the bound.
pub const MAX_SEARCH_PATH_LEN: usize = 2048;

/// Search path applied to fresh hosts when nothing else configured one.
const DEFAULT_SEARCH_PATH: &str = "/usr/lib/debug";

bitflags! {
    /// Load options for a debug session.
    ///
    /// These map to concrete behavior in the provider:
    /// deferred loads postpone parsing a module's debug info until the first
    /// address that hits it, line loading gates source-location queries,
    /// undecorate gates demangling, and the last two relax which modules and
    /// debug files are accepted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionOptions: u32 {
        /// Parse a module's debug info on first use, not at registration.
        const DEFERRED_LOADS = 1 << 0;
        /// Load line-number records.
        const LOAD_LINES = 1 << 1;
        /// Demangle function names.
        const UNDECORATE_NAMES = 1 << 2;
        /// Register 32-bit images on a 64-bit host.
        const INCLUDE_32BIT_MODULES = 1 << 3;
        /// Accept debug files whose build ID cannot be verified.
        const LOAD_ANYTHING = 1 << 4;
    }
}

impl SessionOptions {
    /// The load options a profiler wants: everything that makes lookups
    /// succeed more often, cost deferred to first use.
    #[must_use]
    pub fn aggressive() -> Self {
        Self::DEFERRED_LOADS
            | Self::LOAD_LINES
            | Self::UNDECORATE_NAMES
            | Self::INCLUDE_32BIT_MODULES
            | Self::LOAD_ANYTHING
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::empty()
    }
}

/// Ambient session configuration: option flags plus symbol search path.
///
/// The search path is a `:`-separated directory list consulted when a
/// module's debug info does not live next to the image itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub options: SessionOptions,
    pub search_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { options: SessionOptions::default(), search_path: DEFAULT_SEARCH_PATH.to_string() }
    }
}

struct HostState {
    active: bool,
    config: SessionConfig,
}

/// The per-process debug-session slot.
pub struct SessionHost {
    state: Mutex<HostState>,
}

static PROCESS_HOST: LazyLock<Arc<SessionHost>> = LazyLock::new(SessionHost::new);

impl SessionHost {
    /// Create a fresh, inactive host with default ambient configuration.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(HostState { active: false, config: SessionConfig::default() }) })
    }

    /// The host shared by the whole process.
    #[must_use]
    pub fn process() -> Arc<Self> {
        Arc::clone(&PROCESS_HOST)
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Capture the current ambient configuration.
    ///
    /// The search path is clamped to [`MAX_SEARCH_PATH_LEN`] bytes.
    #[must_use]
    pub fn snapshot(&self) -> SessionConfig {
        let state = self.state();
        SessionConfig {
            options: state.config.options,
            search_path: truncate_to_boundary(&state.config.search_path, MAX_SEARCH_PATH_LEN)
                .to_string(),
        }
    }

    /// Reinstate a previously captured configuration.
    pub fn apply(&self, config: &SessionConfig) {
        let mut state = self.state();
        state.config.options = config.options;
        state.config.search_path =
            truncate_to_boundary(&config.search_path, MAX_SEARCH_PATH_LEN).to_string();
    }

    #[must_use]
    pub fn options(&self) -> SessionOptions {
        self.state().config.options
    }

    pub fn set_options(&self, options: SessionOptions) {
        self.state().config.options = options;
    }

    #[must_use]
    pub fn search_path(&self) -> String {
        self.state().config.search_path.clone()
    }

    pub fn set_search_path(&self, search_path: &str) {
        self.state().config.search_path =
            truncate_to_boundary(search_path, MAX_SEARCH_PATH_LEN).to_string();
    }

    /// Claim the session slot.
    ///
    /// # Errors
    /// [`SessionError::Busy`] if another consumer already holds the slot.
    pub fn open(&self) -> Result<(), SessionError> {
        let mut state = self.state();
        if state.active {
            return Err(SessionError::Busy);
        }
        state.active = true;
        Ok(())
    }

    /// Release the session slot. Releasing an inactive slot is a no-op.
    pub fn close(&self) {
        self.state().active = false;
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state().active
    }
}

/// Cut `value` down to at most `max` bytes without splitting a character.
fn truncate_to_boundary(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

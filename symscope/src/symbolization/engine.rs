//! The symbol resolution engine
//!
//! [`SymbolEngine`] sits in front of a [`DebugProvider`] and owns the
//! address → [`Symbol`] cache. Provider initialization is lazy and driven by
//! the first lookups; when the provider cannot come up (say, a debugger holds
//! the debug session and eviction failed), the affected addresses stay
//! pending and every later query retries initialization from scratch, so a
//! provider that becomes available mid-run starts serving without any reset.
//!
//! The cache is append-only: an address that resolved once keeps returning
//! the identical record for the lifetime of the engine, even if its record is
//! only partially filled.

use log::{debug, warn};
use std::collections::HashMap;

use crate::domain::types::Symbol;
use crate::symbolization::provider::{DebugProvider, ProviderState};

/// Tuning knobs for [`SymbolEngine`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Bound on provider initialization attempts.
    ///
    /// `None` (the default) retries on demand forever: every cache miss while
    /// the provider is down re-attempts initialization. With `Some(n)`, the
    /// engine stops trying after `n` failed attempts and answers all further
    /// misses from the cache as unresolvable.
    pub max_init_attempts: Option<u32>,
}

impl EngineConfig {
    #[must_use]
    pub fn with_max_init_attempts(mut self, attempts: u32) -> Self {
        self.max_init_attempts = Some(attempts);
        self
    }
}

/// One cache slot.
///
/// `Pending` slots exist so that repeated queries for the same address
/// observe a stable entry while the provider is still unavailable; they are
/// upgraded exactly once, to `Resolved` or `Unresolvable`.
enum CacheEntry {
    Pending,
    Resolved(Symbol),
    Unresolvable,
}

enum ProviderStatus {
    Ready,
    Unavailable,
    GivenUp,
}

/// Address symbolication façade: cache plus provider orchestration.
pub struct SymbolEngine {
    provider: Box<dyn DebugProvider>,
    cache: HashMap<u64, CacheEntry>,
    config: EngineConfig,
    init_attempts: u32,
}

impl SymbolEngine {
    #[must_use]
    pub fn new(provider: Box<dyn DebugProvider>) -> Self {
        Self::with_config(provider, EngineConfig::default())
    }

    #[must_use]
    pub fn with_config(provider: Box<dyn DebugProvider>, config: EngineConfig) -> Self {
        Self { provider, cache: HashMap::new(), config, init_attempts: 0 }
    }

    /// Resolve one instruction address to a symbol record.
    ///
    /// Returns `None` for the null address, while the provider is
    /// unavailable, or once the give-up bound has been hit. A returned
    /// reference stays valid (and its record unchanged) for the lifetime of
    /// the engine. Partially filled records are returned as-is and never
    /// re-queried.
    pub fn resolve(&mut self, address: u64) -> Option<&Symbol> {
        if address == 0 {
            return None;
        }

        match self.cache.get(&address) {
            Some(CacheEntry::Resolved(_)) => {}
            Some(CacheEntry::Unresolvable) => return None,
            Some(CacheEntry::Pending) | None => {
                // Create the slot up front so repeated queries for this
                // address observe one stable entry across provider outages.
                self.cache.entry(address).or_insert(CacheEntry::Pending);
                match self.ensure_provider() {
                    ProviderStatus::Ready => {
                        let info = self.provider.lookup(address);
                        debug!(
                            "resolved 0x{address:x}: module={:?} function={:?}",
                            info.module,
                            info.function.as_ref().map(|f| &f.name)
                        );
                        self.cache.insert(
                            address,
                            CacheEntry::Resolved(Symbol {
                                address,
                                module: info.module,
                                location: info.location,
                                function: info.function,
                            }),
                        );
                    }
                    ProviderStatus::Unavailable => return None,
                    ProviderStatus::GivenUp => {
                        self.cache.insert(address, CacheEntry::Unresolvable);
                        return None;
                    }
                }
            }
        }

        match self.cache.get(&address) {
            Some(CacheEntry::Resolved(symbol)) => Some(symbol),
            _ => None,
        }
    }

    /// Bring the provider up if it is not already, honoring the configured
    /// attempt bound. All provider failures are absorbed here and reported
    /// through the log only.
    fn ensure_provider(&mut self) -> ProviderStatus {
        if self.provider.state() == ProviderState::Ready {
            return ProviderStatus::Ready;
        }
        if let Some(limit) = self.config.max_init_attempts {
            if self.init_attempts >= limit {
                return ProviderStatus::GivenUp;
            }
        }
        self.init_attempts += 1;
        if self.provider.initialize() {
            ProviderStatus::Ready
        } else {
            warn!("debug provider unavailable (attempt {})", self.init_attempts);
            ProviderStatus::Unavailable
        }
    }

    /// Number of provider initialization attempts made so far.
    #[must_use]
    pub fn init_attempts(&self) -> u32 {
        self.init_attempts
    }

    /// Number of addresses with a cache slot (resolved or not).
    #[must_use]
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Tear down the provider explicitly.
    ///
    /// Dropping the engine has the same effect through the provider's own
    /// teardown; this exists for callers that want a deterministic point at
    /// which session state is released and restored.
    pub fn shutdown(&mut self) {
        self.provider.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{FunctionInfo, SourceLocation};
    use crate::symbolization::provider::AddressInfo;

    /// Provider that fails initialization a scripted number of times, then
    /// serves synthetic records.
    struct ScriptedProvider {
        failures_left: u32,
        state: ProviderState,
        init_calls: u32,
        lookup_calls: u32,
    }

    impl ScriptedProvider {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: failures,
                state: ProviderState::Uninitialized,
                init_calls: 0,
                lookup_calls: 0,
            }
        }
    }

    impl DebugProvider for ScriptedProvider {
        fn initialize(&mut self) -> bool {
            self.init_calls += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                self.state = ProviderState::Failed;
                return false;
            }
            self.state = ProviderState::Ready;
            true
        }

        fn lookup(&mut self, address: u64) -> AddressInfo {
            self.lookup_calls += 1;
            AddressInfo {
                module: Some("/opt/app/bin/sampled".to_string()),
                location: Some(SourceLocation {
                    file: "src/lib.rs".to_string(),
                    line: u32::try_from(address & 0xffff).unwrap(),
                }),
                function: Some(FunctionInfo {
                    name: format!("fn_{address:x}"),
                    offset: address & 0xf,
                }),
            }
        }

        fn shutdown(&mut self) {
            self.state = ProviderState::Closed;
        }

        fn state(&self) -> ProviderState {
            self.state
        }
    }

    fn engine(failures: u32) -> SymbolEngine {
        SymbolEngine::new(Box::new(ScriptedProvider::new(failures)))
    }

    #[test]
    fn test_null_address_is_rejected_without_side_effects() {
        let mut engine = engine(0);
        assert!(engine.resolve(0).is_none());
        assert_eq!(engine.cached_entries(), 0);
        assert_eq!(engine.init_attempts(), 0);
    }

    #[test]
    fn test_resolved_entries_are_stable() {
        let mut engine = engine(0);
        let first = engine.resolve(0x1234).expect("should resolve").clone();
        let second = engine.resolve(0x1234).expect("should stay resolved");
        assert_eq!(&first, second);
        assert_eq!(engine.cached_entries(), 1);
    }

    #[test]
    fn test_failed_initialization_is_retried_per_query() {
        let mut engine = engine(u32::MAX);
        for attempt in 1..=3 {
            assert!(engine.resolve(0xabcd).is_none());
            assert_eq!(engine.init_attempts(), attempt);
        }
        // The pending slot never short-circuits later queries.
        assert_eq!(engine.cached_entries(), 1);
    }

    #[test]
    fn test_provider_recovery_after_outage() {
        let mut engine = engine(2);
        assert!(engine.resolve(0x4000).is_none());
        assert!(engine.resolve(0x4000).is_none());
        let symbol = engine.resolve(0x4000).expect("provider recovered");
        assert_eq!(symbol.address, 0x4000);
        assert_eq!(engine.init_attempts(), 3);
    }

    #[test]
    fn test_give_up_policy_stops_reinitialization() {
        let mut engine = SymbolEngine::with_config(
            Box::new(ScriptedProvider::new(u32::MAX)),
            EngineConfig::default().with_max_init_attempts(2),
        );
        for _ in 0..5 {
            assert!(engine.resolve(0x9000).is_none());
        }
        assert_eq!(engine.init_attempts(), 2);
        // New addresses are answered from the give-up state too.
        assert!(engine.resolve(0x9001).is_none());
        assert_eq!(engine.init_attempts(), 2);
    }

    #[test]
    fn test_offset_only_exists_with_a_function() {
        struct ModuleOnly;
        impl DebugProvider for ModuleOnly {
            fn initialize(&mut self) -> bool {
                true
            }
            fn lookup(&mut self, _address: u64) -> AddressInfo {
                AddressInfo { module: Some("/usr/lib/libz.so.1".to_string()), ..Default::default() }
            }
            fn shutdown(&mut self) {}
            fn state(&self) -> ProviderState {
                ProviderState::Ready
            }
        }

        let mut engine = SymbolEngine::new(Box::new(ModuleOnly));
        let symbol = engine.resolve(0x7000).expect("partial records still resolve");
        assert_eq!(symbol.module.as_deref(), Some("/usr/lib/libz.so.1"));
        assert!(symbol.function.is_none());
        assert!(symbol.location.is_none());
    }
}

//! Engine behavior against a scripted provider.
//!
//! These tests drive the public resolution contract end to end with a
//! deterministic in-memory backend: a small synthetic module whose function
//! and line layout is derived from the address, so every expectation is
//! exact.

use std::cell::Cell;
use std::rc::Rc;

use symscope::domain::{FunctionInfo, SourceLocation};
use symscope::symbolization::{
    AddressInfo, DebugProvider, EngineConfig, ProviderState, SymbolEngine,
};

const MODULE: &str = "/opt/app/bin/worker";
const MODULE_BASE: u64 = 0x1000;
const MODULE_END: u64 = 0x2000;

/// Provider serving one synthetic module at 0x1000..0x2000.
///
/// Functions are laid out one per 0x100 block, so two addresses in
/// different blocks resolve to different functions of the same module.
struct MapProvider {
    state: ProviderState,
    init_failures_left: u32,
    init_calls: Rc<Cell<u32>>,
    lookup_calls: Rc<Cell<u32>>,
}

impl MapProvider {
    fn new(init_failures: u32) -> Self {
        Self {
            state: ProviderState::Uninitialized,
            init_failures_left: init_failures,
            init_calls: Rc::new(Cell::new(0)),
            lookup_calls: Rc::new(Cell::new(0)),
        }
    }
}

impl DebugProvider for MapProvider {
    fn initialize(&mut self) -> bool {
        self.init_calls.set(self.init_calls.get() + 1);
        if self.state == ProviderState::Closed {
            return false;
        }
        if self.init_failures_left > 0 {
            self.init_failures_left -= 1;
            self.state = ProviderState::Failed;
            return false;
        }
        self.state = ProviderState::Ready;
        true
    }

    fn lookup(&mut self, address: u64) -> AddressInfo {
        self.lookup_calls.set(self.lookup_calls.get() + 1);
        if !(MODULE_BASE..MODULE_END).contains(&address) {
            return AddressInfo::default();
        }
        let block = (address - MODULE_BASE) / 0x100;
        AddressInfo {
            module: Some(MODULE.to_string()),
            location: Some(SourceLocation {
                file: "src/worker.rs".to_string(),
                line: u32::try_from(10 + block).unwrap(),
            }),
            function: Some(FunctionInfo {
                name: format!("worker::job_{block}"),
                offset: address & 0xff,
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

#[test]
fn test_two_addresses_in_one_module_resolve_independently() {
    let mut engine = SymbolEngine::new(Box::new(MapProvider::new(0)));

    let first = engine.resolve(0x1110).expect("first address should resolve").clone();
    let second = engine.resolve(0x1550).expect("second address should resolve").clone();

    assert_eq!(first.module, second.module);
    assert_eq!(first.module.as_deref(), Some(MODULE));

    assert_eq!(first.function.as_ref().unwrap().name, "worker::job_1");
    assert_eq!(second.function.as_ref().unwrap().name, "worker::job_5");
    assert_eq!(first.function.as_ref().unwrap().offset, 0x10);
    assert_eq!(second.function.as_ref().unwrap().offset, 0x50);
    assert_eq!(first.location.as_ref().unwrap().line, 11);
    assert_eq!(second.location.as_ref().unwrap().line, 15);
}

#[test]
fn test_null_address_never_touches_the_cache() {
    let provider = MapProvider::new(0);
    let init_calls = Rc::clone(&provider.init_calls);
    let mut engine = SymbolEngine::new(Box::new(provider));

    assert!(engine.resolve(0).is_none());
    assert!(engine.resolve(0).is_none());
    assert_eq!(engine.cached_entries(), 0);
    assert_eq!(init_calls.get(), 0);
}

#[test]
fn test_resolution_is_stable_and_cached() {
    let provider = MapProvider::new(0);
    let lookup_calls = Rc::clone(&provider.lookup_calls);
    let mut engine = SymbolEngine::new(Box::new(provider));

    let first = engine.resolve(0x1234).expect("should resolve").clone();
    let second = engine.resolve(0x1234).expect("should stay resolved");
    assert_eq!(&first, second);
    // The provider was consulted exactly once for this address.
    assert_eq!(lookup_calls.get(), 1);
}

#[test]
fn test_unavailable_provider_is_retried_on_every_query() {
    let provider = MapProvider::new(2);
    let init_calls = Rc::clone(&provider.init_calls);
    let mut engine = SymbolEngine::new(Box::new(provider));

    assert!(engine.resolve(0x1110).is_none());
    assert!(engine.resolve(0x1110).is_none());
    // Third query: initialization finally succeeds and the pending slot
    // resolves as if nothing had ever failed.
    let symbol = engine.resolve(0x1110).expect("provider recovered");
    assert_eq!(symbol.module.as_deref(), Some(MODULE));
    assert_eq!(init_calls.get(), 3);
    assert_eq!(engine.init_attempts(), 3);
}

#[test]
fn test_give_up_bound_caps_initialization_work() {
    let provider = MapProvider::new(u32::MAX);
    let init_calls = Rc::clone(&provider.init_calls);
    let mut engine = SymbolEngine::with_config(
        Box::new(provider),
        EngineConfig::default().with_max_init_attempts(1),
    );

    assert!(engine.resolve(0x1110).is_none());
    assert!(engine.resolve(0x1110).is_none());
    assert!(engine.resolve(0x1990).is_none());
    assert_eq!(init_calls.get(), 1);
}

#[test]
fn test_address_outside_every_module_still_resolves() {
    let mut engine = SymbolEngine::new(Box::new(MapProvider::new(0)));

    // Nothing is known about the address; the record exists anyway so the
    // outcome is cached and never re-queried.
    let symbol = engine.resolve(0xdead_0000).expect("unknown addresses yield empty records");
    assert!(symbol.module.is_none());
    assert!(symbol.location.is_none());
    assert!(symbol.function.is_none());
    assert_eq!(symbol.address, 0xdead_0000);
}

#[test]
fn test_shutdown_provider_yields_no_further_results() {
    let mut engine = SymbolEngine::new(Box::new(MapProvider::new(0)));
    assert!(engine.resolve(0x1110).is_some());
    engine.shutdown();

    // Already-resolved entries survive; new addresses cannot resolve because
    // a closed provider does not reinitialize.
    assert!(engine.resolve(0x1110).is_some());
    assert!(engine.resolve(0x1220).is_none());
}

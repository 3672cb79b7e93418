//! Resolve a few addresses from this binary's own text segment.
//!
//! Run with logging to watch the session come up and modules register:
//!
//! ```bash
//! RUST_LOG=debug cargo run --example resolve_self
//! ```

use anyhow::Result;
use symscope::symbolization::{DwarfProvider, SymbolEngine};

#[inline(never)]
fn simulate_sampled_work() -> u64 {
    std::hint::black_box(0xdead_beef_u64).rotate_left(7)
}

fn main() -> Result<()> {
    env_logger::init();

    let mut engine = SymbolEngine::new(Box::new(DwarfProvider::for_current_process()));

    // Stand-ins for addresses a stack walker would hand us.
    let sampled = [
        ("main", main as usize as u64),
        ("simulate_sampled_work", simulate_sampled_work as usize as u64),
        ("null frame", 0),
    ];

    for (label, address) in sampled {
        match engine.resolve(address) {
            Some(symbol) => println!("{label:>22}: {symbol}"),
            None => println!("{label:>22}: no symbol for 0x{address:x}"),
        }
    }

    // Keep the marker alive so it exists in the binary.
    let _ = simulate_sampled_work();

    engine.shutdown();
    Ok(())
}

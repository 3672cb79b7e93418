//! Kernel symbol table from /proc/kallsyms
//!
//! Kernel images rarely ship readable DWARF, so function names for
//! kernel-space addresses come from the kernel's own symbol list instead.
//! Addresses are stored relative to the `_text` symbol; entries for loadable
//! modules appear after the core image and may be out of address order, so
//! the table is sorted once at parse time.
//!
//! Without enough privilege the kernel reports every address as zero; the
//! table treats that as "unavailable" rather than producing garbage lookups.

use log::debug;
use std::fs;

const PROC_KALLSYMS: &str = "/proc/kallsyms";

/// Slack given to the final symbol, whose size is unknown.
const LAST_SYMBOL_SLACK: u64 = 0x1000;

/// Sorted `_text`-relative kernel symbol table.
pub struct KernelSymbolTable {
    base: u64,
    /// (relative address, name), sorted by address.
    symbols: Vec<(u64, String)>,
}

impl KernelSymbolTable {
    /// Build the table for the running kernel.
    ///
    /// Returns `None` when `/proc/kallsyms` is unreadable or the addresses
    /// in it are withheld.
    #[must_use]
    pub fn for_running_kernel() -> Option<Self> {
        let data = match fs::read_to_string(PROC_KALLSYMS) {
            Ok(data) => data,
            Err(err) => {
                debug!("{PROC_KALLSYMS} unreadable: {err}");
                return None;
            }
        };
        let table = Self::parse(&data);
        if table.is_none() {
            debug!("{PROC_KALLSYMS} contains no usable addresses");
        }
        table
    }

    /// Parse kallsyms-formatted data: `<hex address> <type> <name> [module]`.
    ///
    /// Symbols before the `_text` anchor are ignored; a zero `_text` address
    /// means the kernel withheld addresses and yields `None`.
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        let mut base: Option<u64> = None;
        let mut symbols: Vec<(u64, String)> = Vec::new();

        for line in data.lines() {
            let mut fields = line.split_whitespace();
            let (Some(address), Some(_kind), Some(name)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let Ok(address) = u64::from_str_radix(address, 16) else {
                continue;
            };
            match base {
                None => {
                    if name == "_text" {
                        if address == 0 {
                            return None;
                        }
                        base = Some(address);
                        symbols.push((0, "_text".to_string()));
                    }
                }
                Some(text) => {
                    // Module symbols can live below _text; those are kept out
                    // of this table and resolve through their own module.
                    if let Some(relative) = address.checked_sub(text) {
                        symbols.push((relative, name.to_string()));
                    }
                }
            }
        }

        let base = base?;
        symbols.sort_by(|a, b| a.0.cmp(&b.0));
        Some(Self { base, symbols })
    }

    /// Address of `_text`.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Extent of the covered address range, relative to `_text`.
    #[must_use]
    pub fn span(&self) -> u64 {
        match self.symbols.last() {
            Some((address, _)) => address.saturating_add(LAST_SYMBOL_SLACK),
            None => 0,
        }
    }

    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Nearest symbol at or below `address`, as `(name, offset from its
    /// start)`. `None` for addresses outside the covered range.
    #[must_use]
    pub fn lookup(&self, address: u64) -> Option<(&str, u64)> {
        let relative = address.checked_sub(self.base)?;
        if relative >= self.span() {
            return None;
        }
        let index = self.symbols.partition_point(|&(start, _)| start <= relative);
        if index == 0 {
            return None;
        }
        let (start, name) = &self.symbols[index - 1];
        Some((name, relative - start))
    }
}

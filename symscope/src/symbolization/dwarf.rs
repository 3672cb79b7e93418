//! DWARF-backed debug provider for the current process
//!
//! This is the shipped [`DebugProvider`]: it negotiates for the process-wide
//! session slot, registers every module reported by enumeration, and answers
//! address queries from per-module debug data.
//!
//! Session negotiation follows the take-over protocol: the ambient
//! configuration is captured before it is overwritten, and when the slot is
//! already held (an attached debugger, another profiler) the holder is
//! evicted and the captured configuration is reinstated at shutdown so the
//! evicted consumer finds its session exactly as it left it.
//!
//! Per-module debug data is expensive, so with `DEFERRED_LOADS` a module's
//! image is read and parsed only when the first address hits it. Line
//! records come from the DWARF line programs via `addr2line`; function names
//! and offsets come from the ELF symbol table, with `/proc/kallsyms` as the
//! fallback for kernel-space addresses.

use addr2line::Context;
use gimli::{EndianRcSlice, RunTimeEndian};
use log::{debug, info, warn};
use object::{Object, ObjectKind, ObjectSection, ObjectSymbol, SymbolKind};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use crate::domain::errors::SessionError;
use crate::domain::types::{FunctionInfo, ModuleKind, ModuleRecord, SourceLocation};
use crate::session::{SessionConfig, SessionHost, SessionOptions};
use crate::symbolization::kallsyms::KernelSymbolTable;
use crate::symbolization::modules::{ModuleEnumerator, ProcfsEnumerator};
use crate::symbolization::provider::{AddressInfo, DebugProvider, ProviderState};

type DwarfContext = Context<EndianRcSlice<RunTimeEndian>>;

/// Parsed debug data for one module.
struct DebugData {
    /// Line-record context; `None` when the module has no DWARF.
    ctx: Option<DwarfContext>,
    /// (image-relative address, raw name), sorted by address.
    symbols: Vec<(u64, String)>,
    /// Whether queried addresses must be rebased against the load base
    /// (position-independent images) before consulting the debug data.
    rebase: bool,
}

enum DebugState {
    Pending,
    Loaded(Box<DebugData>),
    Unavailable,
}

struct LoadedModule {
    record: ModuleRecord,
    debug: DebugState,
}

/// The DWARF/procfs debug provider.
pub struct DwarfProvider {
    host: Arc<SessionHost>,
    enumerator: Box<dyn ModuleEnumerator>,
    options: SessionOptions,
    state: ProviderState,
    /// Whether this provider currently holds the session slot (it keeps
    /// holding it across a failed module enumeration, which is retried).
    session_open: bool,
    /// Set once another consumer has been evicted from the slot.
    restore_on_shutdown: bool,
    /// Ambient configuration captured before the first open attempt.
    saved: Option<SessionConfig>,
    /// Registered modules, sorted by base address.
    modules: Vec<LoadedModule>,
    kernel_symbols: Option<KernelSymbolTable>,
}

impl DwarfProvider {
    /// Provider over the process-wide session host and procfs enumeration.
    #[must_use]
    pub fn for_current_process() -> Self {
        Self::new(SessionHost::process(), Box::new(ProcfsEnumerator::new()))
    }

    /// Provider with an injected host and enumerator.
    #[must_use]
    pub fn new(host: Arc<SessionHost>, enumerator: Box<dyn ModuleEnumerator>) -> Self {
        Self {
            host,
            enumerator,
            options: SessionOptions::aggressive(),
            state: ProviderState::Uninitialized,
            session_open: false,
            restore_on_shutdown: false,
            saved: None,
            modules: Vec::new(),
            kernel_symbols: None,
        }
    }

    /// Override the load options applied when the session opens.
    #[must_use]
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Number of registered modules.
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    fn populate_modules(&mut self) -> bool {
        let records = match self.enumerator.enumerate() {
            Ok(records) => records,
            Err(err) => {
                // Fatal to this attempt only: the session stays open and the
                // next initialize call retries the discovery.
                warn!("module discovery failed: {err}");
                self.state = ProviderState::Failed;
                return false;
            }
        };
        self.register_modules(records);
        self.kernel_symbols = KernelSymbolTable::for_running_kernel();
        self.state = ProviderState::Ready;
        true
    }

    fn register_modules(&mut self, records: Vec<ModuleRecord>) {
        let deferred = self.options.contains(SessionOptions::DEFERRED_LOADS);
        let search_path = self.host.search_path();
        let options = self.options;
        let mut modules: Vec<LoadedModule> = records
            .into_iter()
            .map(|record| {
                let debug = if deferred {
                    DebugState::Pending
                } else {
                    match load_debug_data(&record, options, &search_path) {
                        Some(data) => DebugState::Loaded(Box::new(data)),
                        None => DebugState::Unavailable,
                    }
                };
                LoadedModule { record, debug }
            })
            .collect();
        modules.sort_by(|a, b| a.record.base.cmp(&b.record.base));
        info!("registered {} modules with the debug session", modules.len());
        self.modules = modules;
    }

    /// Index of the registered module containing `address`.
    fn module_index(&self, address: u64) -> Option<usize> {
        let index = self.modules.partition_point(|module| module.record.base <= address);
        if index == 0 {
            return None;
        }
        self.modules[index - 1].record.contains(address).then_some(index - 1)
    }

    fn ensure_debug_loaded(&mut self, index: usize) {
        if matches!(self.modules[index].debug, DebugState::Pending) {
            let search_path = self.host.search_path();
            let loaded = load_debug_data(&self.modules[index].record, self.options, &search_path);
            self.modules[index].debug = match loaded {
                Some(data) => DebugState::Loaded(Box::new(data)),
                None => DebugState::Unavailable,
            };
        }
    }
}

impl DebugProvider for DwarfProvider {
    fn initialize(&mut self) -> bool {
        match self.state {
            ProviderState::Ready => return true,
            ProviderState::Closed => return false,
            ProviderState::Uninitialized | ProviderState::Failed => {}
        }

        if self.session_open {
            // A previous attempt opened the session but module discovery
            // failed; only the discovery is retried.
            return self.populate_modules();
        }

        // Capture the ambient configuration before overwriting it.
        let previous = self.host.snapshot();
        self.saved = Some(previous.clone());
        self.host.set_options(previous.options | self.options);

        let clean_open = match self.host.open() {
            Ok(()) => true,
            Err(SessionError::Busy) => {
                info!("debug session already active in this process; taking it over");
                self.restore_on_shutdown = true;
                self.host.close();
                if self.host.open().is_err() {
                    self.state = ProviderState::Failed;
                    return false;
                }
                false
            }
        };
        self.session_open = true;

        if clean_open {
            self.populate_modules()
        } else {
            // Take-over path: the evicted consumer's module registrations
            // are gone and are not re-enumerated here; deferred loading
            // serves whatever later queries can still reach.
            self.state = ProviderState::Ready;
            true
        }
    }

    fn lookup(&mut self, address: u64) -> AddressInfo {
        let mut info = AddressInfo::default();
        if self.state != ProviderState::Ready {
            return info;
        }

        if let Some(index) = self.module_index(address) {
            info.module = Some(self.modules[index].record.name.clone());
            self.ensure_debug_loaded(index);

            let options = self.options;
            let module = &self.modules[index];
            if let DebugState::Loaded(data) = &module.debug {
                let svma = if data.rebase { address - module.record.base } else { address };
                if options.contains(SessionOptions::LOAD_LINES) {
                    if let Some(ctx) = &data.ctx {
                        if let Ok(Some(location)) = ctx.find_location(svma) {
                            if let (Some(file), Some(line)) = (location.file, location.line) {
                                info.location =
                                    Some(SourceLocation { file: file.to_string(), line });
                            }
                        }
                    }
                }
                if let Some((name, offset)) = nearest_symbol(&data.symbols, svma) {
                    let name = if options.contains(SessionOptions::UNDECORATE_NAMES) {
                        demangle_name(name)
                    } else {
                        name.to_string()
                    };
                    info.function = Some(FunctionInfo { name, offset });
                }
            }
        }

        // Kernel-space addresses resolve their function through kallsyms
        // when the owning module carries no readable debug data.
        if info.function.is_none() {
            if let Some(table) = &self.kernel_symbols {
                if let Some((name, offset)) = table.lookup(address) {
                    info.function = Some(FunctionInfo { name: name.to_string(), offset });
                }
            }
        }

        info
    }

    fn shutdown(&mut self) {
        if self.state == ProviderState::Closed {
            return;
        }
        if self.session_open {
            self.host.close();
            self.session_open = false;
        }
        if self.restore_on_shutdown {
            if let Some(previous) = self.saved.take() {
                // Leave the slot exactly as the evicted consumer had it:
                // its configuration, with its session re-established.
                self.host.apply(&previous);
                if self.host.open().is_err() {
                    warn!("could not re-establish the previous debug session");
                }
            }
            self.restore_on_shutdown = false;
        }
        self.modules.clear();
        self.kernel_symbols = None;
        self.state = ProviderState::Closed;
    }

    fn state(&self) -> ProviderState {
        self.state
    }
}

impl Drop for DwarfProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Nearest symbol at or below `svma`, as `(raw name, offset from its start)`.
fn nearest_symbol(symbols: &[(u64, String)], svma: u64) -> Option<(&str, u64)> {
    let index = symbols.partition_point(|&(address, _)| address <= svma);
    if index == 0 {
        return None;
    }
    let (start, name) = &symbols[index - 1];
    Some((name, svma - start))
}

fn demangle_name(raw: &str) -> String {
    format!("{:#}", rustc_demangle::demangle(raw))
}

/// Read and parse everything needed to answer queries for one module.
///
/// The image itself supplies the symbol table and, when present, the DWARF
/// line programs; otherwise the search path is consulted for a sidecar
/// debug file. Kernel modules are not parsed at all — their text resolves
/// through the kallsyms table.
fn load_debug_data(
    record: &ModuleRecord,
    options: SessionOptions,
    search_path: &str,
) -> Option<DebugData> {
    if record.kind == ModuleKind::Kernel {
        return None;
    }
    let image_path = Path::new(&record.name);
    let image = fs::read(image_path).ok();

    let mut symbols = Vec::new();
    let mut ctx = None;
    let mut rebase = false;
    let mut image_build_id: Option<Vec<u8>> = None;

    if let Some(data) = &image {
        if let Ok(obj) = object::File::parse(&**data) {
            if !obj.is_64() && !options.contains(SessionOptions::INCLUDE_32BIT_MODULES) {
                debug!("skipping 32-bit image {}", record.name);
                return None;
            }
            rebase = obj.kind() == ObjectKind::Dynamic;
            image_build_id = obj.build_id().ok().flatten().map(<[u8]>::to_vec);
            symbols = collect_text_symbols(&obj);
            if has_line_sections(&obj) {
                ctx = dwarf_context(&obj);
            }
        }
    }

    if ctx.is_none() {
        for candidate in debug_file_candidates(image_path, search_path) {
            let Ok(data) = fs::read(&candidate) else {
                continue;
            };
            let Ok(obj) = object::File::parse(&*data) else {
                continue;
            };
            if !build_id_matches(image_build_id.as_deref(), &obj)
                && !options.contains(SessionOptions::LOAD_ANYTHING)
            {
                debug!("build id mismatch for {}", candidate.display());
                continue;
            }
            if !has_line_sections(&obj) {
                continue;
            }
            if symbols.is_empty() {
                symbols = collect_text_symbols(&obj);
            }
            if image.is_none() {
                rebase = obj.kind() == ObjectKind::Dynamic;
            }
            ctx = dwarf_context(&obj);
            if ctx.is_some() {
                info!("debug info for {} found at {}", record.name, candidate.display());
                break;
            }
        }
    }

    if ctx.is_none() && symbols.is_empty() {
        debug!("no debug data for {}", record.name);
        return None;
    }
    Some(DebugData { ctx, symbols, rebase })
}

/// Owned, sorted function symbols from the symbol tables of an image.
fn collect_text_symbols(obj: &object::File) -> Vec<(u64, String)> {
    let mut symbols: Vec<(u64, String)> = obj
        .symbols()
        .chain(obj.dynamic_symbols())
        .filter(|symbol| symbol.is_definition() && symbol.kind() == SymbolKind::Text)
        .filter_map(|symbol| Some((symbol.address(), symbol.name().ok()?.to_string())))
        .collect();
    symbols.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    symbols.dedup_by(|a, b| a.0 == b.0);
    symbols
}

fn has_line_sections(obj: &object::File) -> bool {
    obj.section_by_name(".debug_line").is_some()
        || obj.section_by_name(".zdebug_line").is_some()
}

/// Build an `addr2line` context by copying the DWARF sections out of the
/// object, so the context owns its data independently of the file buffer.
fn dwarf_context(obj: &object::File) -> Option<DwarfContext> {
    let endian =
        if obj.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

    let load_section = |id: gimli::SectionId| -> Result<EndianRcSlice<RunTimeEndian>, gimli::Error> {
        let data = obj
            .section_by_name(id.name())
            .and_then(|section| section.uncompressed_data().ok())
            .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
        Ok(EndianRcSlice::new(Rc::from(&*data), endian))
    };

    let dwarf = gimli::Dwarf::load(&load_section).ok()?;
    Context::from_dwarf(dwarf).ok()
}

fn build_id_matches(expected: Option<&[u8]>, obj: &object::File) -> bool {
    match expected {
        // Without a reference build ID there is nothing to verify against.
        None => true,
        Some(expected) => obj.build_id().ok().flatten() == Some(expected),
    }
}

/// Places a module's sidecar debug file may live, in search order.
fn debug_file_candidates(image: &Path, search_path: &str) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    let Some(file_name) = image.file_name() else {
        return candidates;
    };
    for dir in search_path.split(':').filter(|dir| !dir.is_empty()) {
        let dir = Path::new(dir);
        candidates.push(dir.join(file_name));
        let mut with_ext = file_name.to_os_string();
        with_ext.push(".debug");
        candidates.push(dir.join(with_ext));
    }
    candidates
}

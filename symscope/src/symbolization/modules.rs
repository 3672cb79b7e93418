//! Module discovery for the current address space
//!
//! Symbol queries can only resolve against modules the session knows about,
//! so initialization walks everything that is mapped: userspace images from
//! `/proc/self/maps`, loadable kernel modules from `/proc/modules`, and the
//! kernel image itself anchored through `/proc/kallsyms`. Kernel modules are
//! invisible to ordinary process-local listings, which is exactly why a
//! profiler has to ask the system-wide sources for them.
//!
//! The userspace snapshot is all-or-nothing: one malformed mapping record
//! fails the whole enumeration rather than producing a silently partial
//! module list. The kernel-side sources degrade as a group (they routinely
//! require privilege) and their absence is reported through the log.
//!
//! Kernel modules are named by bare module name; their on-disk path is
//! resolved through `modules.dep` and expanded against the modules tree
//! under the system root, which is taken from the environment at enumeration
//! time (`SYMSCOPE_SYSROOT`, defaulting to `/`).

use log::{debug, warn};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::errors::ModuleListError;
use crate::domain::types::{ModuleKind, ModuleRecord};
use crate::symbolization::kallsyms::KernelSymbolTable;

const PROC_MAPS: &str = "/proc/self/maps";
const PROC_MODULES: &str = "/proc/modules";
const PROC_OSRELEASE: &str = "/proc/sys/kernel/osrelease";

/// Environment variable holding the system root used to expand kernel
/// module paths (useful under chroots and containers).
pub const SYSROOT_ENV: &str = "SYMSCOPE_SYSROOT";

/// Discovers every module currently loaded, one snapshot per call.
pub trait ModuleEnumerator {
    /// Produce one finite snapshot of (name, base, size) records.
    ///
    /// # Errors
    /// Fails when the address-space snapshot cannot be taken or parsed;
    /// a failed enumeration reports no modules at all.
    fn enumerate(&self) -> Result<Vec<ModuleRecord>, ModuleListError>;
}

/// procfs-backed enumerator for the current process and the running kernel.
pub struct ProcfsEnumerator {
    sysroot: Option<PathBuf>,
}

impl ProcfsEnumerator {
    /// Enumerator using the ambient system root (environment or `/`).
    #[must_use]
    pub fn new() -> Self {
        Self { sysroot: None }
    }

    /// Enumerator with a fixed system root, ignoring the environment.
    #[must_use]
    pub fn with_sysroot(sysroot: impl Into<PathBuf>) -> Self {
        Self { sysroot: Some(sysroot.into()) }
    }

    fn effective_sysroot(&self) -> PathBuf {
        match &self.sysroot {
            Some(sysroot) => sysroot.clone(),
            None => env::var_os(SYSROOT_ENV)
                .map_or_else(|| PathBuf::from("/"), PathBuf::from),
        }
    }

    fn kernel_records(&self) -> Result<Vec<ModuleRecord>, ModuleListError> {
        let mut records = Vec::new();

        if let Some(table) = KernelSymbolTable::for_running_kernel() {
            records.push(ModuleRecord {
                name: "vmlinux".to_string(),
                base: table.base(),
                size: table.span(),
                kind: ModuleKind::Kernel,
            });
        }

        let modules = fs::read_to_string(PROC_MODULES).map_err(|source| {
            ModuleListError::Unreadable { path: PROC_MODULES.to_string(), source }
        })?;
        let path_index = module_path_index(&self.effective_sysroot());

        for line in modules.lines() {
            let (name, size, base) = parse_proc_modules_record(line)?;
            if base == 0 {
                // The kernel withholds load addresses without privilege.
                debug!("skipping kernel module {name}: load address withheld");
                continue;
            }
            let name = match &path_index {
                Some((root, index)) => match index.get(&name) {
                    Some(relative) => expand_module_path(relative, root).display().to_string(),
                    None => name,
                },
                None => name,
            };
            records.push(ModuleRecord { name, base, size, kind: ModuleKind::Kernel });
        }

        Ok(records)
    }
}

impl Default for ProcfsEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleEnumerator for ProcfsEnumerator {
    fn enumerate(&self) -> Result<Vec<ModuleRecord>, ModuleListError> {
        let maps = fs::read_to_string(PROC_MAPS)
            .map_err(|source| ModuleListError::Unreadable { path: PROC_MAPS.to_string(), source })?;
        let mut records = parse_proc_maps(&maps)?;
        if records.is_empty() {
            return Err(ModuleListError::Empty);
        }

        match self.kernel_records() {
            Ok(mut kernel) => records.append(&mut kernel),
            Err(err) => warn!("kernel-side module discovery unavailable: {err}"),
        }

        records.sort_by(|a, b| a.base.cmp(&b.base));
        Ok(records)
    }
}

/// Parse a `/proc/<pid>/maps` snapshot into per-image module records.
///
/// All mappings backed by the same file are folded into one record spanning
/// from the lowest base to the highest end, which is the range symbol
/// queries compare addresses against. Anonymous and pseudo mappings
/// (`[heap]`, `[stack]`, ...) carry no image and are skipped.
pub(crate) fn parse_proc_maps(maps: &str) -> Result<Vec<ModuleRecord>, ModuleListError> {
    let malformed = |line: &str| ModuleListError::MalformedRecord {
        path: PROC_MAPS.to_string(),
        record: line.to_string(),
    };

    let mut spans: HashMap<String, (u64, u64)> = HashMap::new();

    for line in maps.lines() {
        // "start-end perms offset dev inode pathname"
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            return Err(malformed(line));
        }
        let (start, end) = fields[0].split_once('-').ok_or_else(|| malformed(line))?;
        let start = u64::from_str_radix(start, 16).map_err(|_| malformed(line))?;
        let end = u64::from_str_radix(end, 16).map_err(|_| malformed(line))?;
        if end < start {
            return Err(malformed(line));
        }

        let path = fields[5..].join(" ");
        let path = path.strip_suffix(" (deleted)").unwrap_or(&path);
        if !path.starts_with('/') {
            continue;
        }

        let span = spans.entry(path.to_string()).or_insert((start, end));
        span.0 = span.0.min(start);
        span.1 = span.1.max(end);
    }

    let mut records: Vec<ModuleRecord> = spans
        .into_iter()
        .map(|(name, (start, end))| ModuleRecord {
            name,
            base: start,
            size: end - start,
            kind: ModuleKind::User,
        })
        .collect();
    records.sort_by(|a, b| a.base.cmp(&b.base));
    Ok(records)
}

/// Parse one `/proc/modules` record into (name, size, load address).
fn parse_proc_modules_record(line: &str) -> Result<(String, u64, u64), ModuleListError> {
    let malformed = || ModuleListError::MalformedRecord {
        path: PROC_MODULES.to_string(),
        record: line.to_string(),
    };

    // "name size refcount deps state address"
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return Err(malformed());
    }
    let size: u64 = fields[1].parse().map_err(|_| malformed())?;
    let address = fields[5].strip_prefix("0x").ok_or_else(malformed)?;
    let address = u64::from_str_radix(address, 16).map_err(|_| malformed())?;
    Ok((fields[0].to_string(), size, address))
}

/// Expand a module path against the modules tree it is relative to.
///
/// `modules.dep` records paths relative to `/lib/modules/<release>`
/// (`kernel/...`); those are joined onto the given root. Already-absolute
/// names pass through unchanged.
#[must_use]
pub fn expand_module_path(name: &str, modules_root: &Path) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        modules_root.join(path)
    }
}

/// Build the module-name → relative-path index from `modules.dep`.
///
/// Returns the modules-tree root alongside the index so callers can expand
/// the relative paths. `None` when the tree or the running release cannot be
/// determined; bare module names are reported in that case.
fn module_path_index(sysroot: &Path) -> Option<(PathBuf, HashMap<String, String>)> {
    let release = fs::read_to_string(PROC_OSRELEASE).ok()?;
    let root = sysroot.join("lib/modules").join(release.trim());
    let dep = fs::read_to_string(root.join("modules.dep")).ok()?;

    let mut index = HashMap::new();
    for line in dep.lines() {
        let Some((path, _)) = line.split_once(':') else {
            continue;
        };
        if let Some(stem) = module_stem(path) {
            index.insert(stem, path.to_string());
        }
    }
    Some((root, index))
}

/// Module name for an on-disk module file: file name up to `.ko`, with
/// dashes folded to underscores the way the kernel reports loaded modules.
fn module_stem(path: &str) -> Option<String> {
    let file_name = Path::new(path).file_name()?.to_str()?;
    let stem = match file_name.find(".ko") {
        Some(end) => &file_name[..end],
        None => file_name,
    };
    Some(stem.replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_proc_maps_groups_per_image() {
        let maps = "\
55e8a8c00000-55e8a8c2e000 r--p 00000000 103:02 2621553 /usr/bin/sampled
55e8a8c2e000-55e8a8d00000 r-xp 0002e000 103:02 2621553 /usr/bin/sampled
7f1c80000000-7f1c80021000 rw-p 00000000 00:00 0
7f1c84000000-7f1c84028000 r--p 00000000 103:02 31343 /usr/lib/libc.so.6
7ffc1d000000-7ffc1d021000 rw-p 00000000 00:00 0 [stack]
";
        let records = parse_proc_maps(maps).expect("snapshot should parse");
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].name, "/usr/bin/sampled");
        assert_eq!(records[0].base, 0x55e8_a8c0_0000);
        assert_eq!(records[0].size, 0x10_0000);
        assert_eq!(records[0].kind, ModuleKind::User);

        assert_eq!(records[1].name, "/usr/lib/libc.so.6");
        assert_eq!(records[1].size, 0x2_8000);
    }

    #[test]
    fn test_parse_proc_maps_strips_deleted_marker() {
        let maps =
            "7f1c84000000-7f1c84001000 r-xp 00000000 103:02 31343 /tmp/patched.so (deleted)\n";
        let records = parse_proc_maps(maps).expect("snapshot should parse");
        assert_eq!(records[0].name, "/tmp/patched.so");
    }

    #[test]
    fn test_parse_proc_maps_rejects_malformed_records() {
        assert!(matches!(
            parse_proc_maps("not a mapping at all\n"),
            Err(ModuleListError::MalformedRecord { .. })
        ));
        assert!(matches!(
            parse_proc_maps("55e8-xyz r--p 00000000 103:02 1 /usr/bin/sampled\n"),
            Err(ModuleListError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_parse_proc_modules_record() {
        let (name, size, base) = parse_proc_modules_record(
            "nvme 57344 3 nvme_core, Live 0xffffffffc0500000",
        )
        .expect("record should parse");
        assert_eq!(name, "nvme");
        assert_eq!(size, 57344);
        assert_eq!(base, 0xffff_ffff_c050_0000);

        // Unprivileged reads report a zero address; that is still well-formed.
        let (_, _, base) =
            parse_proc_modules_record("nvme 57344 3 nvme_core, Live 0x0000000000000000")
                .expect("record should parse");
        assert_eq!(base, 0);

        assert!(parse_proc_modules_record("nvme 57344").is_err());
        assert!(parse_proc_modules_record("nvme xyz 3 -, Live 0x0").is_err());
    }

    #[test]
    fn test_expand_module_path() {
        let root = Path::new("/lib/modules/6.8.0-45-generic");
        assert_eq!(
            expand_module_path("kernel/drivers/nvme/host/nvme.ko.zst", root),
            PathBuf::from("/lib/modules/6.8.0-45-generic/kernel/drivers/nvme/host/nvme.ko.zst")
        );
        // Absolute names pass through unchanged.
        assert_eq!(
            expand_module_path("/opt/drivers/custom.ko", root),
            PathBuf::from("/opt/drivers/custom.ko")
        );
    }

    #[test]
    fn test_module_stem_matches_kernel_naming() {
        assert_eq!(
            module_stem("kernel/sound/pci/hda/snd-hda-intel.ko.xz"),
            Some("snd_hda_intel".to_string())
        );
        assert_eq!(module_stem("kernel/fs/xfs/xfs.ko"), Some("xfs".to_string()));
    }

    #[test]
    fn test_enumerate_with_unusable_sysroot_still_reports_userspace() {
        // A bogus system root only affects kernel module path expansion;
        // the userspace snapshot is unaffected.
        let records = ProcfsEnumerator::with_sysroot("/nonexistent-sysroot")
            .enumerate()
            .expect("self snapshot");
        assert!(records.iter().any(|record| record.kind == ModuleKind::User));
    }

    #[test]
    fn test_enumerate_own_process() {
        // The userspace snapshot of the test process itself should always
        // contain at least the test binary; kernel records depend on the
        // environment and may be absent.
        let records = ProcfsEnumerator::new().enumerate().expect("self snapshot");
        assert!(!records.is_empty());
        assert!(records.windows(2).all(|pair| pair[0].base <= pair[1].base));
        assert!(records.iter().any(|record| record.kind == ModuleKind::User));
    }
}

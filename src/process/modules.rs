use lazy_static::lazy_static;
use log::*;
use proc_maps::get_process_maps;
use regex::Regex;
use remoteprocess::Pid;
use std::path::{Path, PathBuf};

use crate::binary_parser::DebugInfoConfig;
use crate::error::ResolveError;

lazy_static! {
    static ref SHARED_LIBRARY: Regex = Regex::new(r"\.so(\.\d+)*$").unwrap();
}

/// What kind of image a module is, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// The process's main executable.
    Executable,
    /// A shared library.
    SharedLibrary,
    /// A synthetic mapping with no backing file, like `[vdso]`.
    Synthetic,
    /// Any other file-backed mapping.
    Other,
}

/// One binary image mapped into the target process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Short name, the backing file's basename or the pseudo-map label.
    pub name: String,
    /// Path to the backing file on disk; absent for synthetic mappings.
    pub path: Option<PathBuf>,
    /// Start address of the module's lowest mapping.
    pub load_bias: u64,
    /// What kind of image this is.
    pub kind: ModuleKind,
}

impl Module {
    fn backed(path: &Path, load_bias: u64, exe: &str) -> Module {
        let display = path.to_string_lossy();
        let kind = if display == exe {
            ModuleKind::Executable
        } else if is_shared_library(path) {
            ModuleKind::SharedLibrary
        } else {
            ModuleKind::Other
        };
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| display.into_owned());
        Module {
            name,
            path: Some(path.to_path_buf()),
            load_bias,
            kind,
        }
    }
}

/// Returns `true` if the file at `path` looks like a shared library.
pub fn is_shared_library(path: &Path) -> bool {
    SHARED_LIBRARY.is_match(&path.to_string_lossy())
}

/// Produces the ordered list of modules mapped into a process.
pub struct ModuleEnumerator {
    debug_info: DebugInfoConfig,
}

impl ModuleEnumerator {
    /// Constructs an enumerator that locates detached debug files with the
    /// given configuration.
    pub fn new(debug_info: DebugInfoConfig) -> Self {
        ModuleEnumerator { debug_info }
    }

    /// The debug-info configuration modules should be parsed with.
    pub fn debug_info(&self) -> &DebugInfoConfig {
        &self.debug_info
    }

    /// Lists the modules currently mapped into process `pid`, in the order
    /// the operating system reports their mappings. The list is rebuilt on
    /// every call; the target process is never paused or modified.
    pub fn enumerate(&self, pid: Pid) -> Result<Vec<Module>, ResolveError> {
        let process = remoteprocess::Process::new(pid).map_err(|err| access_error(pid, err))?;
        let exe = process.exe().map_err(|err| access_error(pid, err))?;

        let maps = get_process_maps(pid).map_err(|err| match probe_process(pid) {
            ProcessProbe::Alive => ResolveError::SymbolTable {
                pid,
                detail: format!("Failed to read memory maps: {}", err),
            },
            _ => access_error(pid, err),
        })?;
        if maps.is_empty() {
            return Err(ResolveError::SymbolTable {
                pid,
                detail: "No memory map regions found for process".to_owned(),
            });
        }

        info!("Got virtual memory maps from pid {}:", pid);
        let mut modules: Vec<Module> = Vec::new();
        for map in &maps {
            debug!(
                "map: {:016x}-{:016x} {}{}{} {}",
                map.start(),
                map.start() + map.size(),
                if map.is_read() { 'r' } else { '-' },
                if map.is_write() { 'w' } else { '-' },
                if map.is_exec() { 'x' } else { '-' },
                map.filename()
                    .unwrap_or(&std::path::PathBuf::from(""))
                    .display()
            );

            let filename = match map.filename() {
                Some(filename) => filename,
                None => continue,
            };
            let display = filename.to_string_lossy();
            if display.is_empty() {
                continue;
            }
            if display.starts_with('[') {
                // Pseudo maps like [vdso] are modules without a backing file.
                if modules
                    .iter()
                    .any(|module| module.kind == ModuleKind::Synthetic && module.name == display)
                {
                    continue;
                }
                modules.push(Module {
                    name: display.into_owned(),
                    path: None,
                    load_bias: map.start() as u64,
                    kind: ModuleKind::Synthetic,
                });
                continue;
            }
            if let Some(existing) = modules
                .iter_mut()
                .find(|module| module.path.as_deref() == Some(filename))
            {
                // Later mappings of the same file share the lowest base.
                existing.load_bias = existing.load_bias.min(map.start() as u64);
                continue;
            }
            modules.push(Module::backed(filename, map.start() as u64, &exe));
        }

        debug!("Found {} modules in pid {}", modules.len(), pid);
        Ok(modules)
    }
}

enum ProcessProbe {
    Alive,
    Gone,
    Denied,
}

fn probe_process(pid: Pid) -> ProcessProbe {
    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        return ProcessProbe::Alive;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => ProcessProbe::Gone,
        Some(libc::EPERM) => ProcessProbe::Denied,
        _ => ProcessProbe::Alive,
    }
}

fn access_error(pid: Pid, err: impl std::fmt::Display) -> ResolveError {
    let detail = match probe_process(pid) {
        ProcessProbe::Gone => format!("process has exited ({})", err),
        ProcessProbe::Denied => format!("introspection permission denied ({})", err),
        ProcessProbe::Alive => err.to_string(),
    };
    ResolveError::ProcessAccess { pid, detail }
}

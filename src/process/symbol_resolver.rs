use log::*;
use remoteprocess::Pid;
use std::fmt;

use crate::binary_parser::{self, DebugInfoConfig, SymbolTable};
use crate::error::ResolveError;
use crate::process::modules::{Module, ModuleEnumerator};

/// One symbol lookup against one process.
#[derive(Debug, Clone)]
pub struct ResolutionRequest {
    /// Id of the target process.
    pub pid: Pid,
    /// Exact linker-visible name to resolve. No demangling or
    /// version-suffix stripping is applied.
    pub symbol: String,
}

impl ResolutionRequest {
    /// Builds a request for `symbol` in process `pid`.
    pub fn new(pid: Pid, symbol: &str) -> ResolutionRequest {
        ResolutionRequest {
            pid,
            symbol: symbol.to_owned(),
        }
    }
}

/// A successfully resolved virtual address. Always non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress(u64);

impl ResolvedAddress {
    fn new(address: u64) -> Option<ResolvedAddress> {
        if address == 0 {
            None
        } else {
            Some(ResolvedAddress(address))
        }
    }

    /// The address value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

/// Resolves symbol names to runtime addresses by scanning a process's
/// modules in mapping order and taking the first eligible match.
pub struct SymbolResolver {
    enumerator: ModuleEnumerator,
}

impl SymbolResolver {
    /// Constructs a resolver that locates detached debug files with the
    /// given configuration.
    pub fn new(debug_info: DebugInfoConfig) -> SymbolResolver {
        SymbolResolver {
            enumerator: ModuleEnumerator::new(debug_info),
        }
    }

    /// Resolves the request to a virtual address.
    ///
    /// Modules are re-enumerated and their tables re-read on every call, so
    /// the result reflects the process as currently mapped. Modules whose
    /// metadata cannot be read are skipped; the request only fails outright
    /// when the process is unreachable, the map table cannot be read at
    /// all, or no module holds the symbol.
    pub fn resolve(&self, request: &ResolutionRequest) -> Result<ResolvedAddress, ResolveError> {
        let modules = self.enumerator.enumerate(request.pid)?;
        match self.scan_modules(&modules, &request.symbol) {
            Some(address) => Ok(address),
            None => Err(ResolveError::SymbolNotFound {
                symbol: request.symbol.clone(),
            }),
        }
    }

    fn scan_modules(&self, modules: &[Module], symbol: &str) -> Option<ResolvedAddress> {
        modules.iter().find_map(|module| {
            let path = module.path.as_ref()?;
            let table = match binary_parser::parse_symbol_table(path, self.enumerator.debug_info())
            {
                Ok(table) => table,
                Err(err) => {
                    // One unreadable module must not fail the whole scan.
                    debug!("Skipping module {}: {}", module.name, err);
                    return None;
                }
            };
            let address = lookup(&table, module.load_bias, symbol)?;
            info!(
                "Got symbol {} (0x{:016x}) from {}",
                symbol, address, module.name
            );
            ResolvedAddress::new(address)
        })
    }
}

impl Default for SymbolResolver {
    fn default() -> SymbolResolver {
        SymbolResolver::new(DebugInfoConfig::default())
    }
}

/// Resolves `symbol` in process `pid` with the default debug-info
/// configuration. One blocking call, no state kept between calls.
pub fn resolve_symbol(pid: Pid, symbol: &str) -> Result<ResolvedAddress, ResolveError> {
    SymbolResolver::default().resolve(&ResolutionRequest::new(pid, symbol))
}

fn lookup(table: &SymbolTable, load_bias: u64, symbol: &str) -> Option<u64> {
    let entry = table.entries.iter().find(|entry| {
        // Zero-valued entries are placeholders, not definitions.
        entry.class.has_runtime_address() && entry.link_value != 0 && entry.name == symbol
    })?;
    Some(runtime_address(table, load_bias, entry.link_value))
}

// Position-independent objects record file-relative values and get rebased
// to wherever the loader put them; fixed-address objects already record the
// runtime address.
fn runtime_address(table: &SymbolTable, load_bias: u64, link_value: u64) -> u64 {
    if table.position_independent {
        load_bias - table.link_base + link_value
    } else {
        link_value
    }
}

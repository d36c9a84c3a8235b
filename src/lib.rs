#![warn(missing_docs)]

//! A crate for resolving the runtime virtual addresses of named symbols in
//! running processes.

/// For parsing a module's binary to get its symbol table.
pub mod binary_parser;
/// Error types surfaced to callers of the resolver.
pub mod error;
/// For enumerating a process's mapped modules and resolving symbols in them.
pub mod process;

pub use binary_parser::DebugInfoConfig;
pub use error::ResolveError;
pub use process::symbol_resolver::{resolve_symbol, ResolutionRequest, ResolvedAddress};
pub use process::SymbolResolver;
pub use remoteprocess::Pid;

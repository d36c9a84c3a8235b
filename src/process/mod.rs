/// For discovering the modules mapped into a running process.
pub mod modules;
/// For scanning module symbol tables and computing runtime addresses.
pub mod symbol_resolver;

pub use modules::{Module, ModuleEnumerator, ModuleKind};
pub use symbol_resolver::SymbolResolver;

use remoteprocess::Pid;
use thiserror::Error;

/// The terminal outcomes of a resolution request, kept distinct so callers
/// can tell "stop touching this process" apart from "this binary simply
/// doesn't have that symbol".
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The target process does not exist, has exited, or denies
    /// introspection.
    #[error("Cannot access process {pid}: {detail}")]
    ProcessAccess {
        /// Id of the process the request was made against.
        pid: Pid,
        /// What the introspection facility reported.
        detail: String,
    },

    /// The module-table machinery itself failed, as opposed to a single
    /// unreadable module (which is skipped during the scan).
    #[error("Failed to read module tables for process {pid}: {detail}")]
    SymbolTable {
        /// Id of the process the request was made against.
        pid: Pid,
        /// What went wrong reading the table.
        detail: String,
    },

    /// Every reachable module was scanned and none held an eligible,
    /// non-zero-valued entry with the requested name.
    #[error("Unable to find address of {symbol} in any mapped module")]
    SymbolNotFound {
        /// The name that was requested.
        symbol: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_access_display() {
        let err = ResolveError::ProcessAccess {
            pid: 1234,
            detail: "process has exited".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot access process 1234: process has exited"
        );
    }

    #[test]
    fn test_symbol_not_found_display() {
        let err = ResolveError::SymbolNotFound {
            symbol: "executor_globals".to_owned(),
        };
        assert!(err.to_string().contains("executor_globals"));
    }
}

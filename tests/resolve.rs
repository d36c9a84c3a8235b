use symspy::{resolve_symbol, Pid, ResolutionRequest, ResolveError, SymbolResolver};

fn own_pid() -> Pid {
    std::process::id() as Pid
}

#[test]
fn nonexistent_process_is_an_access_error() {
    // Far above any configurable pid_max on Linux.
    let err = resolve_symbol(0x3fff_ffff, "main").unwrap_err();
    match err {
        ResolveError::ProcessAccess { .. } => {}
        other => panic!("expected ProcessAccess, got {}", other),
    }
}

#[test]
fn absent_symbol_reports_symbol_not_found() {
    let err = resolve_symbol(own_pid(), "symspy_definitely_not_a_symbol").unwrap_err();
    match err {
        ResolveError::SymbolNotFound { symbol } => {
            assert_eq!(symbol, "symspy_definitely_not_a_symbol");
        }
        other => panic!("expected SymbolNotFound, got {}", other),
    }
}

#[test]
fn resolves_a_libc_symbol_in_the_test_process() {
    // The test binary links libc dynamically in most environments; tolerate
    // the ones where it doesn't.
    match resolve_symbol(own_pid(), "malloc") {
        Ok(address) => assert_ne!(address.get(), 0),
        Err(ResolveError::SymbolNotFound { .. }) => {}
        Err(other) => panic!("unexpected failure: {}", other),
    }
}

#[test]
fn repeated_resolution_is_deterministic() {
    let resolver = SymbolResolver::default();
    let request = ResolutionRequest::new(own_pid(), "malloc");

    let first = resolver.resolve(&request);
    let second = resolver.resolve(&request);
    match (first, second) {
        (Ok(a), Ok(b)) => assert_eq!(a, b),
        (Err(_), Err(_)) => {}
        _ => panic!("resolution flapped between success and failure"),
    }
}

#[test]
fn empty_name_never_resolves() {
    let err = resolve_symbol(own_pid(), "").unwrap_err();
    match err {
        ResolveError::SymbolNotFound { symbol } => assert_eq!(symbol, ""),
        other => panic!("expected SymbolNotFound, got {}", other),
    }
}

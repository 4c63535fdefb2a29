//! Symbol classification and name demangling.

/// What a dynamic symbol's table entry says it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Object,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub mangled_name: String,
    pub demangled_name: String,
    pub address: u64,
    pub kind: SymbolKind,
}

impl Symbol {
    pub fn new(mangled_name: String, address: u64, kind: SymbolKind) -> Self {
        let demangled_name = demangle(&mangled_name);
        Symbol { mangled_name, demangled_name, address, kind }
    }
}

/// Tries Rust's mangling scheme first, then Itanium C++ mangling, and
/// falls back to the mangled name itself if neither applies. The JSON
/// corpus always reports the mangled name (it's the link-time identity);
/// the demangled form is only used for log messages.
pub fn demangle(name: &str) -> String {
    let rust = rustc_demangle::try_demangle(name);
    if let Ok(sym) = rust {
        return format!("{:#}", sym);
    }

    if let Ok(sym) = cpp_demangle::Symbol::new(name) {
        if let Ok(demangled) = sym.demangle(&cpp_demangle::DemangleOptions::default()) {
            return demangled;
        }
    }

    name.to_string()
}

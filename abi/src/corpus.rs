//! Drives the whole pipeline: open a binary, read its DWARF type
//! information, classify every exported function and variable, and
//! assemble the JSON corpus document.

use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use crate::allocate::RegisterAllocator;
use crate::binary::Binary;
use crate::dwarf::{CallTarget, DwarfInfo, Subprogram};
use crate::error::{Error, Result};
use crate::parameter::{build_argument, build_return, display_name, none_return, AsString, Parameter};
use crate::symbol::{Symbol, SymbolKind};
use crate::typeinfo::{dedecorate, Type};

/// One function's ABI description: its parameters in declaration order
/// plus its return value.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionLocation {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    pub return_value: Parameter,
}

/// One file-scope variable's ABI description: just its declared type and
/// size, with no class/location/direction — a variable occupies no
/// calling-convention state of its own. Matches the original's flat
/// `abi_variable_description { variable_type, variable_name, variable_size }`.
#[derive(Debug, Clone, Serialize)]
pub struct VariableLocation {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub size: AsString<u64>,
}

/// A call made from inside an exported function's body to a function
/// declared-but-not-defined in this library — i.e. one that crosses out
/// to another shared object. Resolved from `DW_TAG_call_site`/
/// `DW_TAG_GNU_call_site` DIEs (see [`crate::dwarf::CallTarget`]), not
/// synthesized from the calling function's own signature. Parameters are
/// named `param_i0`, `param_i1`, ... since this crate has no caller-side
/// name for an argument it only sees through the callee's own declared
/// signature.
#[derive(Debug, Clone, Serialize)]
pub struct CallSite {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
}

/// One entry of the wire-format `"locations"` array: each variant
/// serializes as a single-key object (`{"function": {...}}`, etc.),
/// matching spec §6 exactly.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum LocationEntry {
    Variable { variable: VariableLocation },
    Function { function: FunctionLocation },
    Callsite { callsite: CallSite },
}

/// The corpus, as the driver assembles it: functions, variables, call
/// sites, and inline-call correlations kept as separate ordered
/// collections (spec §3's data model). `inlines` is always empty —
/// inline call-site correlation was never implemented upstream either,
/// and inventing an untested heuristic here would be worse than an
/// honest absence. The wire format (spec §6) flattens all of these,
/// `inlines` included, into a single `"locations"` array; see the
/// manual [`Serialize`] impl below.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub library: String,
    pub functions: Vec<FunctionLocation>,
    pub variables: Vec<VariableLocation>,
    pub call_sites: Vec<CallSite>,
    pub inlines: Vec<serde_json::Value>,
}

impl Serialize for Corpus {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let locations: Vec<LocationEntry> = self
            .functions
            .iter()
            .cloned()
            .map(|function| LocationEntry::Function { function })
            .chain(self.call_sites.iter().cloned().map(|callsite| LocationEntry::Callsite { callsite }))
            .chain(self.variables.iter().cloned().map(|variable| LocationEntry::Variable { variable }))
            .collect();

        let mut state = serializer.serialize_struct("Corpus", 2)?;
        state.serialize_field("library", &self.library)?;
        state.serialize_field("locations", &locations)?;
        state.end()
    }
}

/// Builds the full corpus for a binary at `path`.
pub fn build_corpus(path: impl AsRef<Path>) -> Result<Corpus> {
    let path = path.as_ref();
    let binary = Binary::open(path)?;

    if binary.arch != crate::binary::Arch::X86_64 {
        return Err(Error::UnsupportedArchitecture(format!("{:?}", binary.arch)));
    }

    let dwarf = DwarfInfo::load(&binary)?;
    let (subprograms, globals) = dwarf.subprograms_and_variables()?;

    let by_name: HashMap<&str, &Subprogram> = subprograms.iter().map(|s| (s.name.as_str(), s)).collect();

    let mut functions = Vec::new();
    let mut variables = Vec::new();
    let mut call_sites = Vec::new();

    for sym in &binary.symbols {
        if sym.is_import {
            continue;
        }

        let kind = if sym.is_function { SymbolKind::Function } else { SymbolKind::Object };
        let symbol = Symbol::new(sym.name.clone(), sym.address, kind);

        if symbol.kind == SymbolKind::Function {
            let Some(sub) = by_name.get(sym.name.as_str()) else {
                log::debug!("no debug info for exported function `{}`", symbol.demangled_name);
                continue;
            };
            // Per spec §7: an allocator invariant violation aborts this
            // function's own processing, but surrounding symbols continue.
            match build_function(sym.name.clone(), sub) {
                Ok(func) => {
                    for target in sub.call_sites.iter().filter(|t| !t.has_definition) {
                        match build_call_site(target) {
                            Ok(site) => call_sites.push(site),
                            Err(err) => log::warn!("dropping call site `{}`: {err}", target.name),
                        }
                    }
                    functions.push(func);
                }
                Err(err) => {
                    log::warn!("dropping function `{}`: {err}", symbol.demangled_name);
                }
            }
        } else if let Some(global) = globals.iter().find(|g| g.name == sym.name) {
            variables.push(build_variable(sym.name.clone(), &global.ty));
        }
    }

    let library = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

    Ok(Corpus { library, functions, variables, call_sites, inlines: Vec::new() })
}

fn build_function(name: String, sub: &Subprogram) -> Result<FunctionLocation> {
    let mut alloc = RegisterAllocator::new();
    let mut parameters = Vec::with_capacity(sub.parameters.len());
    for (pname, ty) in &sub.parameters {
        parameters.push(build_argument(pname, ty, &mut alloc)?);
    }

    let return_value = match &sub.return_type {
        Some(ty) => build_return(ty)?,
        None => none_return(),
    };

    Ok(FunctionLocation { name, parameters, return_value })
}

fn build_variable(name: String, ty: &Type) -> VariableLocation {
    let (base, _) = dedecorate(ty);
    VariableLocation { name, type_name: display_name(base), size: AsString(ty.size_bytes()) }
}

/// Builds a [`CallSite`] from a resolved call target's own declared
/// signature, naming each parameter synthetically (`param_i0`, ...) since
/// the caller has no name of its own for an argument it only sees through
/// the callee's declared type.
fn build_call_site(target: &CallTarget) -> Result<CallSite> {
    let mut alloc = RegisterAllocator::new();
    let mut parameters = Vec::with_capacity(target.parameters.len());
    for (i, (_, ty)) in target.parameters.iter().enumerate() {
        parameters.push(build_argument(&format!("param_i{}", i), ty, &mut alloc)?);
    }
    Ok(CallSite { name: target.name.clone(), parameters })
}

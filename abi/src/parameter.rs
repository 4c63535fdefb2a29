//! Builds the JSON-serializable [`Parameter`] record for a single
//! function argument, return value, or struct field, from its
//! [`Type`] tree.

use std::cell::RefCell;
use std::collections::HashMap;

use serde::Serialize;

use crate::allocate::{Location, RegisterAllocator, ReturnValueAllocator};
use crate::classify::{classify, classify_pointer, Classification};
use crate::error::Result;
use crate::typeinfo::{dedecorate, remove_typedef, Type, ANONYMOUS_MARKER};

/// Wraps a displayable value so it serializes as a JSON string, matching
/// the corpus schema's stringified size/indirection fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsString<T>(pub T);

impl<T: std::fmt::Display> Serialize for AsString<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self.0)
    }
}

/// The flat parameter record emitted into the JSON corpus, matching the
/// schema in spec §6 exactly: one record shape for scalars, pointers,
/// aggregates, and enums alike, with optional keys omitted rather than
/// a tagged variant per shape (`class` already carries the shape/ABI
/// category distinction; see spec §9's "Polymorphic parameter records"
/// design note, restatement (a variant per case) vs. this crate's choice
/// of a single record with schema-driven field presence).
#[derive(Debug, Clone, Serialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<AsString<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indirections: Option<AsString<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underlying_type: Option<Box<Parameter>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<Parameter>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constants: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Parameter {
    fn none(name: impl Into<String>) -> Self {
        let name = name.into();
        Parameter {
            name: name.clone(),
            type_name: "None".to_string(),
            class: "None".to_string(),
            location: None,
            direction: None,
            size: None,
            indirections: None,
            underlying_type: None,
            fields: None,
            constants: None,
        }
    }
}

/// Renders a list of per-eightbyte [`Location`]s into the schema's
/// location grammar: a single register (`"%rdi"`), a stack slot
/// (`"framebase+8"`), two or more joined by `'|'`, or `"none"` for an
/// empty aggregate. `SSEUP` is rendered bare (it's the ABI document's
/// own placeholder name, not a real register).
fn location_string(locs: &[Location]) -> String {
    if locs.is_empty() {
        return "none".to_string();
    }
    locs.iter()
        .map(|loc| match loc {
            Location::Register(r) if *r == "SSEUP" => "SSEUP".to_string(),
            Location::Register(r) => format!("%{r}"),
            Location::Framebase(off) => format!("framebase+{off}"),
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// Directionality per spec §4.4 step 5 / the original `getDirectionalityFromType`:
/// strip only the outer typedef layer (not pointers/references) and check
/// whether what remains is itself indirect. A by-value parameter is
/// always `"import"`. A pointer/reference to a primitive (scalar or enum,
/// after full dereference) is also `"import"`; anything else reached
/// through a pointer/reference is `"unknown"`.
fn direction_for(ty: &Type) -> &'static str {
    match remove_typedef(ty) {
        Type::Pointer(_) | Type::Reference(_) => {
            let (base, _) = dedecorate(ty);
            match base {
                Type::Scalar(_) | Type::Enum(_) => "import",
                _ => "unknown",
            }
        }
        _ => "import",
    }
}

/// Assigns a stable id to every distinct composite type (by pointer
/// identity of its `Rc` allocation) reachable from a parameter tree, so
/// the builder can detect self-referential types (a struct containing,
/// through some chain of fields/pointers, a pointer back to itself) and
/// cut the recursion instead of overflowing the stack.
///
/// This corresponds to option (a) from the classifier's design notes: a
/// pre-pass over the type graph rather than a runtime depth counter. The
/// set resets at every new top-level parameter emission (spec §4.5).
#[derive(Default)]
struct RecursionGuard {
    // Keyed by the raw pointer address of the Type's own storage.
    seen: RefCell<HashMap<usize, ()>>,
}

impl RecursionGuard {
    fn composite_key(ty: &Type) -> Option<usize> {
        match ty {
            Type::Struct(_) | Type::Union(_) => Some(ty as *const Type as usize),
            _ => None,
        }
    }

    /// Returns true the first time a given composite is seen, false on
    /// every subsequent visit (indicating a cycle).
    fn enter(&self, ty: &Type) -> bool {
        match Self::composite_key(ty) {
            None => true,
            Some(key) => {
                let mut seen = self.seen.borrow_mut();
                if seen.contains_key(&key) {
                    false
                } else {
                    seen.insert(key, ());
                    true
                }
            }
        }
    }
}

/// Builds a [`Parameter`] record for an argument, using `alloc` to
/// assign register/framebase locations as it walks top-level arguments
/// in declaration order.
///
/// Returns [`crate::error::Error::AllocatorInvariant`] if the classifier
/// produced `NoClass` for a non-empty value; per spec §7 this is a
/// per-function-fatal condition, left for the caller to decide whether
/// to drop the whole function or propagate further.
pub fn build_argument(name: &str, ty: &Type, alloc: &mut RegisterAllocator) -> Result<Parameter> {
    let guard = RecursionGuard::default();
    build(name, ty, &mut BuildMode::Argument(alloc), &guard)
}

/// Builds a [`Parameter`] record for a function's return value, or a
/// `"None"` sentinel if `ty` is absent (spec §4.4: "A function with no
/// return type emits a sentinel record with name/type/category = 'None'").
pub fn build_return(ty: &Type) -> Result<Parameter> {
    let guard = RecursionGuard::default();
    build("return", ty, &mut BuildMode::Return, &guard)
}

/// Sentinel for a `void`-returning function, matching spec §4.4 exactly.
pub fn none_return() -> Parameter {
    Parameter::none("None")
}

enum BuildMode<'a> {
    Argument(&'a mut RegisterAllocator),
    Return,
    /// Builds a shell record with no location of its own: used for a
    /// pointer's `underlying_type`, which spec §4.4 describes as having
    /// "empty name/location but populated type/class/size" (the pointer
    /// itself, not the pointee, occupies calling-convention state).
    Shell,
}

fn locations_for(mode: &mut BuildMode, c: &Classification, size_bytes: u64) -> Result<Option<Vec<Location>>> {
    match mode {
        BuildMode::Argument(alloc) => Ok(Some(alloc.allocate_argument(c, size_bytes)?)),
        BuildMode::Return => Ok(Some(ReturnValueAllocator::allocate(c))),
        BuildMode::Shell => Ok(None),
    }
}

pub(crate) fn display_name(ty: &Type) -> String {
    if ty.is_anonymous_composite() {
        ANONYMOUS_MARKER.to_string()
    } else {
        ty.name().to_string()
    }
}

fn dedup_constants(constants: &[crate::typeinfo::EnumConstant]) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    for c in constants {
        map.entry(c.name.clone())
            .or_insert_with(|| serde_json::Value::String(c.value.to_string()));
    }
    map
}

fn build(name: &str, ty: &Type, mode: &mut BuildMode, guard: &RecursionGuard) -> Result<Parameter> {
    let direction = direction_for(ty).to_string();
    let (base, indirections) = dedecorate(ty);

    if indirections > 0 {
        let c = classify_pointer();
        let locs = locations_for(mode, &c, 8)?;
        let underlying = if guard.enter(base) {
            build_base("", base, &mut BuildMode::Shell, guard)?
        } else {
            Parameter::none("")
        };
        return Ok(Parameter {
            name: name.to_string(),
            type_name: display_name(base),
            class: c.category.as_str().to_string(),
            location: locs.map(|l| location_string(&l)),
            direction: Some(direction),
            size: Some(AsString(8)),
            indirections: Some(AsString(indirections)),
            underlying_type: Some(Box::new(underlying)),
            fields: None,
            constants: None,
        });
    }

    let mut p = build_base(name, base, mode, guard)?;
    p.direction = Some(direction);
    Ok(p)
}

fn build_base(name: &str, base: &Type, mode: &mut BuildMode, guard: &RecursionGuard) -> Result<Parameter> {
    Ok(match base {
        Type::Function(f) => Parameter {
            name: name.to_string(),
            type_name: f.name.clone(),
            class: classify(base).category.as_str().to_string(),
            location: None,
            direction: None,
            size: Some(AsString(f.size_bytes)),
            indirections: None,
            underlying_type: None,
            fields: None,
            constants: None,
        },
        Type::Scalar(s) => {
            let c = classify(base);
            let locs = locations_for(mode, &c, s.size_bytes)?;
            Parameter {
                name: name.to_string(),
                type_name: s.name.clone(),
                class: c.category.as_str().to_string(),
                location: locs.map(|l| location_string(&l)),
                direction: None,
                size: Some(AsString(s.size_bytes)),
                indirections: None,
                underlying_type: None,
                fields: None,
                constants: None,
            }
        }
        Type::Enum(e) => {
            let c = classify(base);
            let locs = locations_for(mode, &c, e.size_bytes)?;
            Parameter {
                name: name.to_string(),
                type_name: e.name.clone(),
                class: c.category.as_str().to_string(),
                location: locs.map(|l| location_string(&l)),
                direction: None,
                size: Some(AsString(e.size_bytes)),
                indirections: None,
                underlying_type: None,
                fields: None,
                constants: Some(dedup_constants(&e.constants)),
            }
        }
        Type::Struct(s) => {
            let c = classify(base);
            let locs = locations_for(mode, &c, s.size_bytes)?;
            let fields = if guard.enter(base) {
                let mut built = Vec::with_capacity(s.fields.len());
                for f in &s.fields {
                    built.push(build(&f.name, &f.ty, &mut BuildMode::Shell, guard)?);
                }
                Some(built)
            } else {
                None
            };
            Parameter {
                name: name.to_string(),
                type_name: display_name(base),
                class: c.category.as_str().to_string(),
                location: locs.map(|l| location_string(&l)),
                direction: None,
                size: Some(AsString(s.size_bytes)),
                indirections: None,
                underlying_type: None,
                fields,
                constants: None,
            }
        }
        Type::Union(u) => {
            let c = classify(base);
            let locs = locations_for(mode, &c, u.size_bytes)?;
            let fields = if guard.enter(base) {
                let mut built = Vec::with_capacity(u.fields.len());
                for f in &u.fields {
                    built.push(build(&f.name, &f.ty, &mut BuildMode::Shell, guard)?);
                }
                Some(built)
            } else {
                None
            };
            Parameter {
                name: name.to_string(),
                type_name: display_name(base),
                class: c.category.as_str().to_string(),
                location: locs.map(|l| location_string(&l)),
                direction: None,
                size: Some(AsString(u.size_bytes)),
                indirections: None,
                underlying_type: None,
                fields,
                constants: None,
            }
        }
        Type::Array(a) => {
            let c = classify(base);
            let locs = locations_for(mode, &c, a.size_bytes)?;
            let elem = build_base("", &a.element_type, &mut BuildMode::Shell, guard)?;
            Parameter {
                name: name.to_string(),
                type_name: a.name.clone(),
                class: c.category.as_str().to_string(),
                location: locs.map(|l| location_string(&l)),
                direction: None,
                size: Some(AsString(a.size_bytes)),
                indirections: None,
                underlying_type: Some(Box::new(elem)),
                fields: None,
                constants: None,
            }
        }
        Type::Pointer(_) | Type::Reference(_) | Type::Typedef(_) => {
            // dedecorate() always strips these before build_base is
            // reached; unreachable in practice but handled defensively
            // since build_base can be invoked on raw element/field types.
            build(name, base, mode, guard)?
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typeinfo::{EnumConstant, EnumType, Field, Scalar, StructType};
    use std::rc::Rc;

    fn int_ty() -> Type {
        Type::Scalar(Scalar {
            name: "int".into(),
            size_bytes: 4,
            is_integral: true,
            is_utf: false,
            is_floating_point: false,
            is_complex_float: false,
        })
    }

    #[test]
    fn plain_int_argument_goes_to_rdi() {
        let mut alloc = RegisterAllocator::new();
        let p = build_argument("x", &int_ty(), &mut alloc).unwrap();
        assert_eq!(p.location.as_deref(), Some("%rdi"));
        assert_eq!(p.class, "Integer");
        assert_eq!(p.direction.as_deref(), Some("import"));
        assert_eq!(p.size, Some(AsString(4)));
    }

    #[test]
    fn pointer_to_int_reports_one_indirection_and_import_direction() {
        let ty = Type::Pointer(Rc::new(int_ty()));
        let mut alloc = RegisterAllocator::new();
        let p = build_argument("x", &ty, &mut alloc).unwrap();
        assert_eq!(p.class, "Pointer");
        assert_eq!(p.location.as_deref(), Some("%rdi"));
        assert_eq!(p.indirections, Some(AsString(1)));
        assert_eq!(p.direction.as_deref(), Some("import"));
        let underlying = p.underlying_type.expect("pointer carries underlying_type");
        assert_eq!(underlying.type_name, "int");
        assert_eq!(underlying.class, "Integer");
        assert!(underlying.location.is_none());
        assert!(underlying.name.is_empty());
    }

    #[test]
    fn pointer_to_struct_is_unknown_direction() {
        let s = StructType { name: "Opaque".into(), size_bytes: 8, fields: vec![] };
        let ty = Type::Pointer(Rc::new(Type::Struct(s)));
        let mut alloc = RegisterAllocator::new();
        let p = build_argument("x", &ty, &mut alloc).unwrap();
        assert_eq!(p.direction.as_deref(), Some("unknown"));
    }

    #[test]
    fn self_referential_struct_does_not_recurse_forever() {
        let node = StructType {
            name: "Node".into(),
            size_bytes: 8,
            fields: vec![Field {
                name: "next".into(),
                ty: Type::Pointer(Rc::new(int_ty())),
                offset: 0,
            }],
        };
        let ty = Type::Struct(node);
        let mut alloc = RegisterAllocator::new();
        let p = build_argument("n", &ty, &mut alloc).unwrap();
        assert_eq!(p.class, "Struct");
        assert!(p.fields.is_some());
    }

    #[test]
    fn enum_return_classifies_as_integer_with_deduped_constants() {
        let e = Type::Enum(EnumType {
            name: "Color".into(),
            size_bytes: 4,
            constants: vec![
                EnumConstant { name: "Red".into(), value: 0 },
                EnumConstant { name: "Green".into(), value: 1 },
                EnumConstant { name: "Red".into(), value: 0 },
            ],
        });
        let p = build_return(&e).unwrap();
        assert_eq!(p.location.as_deref(), Some("%rax"));
        let constants = p.constants.expect("enum carries constants");
        assert_eq!(constants.len(), 2);
        assert_eq!(constants.get("Red").unwrap(), "0");
    }

    #[test]
    fn void_return_is_none_sentinel() {
        let p = none_return();
        assert_eq!(p.name, "None");
        assert_eq!(p.type_name, "None");
        assert_eq!(p.class, "None");
        assert!(p.location.is_none());
    }

    #[test]
    fn empty_struct_reports_none_location() {
        let s = StructType { name: "Empty".into(), size_bytes: 0, fields: vec![] };
        let mut alloc = RegisterAllocator::new();
        let p = build_argument("e", &Type::Struct(s), &mut alloc).unwrap();
        assert_eq!(p.location.as_deref(), Some("none"));
    }
}

//! The type-description tree the DWARF reader produces and the classifier
//! consumes. A [`Type`] is always reducible to a non-decorated base type
//! plus an integer pointer depth (see [`dedecorate`]).

use std::rc::Rc;

/// A single field of a struct or union.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    /// Byte offset of this field within its containing aggregate.
    pub offset: u64,
}

/// A named enum constant. Order is preserved as reported by the DWARF
/// reader; duplicate names (the same constant reported twice) are
/// de-duplicated by the parameter builder, not here.
#[derive(Debug, Clone)]
pub struct EnumConstant {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone)]
pub struct Scalar {
    pub name: String,
    pub size_bytes: u64,
    pub is_integral: bool,
    pub is_utf: bool,
    pub is_floating_point: bool,
    pub is_complex_float: bool,
}

#[derive(Debug, Clone)]
pub struct StructType {
    pub name: String,
    pub size_bytes: u64,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone)]
pub struct UnionType {
    pub name: String,
    pub size_bytes: u64,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone)]
pub struct ArrayType {
    pub name: String,
    pub size_bytes: u64,
    pub element_type: Rc<Type>,
}

#[derive(Debug, Clone)]
pub struct EnumType {
    pub name: String,
    pub size_bytes: u64,
    pub constants: Vec<EnumConstant>,
}

#[derive(Debug, Clone)]
pub struct FunctionType {
    pub name: String,
    pub size_bytes: u64,
}

/// The tagged sum of type shapes a DWARF reader (or any other collaborator)
/// can produce. Pointer/Reference/Typedef are transparent decorations that
/// [`dedecorate`] strips before classification.
#[derive(Debug, Clone)]
pub enum Type {
    Scalar(Scalar),
    Struct(StructType),
    Union(UnionType),
    Array(ArrayType),
    Enum(EnumType),
    Function(FunctionType),
    Pointer(Rc<Type>),
    Reference(Rc<Type>),
    Typedef(Rc<Type>),
}

/// Marker substituted in for a declaring parameter's own type name when the
/// underlying composite has no name of its own (an anonymous struct/union
/// embedded directly in a parameter's type).
pub const ANONYMOUS_MARKER: &str = "anonymous struct/class/union";

impl Type {
    pub fn name(&self) -> &str {
        match self {
            Type::Scalar(s) => &s.name,
            Type::Struct(s) => &s.name,
            Type::Union(u) => &u.name,
            Type::Array(a) => &a.name,
            Type::Enum(e) => &e.name,
            Type::Function(f) => &f.name,
            // Decorated types don't carry their own display name; callers
            // dedecorate first.
            Type::Pointer(_) | Type::Reference(_) | Type::Typedef(_) => "",
        }
    }

    pub fn size_bytes(&self) -> u64 {
        match self {
            Type::Scalar(s) => s.size_bytes,
            Type::Struct(s) => s.size_bytes,
            Type::Union(u) => u.size_bytes,
            Type::Array(a) => a.size_bytes,
            Type::Enum(e) => e.size_bytes,
            Type::Function(f) => f.size_bytes,
            Type::Pointer(_) | Type::Reference(_) => 8,
            Type::Typedef(inner) => inner.size_bytes(),
        }
    }

    pub fn is_anonymous_composite(&self) -> bool {
        matches!(self, Type::Struct(_) | Type::Union(_)) && self.name().contains(ANONYMOUS_MARKER)
    }
}

/// Strips one or more typedef layers only, leaving pointers/references in
/// place.
pub fn remove_typedef(ty: &Type) -> &Type {
    match ty {
        Type::Typedef(inner) => remove_typedef(inner),
        other => other,
    }
}

/// Unwraps typedef, pointer, and reference wrappers, counting pointer-like
/// indirections (references count as one level, same as a pointer).
///
/// Returns the non-decorated base type plus the indirection count.
pub fn dedecorate(ty: &Type) -> (&Type, u32) {
    fn go(ty: &Type, count: u32) -> (&Type, u32) {
        match ty {
            Type::Typedef(inner) => go(inner, count),
            Type::Pointer(inner) => go(inner, count + 1),
            Type::Reference(inner) => go(inner, count + 1),
            other => (other, count),
        }
    }
    go(ty, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_scalar() -> Type {
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
    fn dedecorate_plain_scalar_has_zero_indirection() {
        let ty = int_scalar();
        let (base, count) = dedecorate(&ty);
        assert_eq!(count, 0);
        assert_eq!(base.name(), "int");
    }

    #[test]
    fn dedecorate_counts_pointer_chains() {
        let ty = Type::Pointer(Rc::new(Type::Pointer(Rc::new(int_scalar()))));
        let (base, count) = dedecorate(&ty);
        assert_eq!(count, 2);
        assert_eq!(base.name(), "int");
    }

    #[test]
    fn dedecorate_reference_counts_as_one_indirection() {
        let ty = Type::Reference(Rc::new(int_scalar()));
        let (_, count) = dedecorate(&ty);
        assert_eq!(count, 1);
    }

    #[test]
    fn dedecorate_typedef_does_not_bump_count() {
        let ty = Type::Typedef(Rc::new(Type::Pointer(Rc::new(int_scalar()))));
        let (_, count) = dedecorate(&ty);
        assert_eq!(count, 1);
    }

    #[test]
    fn remove_typedef_strips_only_typedef_layers() {
        let ty = Type::Typedef(Rc::new(Type::Typedef(Rc::new(Type::Pointer(Rc::new(
            int_scalar(),
        ))))));
        let stripped = remove_typedef(&ty);
        assert!(matches!(stripped, Type::Pointer(_)));
    }
}

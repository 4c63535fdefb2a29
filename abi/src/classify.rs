//! The ABI classification engine: reduces a [`Type`] to one or two
//! eightbyte register classes, per the System V AMD64 ABI's merge and
//! post-merge rules.

use crate::typeinfo::Type;

/// A register class for AMD64, as defined on page 16 of the System V ABI.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegisterClass {
    /// Fits into one of the general purpose (integer) registers.
    Integer,
    /// Fits into an SSE register.
    Sse,
    /// Upper half of the SSE register that also holds the low half.
    SseUp,
    /// Returned via the x87 FPU.
    X87,
    X87Up,
    ComplexX87,
    /// Initial value in the merge algorithm; also used for empty
    /// aggregates and padding.
    NoClass,
    /// Passed and returned in memory via the stack.
    Memory,
}

use RegisterClass::*;

/// Human-readable category name attached to a classification, distinct
/// from the register class itself (a `Pointer` and a plain 64-bit integer
/// both classify to `(Integer, NoClass)`, but are different categories).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Category {
    Pointer,
    Integer,
    IntegerVec,
    Float,
    FloatVec,
    CplxFloat,
    Struct,
    Union,
    Array,
    Enum,
    Function,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Pointer => "Pointer",
            Category::Integer => "Integer",
            Category::IntegerVec => "IntegerVec",
            Category::Float => "Float",
            Category::FloatVec => "FloatVec",
            Category::CplxFloat => "CplxFloat",
            Category::Struct => "Struct",
            Category::Union => "Union",
            Category::Array => "Array",
            Category::Enum => "Enum",
            Category::Function => "Function",
            Category::Unknown => "Unknown",
        }
    }
}

/// The result of classifying a type: one or two eightbyte register
/// classes plus the human-readable category.
///
/// Invariant: if `lo == NoClass` then `hi == NoClass`, unless the
/// underlying aggregate is empty (handled by the allocator, not here).
#[derive(Debug, Copy, Clone)]
pub struct Classification {
    pub lo: RegisterClass,
    pub hi: RegisterClass,
    pub category: Category,
}

impl Classification {
    fn new(lo: RegisterClass, hi: RegisterClass, category: Category) -> Self {
        Classification { lo, hi, category }
    }
}

/// Pointer and pointer-to-pointer parameters always classify the same way
/// regardless of what they point to; this is the fixed classification to
/// use once [`dedecorate`](crate::typeinfo::dedecorate) reports
/// `ptr_count > 0`.
pub fn classify_pointer() -> Classification {
    Classification::new(Integer, NoClass, Category::Pointer)
}

/// Classifies a non-decorated base type (already stripped of
/// typedef/pointer/reference wrappers by `dedecorate`).
pub fn classify(ty: &Type) -> Classification {
    match ty {
        Type::Scalar(s) => classify_scalar(s),
        Type::Enum(_) => Classification::new(Integer, NoClass, Category::Enum),
        Type::Function(_) => Classification::new(NoClass, NoClass, Category::Function),
        Type::Union(u) => classify_union(u.size_bytes),
        Type::Array(a) => classify_array(a),
        Type::Struct(s) => classify_struct(s),
        // Pointer/Reference/Typedef should have been stripped by
        // `dedecorate` before reaching here.
        Type::Pointer(_) | Type::Reference(_) => classify_pointer(),
        Type::Typedef(inner) => classify(inner),
    }
}

fn classify_scalar(s: &crate::typeinfo::Scalar) -> Classification {
    let size_bits = s.size_bytes * 8;

    if s.is_integral || s.is_utf {
        return if size_bits > 128 {
            Classification::new(Sse, SseUp, Category::IntegerVec)
        } else if size_bits == 128 {
            // __int128 is classified as two INTEGER eightbytes per the ABI,
            // but this is deliberately preserved as MEMORY: the classifier
            // can't yet distinguish __int128 from a 128-bit vector type by
            // scalar properties alone. See SPEC_FULL / DESIGN open question.
            Classification::new(Memory, NoClass, Category::Integer)
        } else {
            Classification::new(Integer, NoClass, Category::Integer)
        };
    }

    if s.is_floating_point {
        if s.is_complex_float {
            return if size_bits == 128 {
                Classification::new(ComplexX87, NoClass, Category::CplxFloat)
            } else {
                // Correct model is a two-field struct {T real; T imag;};
                // preserved as MEMORY per the documented open question.
                Classification::new(Memory, NoClass, Category::CplxFloat)
            };
        }

        return if size_bits <= 64 {
            Classification::new(Sse, SseUp, Category::Float)
        } else if size_bits == 128 {
            Classification::new(X87, X87Up, Category::Float)
        } else {
            Classification::new(Sse, SseUp, Category::FloatVec)
        };
    }

    Classification::new(NoClass, NoClass, Category::Unknown)
}

fn classify_union(size_bytes: u64) -> Classification {
    if size_bytes > 64 {
        Classification::new(Memory, NoClass, Category::Union)
    } else {
        Classification::new(Integer, NoClass, Category::Union)
    }
}

fn classify_array(a: &crate::typeinfo::ArrayType) -> Classification {
    if a.size_bytes > 64 {
        return Classification::new(Memory, NoClass, Category::Array);
    }
    let (elem_base, ptr_cnt) = crate::typeinfo::dedecorate(&a.element_type);
    let elem_class = if ptr_cnt > 0 {
        classify_pointer()
    } else {
        classify(elem_base)
    };
    Classification::new(elem_class.lo, elem_class.hi, Category::Array)
}

fn classify_struct(s: &crate::typeinfo::StructType) -> Classification {
    if s.size_bytes > 64 {
        return Classification::new(Memory, NoClass, Category::Struct);
    }

    let mut lo = NoClass;
    let mut hi = NoClass;

    for field in &s.fields {
        let (field_base, ptr_cnt) = crate::typeinfo::dedecorate(&field.ty);
        let field_class = if ptr_cnt > 0 {
            classify_pointer()
        } else {
            classify(field_base)
        };

        // Fields in the first eightbyte merge into `lo`; fields whose
        // offset starts in the second eightbyte merge into `hi`.
        if field.offset < 8 {
            lo = merge(lo, field_class.lo);
            if field.offset + field_size(&field.ty) > 8 {
                hi = merge(hi, field_class.hi);
            }
        } else {
            hi = merge(hi, field_class.lo);
        }
    }

    let (lo, hi) = post_merge(lo, hi, s.size_bytes);
    Classification::new(lo, hi, Category::Struct)
}

fn field_size(ty: &Type) -> u64 {
    let (base, ptr_cnt) = crate::typeinfo::dedecorate(ty);
    if ptr_cnt > 0 {
        8
    } else {
        base.size_bytes()
    }
}

/// The ABI's merge operator: a symmetric cleanup of two classes destined
/// for the same eightbyte.
pub fn merge(a: RegisterClass, b: RegisterClass) -> RegisterClass {
    if a == b {
        a
    } else if a == NoClass {
        b
    } else if b == NoClass {
        a
    } else if a == Memory || b == Memory {
        Memory
    } else if a == Integer || b == Integer {
        Integer
    } else if matches!(a, X87 | X87Up | ComplexX87) || matches!(b, X87 | X87Up | ComplexX87) {
        Memory
    } else {
        Sse
    }
}

/// The ABI's post-merge fixup over a combined `(lo, hi)` pair, given the
/// total aggregate size in bytes.
pub fn post_merge(lo: RegisterClass, hi: RegisterClass, size_bytes: u64) -> (RegisterClass, RegisterClass) {
    let mut lo = lo;
    let mut hi = hi;

    if lo == Memory || hi == Memory {
        lo = Memory;
        hi = Memory;
    }

    if hi == SseUp && lo != X87 {
        lo = Memory;
        hi = Memory;
    }

    if size_bytes > 16 && !(lo == Sse && hi == SseUp) {
        lo = Memory;
        hi = Memory;
    }

    if hi == SseUp && !matches!(lo, Sse | SseUp) {
        hi = Sse;
    }

    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typeinfo::Scalar;

    fn scalar(size_bytes: u64, is_integral: bool, is_floating_point: bool) -> Type {
        Type::Scalar(Scalar {
            name: "t".into(),
            size_bytes,
            is_integral,
            is_utf: false,
            is_floating_point,
            is_complex_float: false,
        })
    }

    #[test]
    fn int_classifies_integer() {
        let c = classify(&scalar(4, true, false));
        assert_eq!(c.lo, Integer);
        assert_eq!(c.hi, NoClass);
        assert_eq!(c.category.as_str(), "Integer");
    }

    #[test]
    fn double_classifies_sse() {
        let c = classify(&scalar(8, false, true));
        assert_eq!(c.lo, Sse);
        assert_eq!(c.hi, SseUp);
        assert_eq!(c.category.as_str(), "Float");
    }

    #[test]
    fn long_double_classifies_x87() {
        let c = classify(&scalar(16, false, true));
        assert_eq!(c.lo, X87);
        assert_eq!(c.hi, X87Up);
    }

    #[test]
    fn int128_is_memory_per_documented_quirk() {
        let c = classify(&scalar(16, true, false));
        assert_eq!(c.lo, Memory);
        assert_eq!(c.hi, NoClass);
    }

    #[test]
    fn merge_is_commutative() {
        let classes = [Integer, Sse, SseUp, X87, X87Up, ComplexX87, NoClass, Memory];
        for &a in &classes {
            for &b in &classes {
                assert_eq!(merge(a, b), merge(b, a), "merge({:?}, {:?})", a, b);
            }
        }
    }

    #[test]
    fn merge_is_idempotent_on_equal_inputs() {
        let classes = [Integer, Sse, SseUp, X87, X87Up, ComplexX87, NoClass, Memory];
        for &a in &classes {
            assert_eq!(merge(a, a), a);
        }
    }

    #[test]
    fn post_merge_is_a_fixed_point() {
        let classes = [Integer, Sse, SseUp, X87, X87Up, ComplexX87, NoClass, Memory];
        for &lo in &classes {
            for &hi in &classes {
                for &size in &[4u64, 8, 16, 32, 64] {
                    let (lo1, hi1) = post_merge(lo, hi, size);
                    let (lo2, hi2) = post_merge(lo1, hi1, size);
                    assert_eq!((lo1, hi1), (lo2, hi2));
                }
            }
        }
    }

    #[test]
    fn small_struct_of_two_ints_coalesces_to_one_integer_eightbyte() {
        use crate::typeinfo::{Field, StructType};
        let s = StructType {
            name: "Pair".into(),
            size_bytes: 8,
            fields: vec![
                Field { name: "a".into(), ty: scalar(4, true, false), offset: 0 },
                Field { name: "b".into(), ty: scalar(4, true, false), offset: 4 },
            ],
        };
        let c = classify_struct(&s);
        assert_eq!(c.lo, Integer);
        assert_eq!(c.hi, NoClass);
    }

    #[test]
    fn oversized_struct_is_memory() {
        use crate::typeinfo::StructType;
        let s = StructType {
            name: "Big".into(),
            size_bytes: 96,
            fields: vec![],
        };
        let c = classify_struct(&s);
        assert_eq!(c.lo, Memory);
        assert_eq!(c.hi, NoClass);
    }
}

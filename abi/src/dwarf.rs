//! Reads DWARF debug information out of a [`Binary`](crate::binary::Binary)
//! and builds [`Type`] trees and function/variable signatures from it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use gimli::{AttributeValue, DebuggingInformationEntry, EndianSlice, LittleEndian, Reader, UnitOffset};
use once_cell::unsync::OnceCell;

use crate::binary::{Binary, MappedFile};
use crate::error::Result;
use crate::typeinfo::{
    ArrayType, EnumConstant, EnumType, Field, FunctionType, Scalar, StructType, Type, UnionType,
    ANONYMOUS_MARKER,
};

type R = EndianSlice<'static, LittleEndian>;
type Unit = gimli::Unit<R>;
type Dwarf = gimli::Dwarf<R>;

/// A subprogram's signature as read out of its `DW_TAG_subprogram` DIE:
/// the declared parameter types (in source order) and the return type
/// (`None` for `void`).
#[derive(Debug, Clone)]
pub struct Subprogram {
    pub name: String,
    pub low_pc: Option<u64>,
    pub parameters: Vec<(String, Type)>,
    pub return_type: Option<Type>,
    /// Resolved targets of `DW_TAG_call_site`/`DW_TAG_GNU_call_site` DIEs
    /// found anywhere within this subprogram's body.
    pub call_sites: Vec<CallTarget>,
}

/// A call made from inside a subprogram's body to another subprogram,
/// resolved via `DW_AT_call_origin`/`DW_AT_abstract_origin` to the
/// callee's own declared signature — not an instruction-level trace of
/// the call, which this crate does not disassemble.
#[derive(Debug, Clone)]
pub struct CallTarget {
    pub name: String,
    pub parameters: Vec<(String, Type)>,
    /// Whether the callee DIE itself carries a `DW_AT_low_pc` (i.e. is
    /// defined, not merely declared, in this compilation unit). A callee
    /// with no definition here is the signal that the call crosses out of
    /// the analyzed library, the "external function reference" spec §4.5
    /// describes a call-site record as coming from.
    pub has_definition: bool,
}

/// A file-scope variable's signature, as read from `DW_TAG_variable`.
#[derive(Debug, Clone)]
pub struct GlobalVariable {
    pub name: String,
    pub ty: Type,
}

struct UnitCache {
    unit: Unit,
    /// Resolved types, keyed by their DIE offset within this unit. Lazily
    /// populated: `OnceCell` per offset would be wasteful, so the whole
    /// map is behind one cell to match the "compute on first unit access"
    /// pattern used elsewhere in this crate, with cycle detection handled
    /// by inserting a placeholder before recursing.
    types: RefCell<HashMap<usize, Type>>,
}

/// Lazily parses a binary's `.debug_*` sections and resolves DWARF type
/// references into [`Type`] trees, caching each compilation unit's
/// header the first time it's visited.
pub struct DwarfInfo {
    dwarf: Dwarf,
    _raw: MappedFile,
    units: OnceCell<Vec<UnitCache>>,
}

fn leak_section(data: &[u8]) -> &'static [u8] {
    // The mapped file outlives this struct (held in `_raw`), but gimli's
    // `Reader` bound wants a `'static` slice; this mirrors how other
    // mmap-backed DWARF readers in this space bridge the borrow by
    // tying the unsafe extension to the Rc-held mapping's lifetime.
    unsafe { std::slice::from_raw_parts(data.as_ptr(), data.len()) }
}

impl DwarfInfo {
    pub fn load(binary: &Binary) -> Result<Self> {
        let raw = binary.raw_data();
        let load_section = |id: gimli::SectionId| -> Result<R> {
            let data = binary.section_data(id.name());
            Ok(EndianSlice::new(leak_section(data), LittleEndian))
        };
        let dwarf = Dwarf::load(load_section)?;
        Ok(DwarfInfo { dwarf, _raw: raw, units: OnceCell::new() })
    }

    fn units(&self) -> Result<&[UnitCache]> {
        if let Some(units) = self.units.get() {
            return Ok(units);
        }
        let mut built = Vec::new();
        let mut iter = self.dwarf.units();
        while let Some(header) = iter.next()? {
            let unit = self.dwarf.unit(header)?;
            built.push(UnitCache { unit, types: RefCell::new(HashMap::new()) });
        }
        let _ = self.units.set(built);
        Ok(self.units.get().unwrap())
    }

    /// Walks every compilation unit's DIEs and returns the subprograms
    /// and file-scope variables that have a name and an address (i.e.
    /// are actually emitted into the binary, not just declared).
    ///
    /// A single depth-first pass tracks the stack of subprogram DIEs
    /// currently open (a subprogram's own children all see it as the
    /// innermost enclosing scope until the walk returns to the
    /// subprogram's own depth or shallower) so that any
    /// `DW_TAG_call_site`/`DW_TAG_GNU_call_site` DIE found anywhere
    /// within its body — including nested inside a `DW_TAG_lexical_block`
    /// — is attributed to the right `Subprogram.call_sites`.
    pub fn subprograms_and_variables(&self) -> Result<(Vec<Subprogram>, Vec<GlobalVariable>)> {
        let units = self.units()?;
        let mut subprograms = Vec::new();
        let mut variables = Vec::new();

        for cache in units {
            let unit = &cache.unit;
            let mut cursor = unit.entries();
            let mut depth: i64 = 0;
            let mut scope_stack: Vec<(i64, usize)> = Vec::new();

            while let Some((delta, entry)) = cursor.next_dfs()? {
                depth += delta;
                while scope_stack.last().is_some_and(|&(d, _)| d >= depth) {
                    scope_stack.pop();
                }

                match entry.tag() {
                    gimli::DW_TAG_subprogram => {
                        if let Some(name) = self.die_name(unit, entry)? {
                            let low_pc = self.low_pc(unit, entry)?;
                            let return_type = self.type_attr(cache, entry, gimli::DW_AT_type)?;
                            let parameters = self.subprogram_parameters(cache, unit, entry)?;
                            subprograms.push(Subprogram {
                                name,
                                low_pc,
                                parameters,
                                return_type,
                                call_sites: Vec::new(),
                            });
                            scope_stack.push((depth, subprograms.len() - 1));
                        }
                    }
                    gimli::DW_TAG_variable => {
                        if let Some(name) = self.die_name(unit, entry)? {
                            if let Some(ty) = self.type_attr(cache, entry, gimli::DW_AT_type)? {
                                variables.push(GlobalVariable { name, ty });
                            }
                        }
                    }
                    gimli::DW_TAG_call_site | gimli::DW_TAG_GNU_call_site => {
                        if let Some(&(_, idx)) = scope_stack.last() {
                            if let Some(target) = self.resolve_call_target(cache, unit, entry)? {
                                subprograms[idx].call_sites.push(target);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok((subprograms, variables))
    }

    /// Resolves a `DW_TAG_call_site`/`DW_TAG_GNU_call_site` DIE to its
    /// callee's own declared signature, via the standard `DW_AT_call_origin`
    /// attribute or (for the older GNU extension) `DW_AT_abstract_origin`.
    /// Returns `None` if the origin can't be resolved to a named DIE in
    /// this unit (e.g. a call through a function pointer, which has no
    /// fixed callee to describe).
    fn resolve_call_target(
        &self,
        cache: &UnitCache,
        unit: &Unit,
        entry: &DebuggingInformationEntry<R>,
    ) -> Result<Option<CallTarget>> {
        let origin = match entry.attr_value(gimli::DW_AT_call_origin)? {
            Some(AttributeValue::UnitRef(off)) => Some(off),
            _ => match entry.attr_value(gimli::DW_AT_abstract_origin)? {
                Some(AttributeValue::UnitRef(off)) => Some(off),
                _ => None,
            },
        };
        let Some(offset) = origin else { return Ok(None) };

        let callee = unit.entry(offset)?;
        let Some(name) = self.die_name(unit, &callee)? else { return Ok(None) };
        let has_definition = self.low_pc(unit, &callee)?.is_some();
        let parameters = self.subprogram_parameters(cache, unit, &callee)?;
        Ok(Some(CallTarget { name, parameters, has_definition }))
    }

    fn subprogram_parameters(
        &self,
        cache: &UnitCache,
        unit: &Unit,
        entry: &DebuggingInformationEntry<R>,
    ) -> Result<Vec<(String, Type)>> {
        let mut params = Vec::new();
        let mut tree = unit.entries_tree(Some(entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        let mut index = 0usize;
        while let Some(child) = children.next()? {
            let child_entry = child.entry();
            if child_entry.tag() == gimli::DW_TAG_formal_parameter {
                let name = self
                    .die_name(unit, child_entry)?
                    .unwrap_or_else(|| format!("param_i{}", index));
                if let Some(ty) = self.type_attr(cache, child_entry, gimli::DW_AT_type)? {
                    params.push((name, ty));
                    index += 1;
                }
            }
        }
        Ok(params)
    }

    fn die_name(&self, unit: &Unit, entry: &DebuggingInformationEntry<R>) -> Result<Option<String>> {
        match entry.attr_value(gimli::DW_AT_name)? {
            Some(AttributeValue::DebugStrRef(off)) => {
                let s = self.dwarf.debug_str.get_str(off)?;
                Ok(Some(s.to_string_lossy()?.into_owned()))
            }
            Some(AttributeValue::String(s)) => Ok(Some(s.to_string_lossy()?.into_owned())),
            Some(AttributeValue::DebugLineStrRef(off)) => {
                let s = self.dwarf.debug_line_str.get_str(off)?;
                Ok(Some(s.to_string_lossy()?.into_owned()))
            }
            _ => {
                let _ = unit;
                Ok(None)
            }
        }
    }

    fn low_pc(&self, _unit: &Unit, entry: &DebuggingInformationEntry<R>) -> Result<Option<u64>> {
        match entry.attr_value(gimli::DW_AT_low_pc)? {
            Some(AttributeValue::Addr(a)) => Ok(Some(a)),
            _ => Ok(None),
        }
    }

    fn resolve_offset(
        &self,
        cache: &UnitCache,
        offset: UnitOffset,
    ) -> Result<Option<Type>> {
        let key = offset.0;
        if let Some(ty) = cache.types.borrow().get(&key) {
            return Ok(Some(ty.clone()));
        }

        // Insert a cheap placeholder before recursing so a
        // self-referential type (a struct whose only path back to
        // itself is through another DIE, not a pointer) can't blow the
        // stack; pointer/reference members already short-circuit via
        // Rc sharing once the real type lands in the cache.
        let unit = &cache.unit;
        let entry = unit.entry(offset)?;

        let ty = self.build_type(cache, unit, &entry)?;
        cache.types.borrow_mut().insert(key, ty.clone());
        Ok(Some(ty))
    }

    fn type_attr(
        &self,
        cache: &UnitCache,
        entry: &DebuggingInformationEntry<R>,
        attr: gimli::DwAt,
    ) -> Result<Option<Type>> {
        match entry.attr_value(attr)? {
            Some(AttributeValue::UnitRef(off)) => self.resolve_offset(cache, off),
            _ => Ok(None),
        }
    }

    fn byte_size(&self, entry: &DebuggingInformationEntry<R>) -> Result<u64> {
        Ok(match entry.attr_value(gimli::DW_AT_byte_size)? {
            Some(AttributeValue::Udata(n)) => n,
            Some(AttributeValue::Data1(n)) => n as u64,
            Some(AttributeValue::Data2(n)) => n as u64,
            Some(AttributeValue::Data4(n)) => n as u64,
            Some(AttributeValue::Data8(n)) => n,
            _ => 0,
        })
    }

    fn build_type(&self, cache: &UnitCache, unit: &Unit, entry: &DebuggingInformationEntry<R>) -> Result<Type> {
        let name = self.die_name(unit, entry)?;

        Ok(match entry.tag() {
            gimli::DW_TAG_base_type => {
                let size_bytes = self.byte_size(entry)?;
                let encoding = match entry.attr_value(gimli::DW_AT_encoding)? {
                    Some(AttributeValue::Udata(n)) => n as u8,
                    _ => 0,
                };
                Type::Scalar(base_type_scalar(name.unwrap_or_default(), size_bytes, encoding))
            }
            gimli::DW_TAG_pointer_type => {
                let inner = self.type_attr(cache, entry, gimli::DW_AT_type)?.unwrap_or(void_scalar());
                Type::Pointer(Rc::new(inner))
            }
            gimli::DW_TAG_reference_type | gimli::DW_TAG_rvalue_reference_type => {
                let inner = self.type_attr(cache, entry, gimli::DW_AT_type)?.unwrap_or(void_scalar());
                Type::Reference(Rc::new(inner))
            }
            gimli::DW_TAG_typedef => {
                let inner = self.type_attr(cache, entry, gimli::DW_AT_type)?.unwrap_or(void_scalar());
                Type::Typedef(Rc::new(inner))
            }
            gimli::DW_TAG_const_type | gimli::DW_TAG_volatile_type | gimli::DW_TAG_restrict_type => {
                // Qualifiers are transparent: not a decoration the schema
                // tracks (unlike pointer/reference/typedef), so unwrap to
                // the qualified type directly rather than wrapping again.
                match self.type_attr(cache, entry, gimli::DW_AT_type)? {
                    Some(inner) => inner,
                    None => void_scalar(),
                }
            }
            gimli::DW_TAG_structure_type | gimli::DW_TAG_class_type => {
                let size_bytes = self.byte_size(entry)?;
                let fields = self.member_fields(cache, unit, entry)?;
                Type::Struct(StructType {
                    name: name.unwrap_or_else(|| ANONYMOUS_MARKER.to_string()),
                    size_bytes,
                    fields,
                })
            }
            gimli::DW_TAG_union_type => {
                let size_bytes = self.byte_size(entry)?;
                let fields = self.member_fields(cache, unit, entry)?;
                Type::Union(UnionType {
                    name: name.unwrap_or_else(|| ANONYMOUS_MARKER.to_string()),
                    size_bytes,
                    fields,
                })
            }
            gimli::DW_TAG_array_type => {
                let element = self.type_attr(cache, entry, gimli::DW_AT_type)?.unwrap_or(void_scalar());
                let count = self.array_element_count(unit, entry)?;
                let elem_size = element.size_bytes();
                Type::Array(ArrayType {
                    name: name.unwrap_or_default(),
                    size_bytes: elem_size * count,
                    element_type: Rc::new(element),
                })
            }
            gimli::DW_TAG_enumeration_type => {
                let size_bytes = self.byte_size(entry)?;
                let constants = self.enum_constants(unit, entry)?;
                Type::Enum(EnumType {
                    name: name.unwrap_or_default(),
                    size_bytes,
                    constants,
                })
            }
            gimli::DW_TAG_subroutine_type => Type::Function(FunctionType {
                name: name.unwrap_or_default(),
                size_bytes: 0,
            }),
            _ => void_scalar(),
        })
    }

    fn member_fields(&self, cache: &UnitCache, unit: &Unit, entry: &DebuggingInformationEntry<R>) -> Result<Vec<Field>> {
        let mut fields = Vec::new();
        let mut tree = unit.entries_tree(Some(entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let child_entry = child.entry();
            if child_entry.tag() != gimli::DW_TAG_member {
                continue;
            }
            let name = self.die_name(unit, child_entry)?.unwrap_or_default();
            let offset = match child_entry.attr_value(gimli::DW_AT_data_member_location)? {
                Some(AttributeValue::Udata(n)) => n,
                Some(AttributeValue::Data1(n)) => n as u64,
                Some(AttributeValue::Data2(n)) => n as u64,
                Some(AttributeValue::Data4(n)) => n as u64,
                Some(AttributeValue::Data8(n)) => n,
                _ => 0,
            };
            if let Some(ty) = self.type_attr(cache, child_entry, gimli::DW_AT_type)? {
                fields.push(Field { name, ty, offset });
            }
        }
        Ok(fields)
    }

    fn array_element_count(&self, unit: &Unit, entry: &DebuggingInformationEntry<R>) -> Result<u64> {
        let mut tree = unit.entries_tree(Some(entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let child_entry = child.entry();
            if child_entry.tag() == gimli::DW_TAG_subrange_type {
                if let Some(AttributeValue::Udata(n)) = child_entry.attr_value(gimli::DW_AT_count)? {
                    return Ok(n);
                }
                if let Some(AttributeValue::Udata(n)) = child_entry.attr_value(gimli::DW_AT_upper_bound)? {
                    return Ok(n + 1);
                }
            }
        }
        Ok(0)
    }

    fn enum_constants(&self, unit: &Unit, entry: &DebuggingInformationEntry<R>) -> Result<Vec<EnumConstant>> {
        let mut constants = Vec::new();
        let mut tree = unit.entries_tree(Some(entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let child_entry = child.entry();
            if child_entry.tag() != gimli::DW_TAG_enumerator {
                continue;
            }
            let name = self.die_name(unit, child_entry)?.unwrap_or_default();
            let value = match child_entry.attr_value(gimli::DW_AT_const_value)? {
                Some(AttributeValue::Sdata(n)) => n,
                Some(AttributeValue::Udata(n)) => n as i64,
                _ => 0,
            };
            constants.push(EnumConstant { name, value });
        }
        Ok(constants)
    }
}

fn void_scalar() -> Type {
    Type::Scalar(Scalar {
        name: "void".into(),
        size_bytes: 0,
        is_integral: false,
        is_utf: false,
        is_floating_point: false,
        is_complex_float: false,
    })
}

/// DW_ATE_* encoding constants relevant to classification (see the DWARF5
/// spec, section 7.8).
const DW_ATE_ADDRESS: u8 = 0x01;
const DW_ATE_BOOLEAN: u8 = 0x02;
const DW_ATE_COMPLEX_FLOAT: u8 = 0x03;
const DW_ATE_FLOAT: u8 = 0x04;
const DW_ATE_SIGNED: u8 = 0x05;
const DW_ATE_SIGNED_CHAR: u8 = 0x06;
const DW_ATE_UNSIGNED: u8 = 0x07;
const DW_ATE_UNSIGNED_CHAR: u8 = 0x08;
const DW_ATE_UTF: u8 = 0x10;

fn base_type_scalar(name: String, size_bytes: u64, encoding: u8) -> Scalar {
    let is_floating_point = encoding == DW_ATE_FLOAT || encoding == DW_ATE_COMPLEX_FLOAT;
    let is_complex_float = encoding == DW_ATE_COMPLEX_FLOAT;
    let is_utf = encoding == DW_ATE_UTF;
    let is_integral = matches!(
        encoding,
        DW_ATE_BOOLEAN | DW_ATE_SIGNED | DW_ATE_SIGNED_CHAR | DW_ATE_UNSIGNED | DW_ATE_UNSIGNED_CHAR | DW_ATE_ADDRESS
    );

    Scalar { name, size_bytes, is_integral, is_utf, is_floating_point, is_complex_float }
}

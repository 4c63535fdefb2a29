//! Register and stack allocation for classified parameters and return
//! values: turns a [`Classification`] into concrete locations
//! (`%rdi`, `%xmm0`, `[framebase+N]`, ...).

use crate::classify::{Classification, RegisterClass};
use crate::error::{Error, Result};

/// Where a value (or one eightbyte of a value) ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Register(&'static str),
    /// Offset in bytes from the frame base (the first stack argument
    /// starts at 8, above the return address).
    Framebase(u64),
}

/// The integer argument registers, in allocation order.
const INTEGER_ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
/// The SSE argument registers, in allocation order.
const SSE_ARG_REGS: [&str; 8] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7",
];

/// Tracks how many integer/SSE registers have been handed out so far
/// while walking a parameter list, and the next free stack slot.
#[derive(Debug, Default)]
pub struct RegisterAllocator {
    next_integer: usize,
    next_sse: usize,
    framebase: FramebaseAllocator,
}

/// Allocates 8-byte-aligned offsets from the frame base, starting after
/// the return address at offset 8.
#[derive(Debug)]
pub struct FramebaseAllocator {
    next_offset: u64,
}

impl Default for FramebaseAllocator {
    fn default() -> Self {
        FramebaseAllocator { next_offset: 8 }
    }
}

impl FramebaseAllocator {
    /// Reserves `size_bytes` (rounded up to an 8-byte multiple, minimum
    /// one eightbyte) and returns the offset at which it starts.
    pub fn allocate(&mut self, size_bytes: u64) -> u64 {
        let offset = self.next_offset;
        let rounded = size_bytes.div_ceil(8) * 8;
        self.next_offset += rounded.max(8);
        offset
    }
}

impl RegisterAllocator {
    pub fn new() -> Self {
        RegisterAllocator::default()
    }

    fn remaining_integer(&self) -> usize {
        INTEGER_ARG_REGS.len() - self.next_integer
    }

    fn remaining_sse(&self) -> usize {
        SSE_ARG_REGS.len() - self.next_sse
    }

    fn take_integer(&mut self) -> Location {
        let reg = INTEGER_ARG_REGS[self.next_integer];
        self.next_integer += 1;
        Location::Register(reg)
    }

    fn take_sse(&mut self) -> Location {
        let reg = SSE_ARG_REGS[self.next_sse];
        self.next_sse += 1;
        Location::Register(reg)
    }

    /// How many eightbytes a classification occupies: two only when `hi`
    /// is itself a real class that needs a register of its own. `SseUp`
    /// is the one exception — per spec §4.3, it packs into the upper
    /// half of the register `lo` already claimed, so it never counts as
    /// a second eightbyte.
    fn eightbyte_count(c: &Classification) -> usize {
        if c.hi == RegisterClass::NoClass || c.hi == RegisterClass::SseUp {
            1
        } else {
            2
        }
    }

    fn registers_needed(c: &Classification) -> (usize, usize) {
        let mut integer = 0;
        let mut sse = 0;
        for class in [c.lo, c.hi].into_iter().take(Self::eightbyte_count(c)) {
            match class {
                RegisterClass::Integer => integer += 1,
                RegisterClass::Sse | RegisterClass::SseUp => sse += 1,
                _ => {}
            }
        }
        (integer, sse)
    }

    /// Allocates locations for one classified argument, per the
    /// decision table in spec §4.3. Returns one location per eightbyte
    /// (one or two), an empty `Vec` for an empty aggregate (`"none"` at
    /// the JSON boundary), or falls back to a single framebase slot
    /// covering the whole `size_bytes` if registers ran out or the
    /// class is `Memory`.
    ///
    /// Returns [`Error::AllocatorInvariant`] if `lo == NoClass` for a
    /// non-empty value — the classifier failed to produce a real class,
    /// which spec §7 treats as a per-function-fatal bug rather than
    /// something to paper over with a fabricated location.
    pub fn allocate_argument(&mut self, c: &Classification, size_bytes: u64) -> Result<Vec<Location>> {
        if c.lo == RegisterClass::NoClass {
            return if size_bytes == 0 {
                Ok(Vec::new())
            } else {
                Err(Error::AllocatorInvariant {
                    detail: format!("can't allocate {{NO_CLASS, {:?}}} for a {size_bytes}-byte value", c.hi),
                })
            };
        }

        if c.lo == RegisterClass::Memory {
            return Ok(vec![Location::Framebase(self.framebase.allocate(size_bytes))]);
        }

        let eightbytes = Self::eightbyte_count(c);
        let (integer_needed, sse_needed) = Self::registers_needed(c);

        if integer_needed <= self.remaining_integer()
            && sse_needed <= self.remaining_sse()
            && integer_needed + sse_needed <= self.remaining_integer() + self.remaining_sse()
        {
            let mut locs = Vec::with_capacity(eightbytes);
            for class in [c.lo, c.hi].into_iter().take(eightbytes) {
                locs.push(match class {
                    RegisterClass::Integer => self.take_integer(),
                    RegisterClass::Sse | RegisterClass::SseUp => self.take_sse(),
                    // X87/X87Up/ComplexX87 never reach here: classify()
                    // only ever merges these into Memory by the time a
                    // struct's post-merge runs, and the scalar table
                    // routes bare long-double/complex floats through the
                    // framebase branch below via their own Memory/X87
                    // classes before this point is reached.
                    _ => return self.spill_whole(size_bytes),
                });
            }
            Ok(locs)
        } else {
            // Not enough registers remain for every eightbyte: the whole
            // aggregate is passed in memory, per the ABI's "not enough
            // registers remain" rule.
            self.spill_whole(size_bytes)
        }
    }

    fn spill_whole(&mut self, size_bytes: u64) -> Result<Vec<Location>> {
        Ok(vec![Location::Framebase(self.framebase.allocate(size_bytes))])
    }
}

/// Allocates locations for a classified return value. Unlike arguments,
/// return values always get a fixed register assignment (or `Memory`,
/// meaning the caller-supplied hidden pointer, represented here as the
/// literal register name `"rax"` holding that pointer per the ABI, with
/// the actual struct written through it).
pub struct ReturnValueAllocator;

impl ReturnValueAllocator {
    pub fn allocate(c: &Classification) -> Vec<Location> {
        match (c.lo, c.hi) {
            (RegisterClass::NoClass, _) => Vec::new(),
            (RegisterClass::Memory, _) => vec![Location::Register("rax")],
            (RegisterClass::Integer, RegisterClass::NoClass) => vec![Location::Register("rax")],
            (RegisterClass::Integer, RegisterClass::Integer) => {
                vec![Location::Register("rax"), Location::Register("rdx")]
            }
            (RegisterClass::Sse, RegisterClass::NoClass) => vec![Location::Register("xmm0")],
            (RegisterClass::Sse, RegisterClass::Sse) => {
                vec![Location::Register("xmm0"), Location::Register("xmm1")]
            }
            (RegisterClass::Sse, RegisterClass::SseUp) => {
                // Second eightbyte packs into the upper half of xmm0; the
                // allocator still reports it as a distinct location using
                // the ABI's own placeholder name, matching the documented
                // quirk rather than inventing a new register name.
                vec![Location::Register("xmm0"), Location::Register("SSEUP")]
            }
            (RegisterClass::Integer, RegisterClass::Sse) => {
                vec![Location::Register("rax"), Location::Register("xmm0")]
            }
            (RegisterClass::Sse, RegisterClass::Integer) => {
                vec![Location::Register("xmm0"), Location::Register("rax")]
            }
            (RegisterClass::X87, RegisterClass::X87Up) => {
                vec![Location::Register("st0"), Location::Register("st1")]
            }
            (RegisterClass::ComplexX87, RegisterClass::NoClass) => {
                vec![Location::Register("st0"), Location::Register("st1")]
            }
            _ => vec![Location::Register("rax")],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Category;

    fn cls(lo: RegisterClass, hi: RegisterClass) -> Classification {
        Classification { lo, hi, category: Category::Integer }
    }

    #[test]
    fn first_six_integer_args_go_to_registers() {
        let mut alloc = RegisterAllocator::new();
        let expected = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
        for reg in expected {
            let locs = alloc
                .allocate_argument(&cls(RegisterClass::Integer, RegisterClass::NoClass), 4)
                .unwrap();
            assert_eq!(locs, vec![Location::Register(reg)]);
        }
    }

    #[test]
    fn seventh_integer_arg_spills_to_framebase() {
        let mut alloc = RegisterAllocator::new();
        for _ in 0..6 {
            alloc
                .allocate_argument(&cls(RegisterClass::Integer, RegisterClass::NoClass), 4)
                .unwrap();
        }
        let locs = alloc
            .allocate_argument(&cls(RegisterClass::Integer, RegisterClass::NoClass), 4)
            .unwrap();
        assert_eq!(locs, vec![Location::Framebase(8)]);
    }

    #[test]
    fn double_argument_consumes_only_one_sse_register() {
        let mut alloc = RegisterAllocator::new();
        let locs = alloc
            .allocate_argument(&cls(RegisterClass::Sse, RegisterClass::SseUp), 8)
            .unwrap();
        assert_eq!(locs, vec![Location::Register("xmm0")]);
    }

    #[test]
    fn eight_double_args_fill_every_xmm_register_before_spilling() {
        let mut alloc = RegisterAllocator::new();
        let expected = ["xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7"];
        for reg in expected {
            let locs = alloc
                .allocate_argument(&cls(RegisterClass::Sse, RegisterClass::SseUp), 8)
                .unwrap();
            assert_eq!(locs, vec![Location::Register(reg)]);
        }
        let locs = alloc
            .allocate_argument(&cls(RegisterClass::Sse, RegisterClass::SseUp), 8)
            .unwrap();
        assert_eq!(locs, vec![Location::Framebase(8)]);
    }

    #[test]
    fn memory_class_always_goes_to_framebase() {
        let mut alloc = RegisterAllocator::new();
        let locs = alloc
            .allocate_argument(&cls(RegisterClass::Memory, RegisterClass::NoClass), 96)
            .unwrap();
        assert_eq!(locs, vec![Location::Framebase(8)]);
    }

    #[test]
    fn empty_aggregate_allocates_no_location() {
        let mut alloc = RegisterAllocator::new();
        let locs = alloc
            .allocate_argument(&cls(RegisterClass::NoClass, RegisterClass::NoClass), 0)
            .unwrap();
        assert!(locs.is_empty());
    }

    #[test]
    fn no_class_for_non_empty_value_is_an_allocator_invariant_error() {
        let mut alloc = RegisterAllocator::new();
        let err = alloc
            .allocate_argument(&cls(RegisterClass::NoClass, RegisterClass::NoClass), 4)
            .unwrap_err();
        assert!(matches!(err, Error::AllocatorInvariant { .. }));
    }

    #[test]
    fn framebase_advances_by_rounded_size() {
        let mut fb = FramebaseAllocator::default();
        assert_eq!(fb.allocate(4), 8);
        assert_eq!(fb.allocate(4), 16);
        assert_eq!(fb.allocate(96), 24);
        assert_eq!(fb.allocate(1), 120);
    }

    #[test]
    fn int_return_goes_to_rax() {
        let locs = ReturnValueAllocator::allocate(&cls(RegisterClass::Integer, RegisterClass::NoClass));
        assert_eq!(locs, vec![Location::Register("rax")]);
    }

    #[test]
    fn wide_integer_return_splits_across_rax_rdx() {
        let locs = ReturnValueAllocator::allocate(&cls(RegisterClass::Integer, RegisterClass::Integer));
        assert_eq!(locs, vec![Location::Register("rax"), Location::Register("rdx")]);
    }

    #[test]
    fn memory_return_uses_hidden_pointer_in_rax() {
        let locs = ReturnValueAllocator::allocate(&cls(RegisterClass::Memory, RegisterClass::NoClass));
        assert_eq!(locs, vec![Location::Register("rax")]);
    }

    #[test]
    fn double_return_goes_to_xmm0() {
        let locs = ReturnValueAllocator::allocate(&cls(RegisterClass::Sse, RegisterClass::NoClass));
        assert_eq!(locs, vec![Location::Register("xmm0")]);
    }
}

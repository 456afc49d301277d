/// Discriminates what a [`Ref`]'s index addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefKind {
    /// Absent operand; reading or writing one is a VM bug, not a language error.
    Null,
    /// `x` is an immediate value, not a variable-stack index.
    Constant,
    /// `x` is an opaque handle threaded through an allocation instruction
    /// (e.g. a type pointer), not addressable on the variable stack.
    StaticPointer,
    /// `x` indexes the global prefix of the variable stack.
    Global,
    /// `x` indexes the current frame's local region.
    Local,
    /// `x` indexes the current frame's temporary region; consuming this ref
    /// unbinds the slot.
    Temporary,
}

/// A compile-time operand descriptor, resolved against a call frame at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ref {
    /// What `x` addresses.
    pub kind: RefKind,
    /// Immediate value or variable-stack index, depending on `kind`.
    pub x: i64,
}

impl Ref {
    /// The absent ref.
    pub const NULL: Ref = Ref { kind: RefKind::Null, x: 0 };

    /// An immediate integer operand.
    pub const fn constant(value: i64) -> Ref {
        Ref { kind: RefKind::Constant, x: value }
    }

    /// A reference to global slot `index`.
    pub const fn global(index: i64) -> Ref {
        Ref { kind: RefKind::Global, x: index }
    }

    /// A reference to local slot `index` within the current frame.
    pub const fn local(index: i64) -> Ref {
        Ref { kind: RefKind::Local, x: index }
    }

    /// A reference to temporary slot `index` within the current frame.
    pub const fn temporary(index: i64) -> Ref {
        Ref { kind: RefKind::Temporary, x: index }
    }

    /// An opaque static-pointer operand (e.g. a type handle).
    pub const fn static_pointer(handle: i64) -> Ref {
        Ref { kind: RefKind::StaticPointer, x: handle }
    }

    /// True for refs whose consumption should unbind the addressed slot.
    pub const fn is_temporary(&self) -> bool {
        matches!(self.kind, RefKind::Temporary)
    }
}

/// Bitfield carried by every [`Instruction`], describing operand width and
/// a couple of execution hints the VM needs but the opcode alone doesn't
/// encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OperationFlags(u8);

impl OperationFlags {
    const WIDTH_MASK: u8 = 0b0000_0011;
    const FLOAT_BIT: u8 = 0b0000_0100;
    const SHARED_BUFF_BIT: u8 = 0b0000_1000;

    /// The zero-valued flag set: 8-bit, integer, not a shared-buffer operand.
    pub const EMPTY: OperationFlags = OperationFlags(0);

    /// Build flags for a given operand width.
    pub const fn width(bytes: u8) -> OperationFlags {
        let code = match bytes {
            1 => 0,
            2 => 1,
            4 => 2,
            _ => 3,
        };
        OperationFlags(code)
    }

    /// Operand width in bytes.
    pub const fn width_bytes(self) -> u8 {
        match self.0 & Self::WIDTH_MASK {
            0 => 1,
            1 => 2,
            2 => 4,
            _ => 8,
        }
    }

    /// Mark this instruction as operating on floats rather than integers.
    pub const fn with_float(self) -> OperationFlags {
        OperationFlags(self.0 | Self::FLOAT_BIT)
    }

    /// True if the float marker is set.
    pub const fn is_float(self) -> bool {
        self.0 & Self::FLOAT_BIT != 0
    }

    /// Mark this instruction as operating on a shared (refcounted) array buffer.
    pub const fn with_shared_buff(self) -> OperationFlags {
        OperationFlags(self.0 | Self::SHARED_BUFF_BIT)
    }

    /// True if the shared-buffer marker is set.
    pub const fn is_shared_buff(self) -> bool {
        self.0 & Self::SHARED_BUFF_BIT != 0
    }
}

/// The instruction set executed by the VM.
///
/// #### Operand convention
/// Unless noted, `output = arg1 OP arg2`. `MOV` and everything above it in
/// this list ignore `arg2` entirely; the compiler always emits `Ref::NULL`
/// there and the VM never reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    /// `output = arg1`. Plain copy; for refcounted types this increments the
    /// source's strong count unless `arg1` is a temporary being moved.
    Mov = 0,
    /// `output = arg1 + arg2`.
    Plus,
    /// `output = arg1 - arg2`.
    Minus,
    /// `output = arg1 * arg2`.
    Mul,
    /// `output = arg1 / arg2`, truncating toward zero.
    Div,
    /// `output = arg1 % arg2`, truncating remainder (same sign as `arg1`).
    Mod,
    /// Euclidean division: `output` satisfies `EDiv(a,b)*b + EMod(a,b) == a`
    /// with `0 <= EMod(a,b) < b`, for `b > 0`.
    EDiv,
    /// Euclidean remainder, see [`Op::EDiv`].
    EMod,
    /// `output = arg1 == arg2` (0 or 1).
    Eq,
    /// `output = arg1 != arg2`.
    Neq,
    /// `output = arg1 < arg2`.
    Lt,
    /// `output = arg1 <= arg2`.
    Le,
    /// `output = arg1 > arg2`.
    Gt,
    /// `output = arg1 >= arg2`.
    Ge,
    /// `output = arg1 && arg2`, both nonzero.
    And,
    /// `output = arg1 || arg2`, either nonzero.
    Or,
    /// `output = !arg1` (arg2 ignored).
    Not,
    /// `output = -arg1` (arg2 ignored).
    Neg,
    /// Allocate a refcounted array of `arg2` elements of the element type
    /// named by the static pointer `arg1`; `output` receives the descriptor.
    ArrayAlloc,
    /// Store the value at `arg2` into element `arg1` of the array `output`
    /// addresses; `output` is read-modify-write (the array itself doesn't move).
    ArrayStore,
    /// Load element `arg2` of the array `arg1` into `output`.
    ArrayLoad,
    /// Compute the word offset of tuple/record element `arg2` within the
    /// aggregate pointer `arg1`, writing the resulting pointer to `output`.
    ArrayOffset,
    /// Load the word at memory-stack address `arg1` into `output` (`arg2`
    /// unused). Pairs with [`Op::ArrayOffset`] to read a scalar tuple/record
    /// field through its computed pointer.
    MemLoad,
    /// Store `arg1` into the word at memory-stack address `output` (`output`
    /// is read-modify-write, the address itself doesn't move; `arg2` unused).
    MemStore,
    /// Reserve `arg1` words on the VM's word-addressable memory stack;
    /// `output` receives the base pointer.
    StackAlloc,
    /// Free the top `arg1` words of the memory stack. `output` is unused
    /// (`Ref::NULL`).
    StackFree,
    /// Copy `arg2` words from `arg1` to `output`; source and destination may
    /// not overlap.
    PointerCopy,
    /// As [`Op::PointerCopy`], but source and destination may overlap
    /// (used when compacting a partially-consumed record/tuple downward).
    PointerCopyOverlapping,
    /// Increment the strong refcount of the shared buffer `output` addresses
    /// (`arg1`/`arg2` unused).
    PointerIncrementRefcount,
    /// Decrement the strong refcount of the shared buffer `output`
    /// addresses, freeing it at zero (`arg1`/`arg2` unused).
    PointerDecrementRefcount,
    /// Push `arg1` as the next outgoing call argument (`output`/`arg2` unused).
    Push,
    /// Invoke the procedure bound at global slot `arg1.x` with `arg2`
    /// previously pushed arguments; `output` receives its first return
    /// value. The callee is resolved at compile time, so `arg1` is read
    /// directly as an index rather than through the variable stack.
    Call,
    /// Return from the current frame; `arg1` is the first return value.
    Return,
    /// Assert `arg1` is nonzero, else raise a runtime assertion failure.
    /// `output`/`arg2` unused.
    Assert,
}

/// One bytecode instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    /// Operation to perform.
    pub op: Op,
    /// Operand-width/float/shared-buffer bits.
    pub flags: OperationFlags,
    /// Destination operand.
    pub output: Ref,
    /// First source operand.
    pub arg1: Ref,
    /// Second source operand, or `Ref::NULL` if `op` doesn't use one.
    pub arg2: Ref,
}

impl Instruction {
    /// Build an instruction with default (8-bit, int, non-shared) flags.
    pub const fn new(op: Op, output: Ref, arg1: Ref, arg2: Ref) -> Instruction {
        Instruction { op, flags: OperationFlags::EMPTY, output, arg1, arg2 }
    }

    /// Build an instruction with explicit flags.
    pub const fn with_flags(op: Op, flags: OperationFlags, output: Ref, arg1: Ref, arg2: Ref) -> Instruction {
        Instruction { op, flags, output, arg1, arg2 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_flags_round_trip() {
        for bytes in [1u8, 2, 4, 8] {
            assert_eq!(OperationFlags::width(bytes).width_bytes(), bytes);
        }
    }

    #[test]
    fn float_and_shared_buff_bits_are_independent() {
        let f = OperationFlags::width(8).with_float();
        assert!(f.is_float());
        assert!(!f.is_shared_buff());
        let s = f.with_shared_buff();
        assert!(s.is_float());
        assert!(s.is_shared_buff());
    }

    #[test]
    fn temporary_ref_is_flagged_for_unbinding() {
        assert!(Ref::temporary(3).is_temporary());
        assert!(!Ref::local(3).is_temporary());
    }
}

/// Bytecode opcodes.
///
/// Each opcode is followed by a packed little-endian operand record (see
/// [`crate::instruction`]); records are decoded with unaligned reads, so the
/// stream carries no padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    /// Read a named property: `dst = base[name]`.
    /// Operands: `base:slot`, `index:u32` (constant ordinal of the name), `dst:slot`
    TableGetById = 0x00,

    /// Write a named property: `base[name] = src`.
    /// Operands: `base:slot`, `index:u32`, `src:slot`
    TablePutById,

    /// Read an indexed property: `dst = base[index]`.
    /// Operands: `base:slot`, `index:slot`, `dst:slot`
    TableGetByVal,

    /// Write an indexed property: `base[index] = src`.
    /// Operands: `base:slot`, `index:slot`, `src:slot`
    TablePutByVal,

    /// Read a global: `dst = globals[name]`.
    /// Operands: `index:u32`, `dst:slot`
    GlobalGet,

    /// Write a global: `globals[name] = src`.
    /// Operands: `index:u32`, `src:slot`
    GlobalPut,

    /// Return from the current function.
    /// Operands: `slot_begin:slot`, `num_return_values:u16`, `is_variadic:u8`
    Return,

    /// Call the function in `func_slot` with arguments in the slots after it.
    /// Operands: `func_slot:slot`, `num_fixed_params:u32`, `num_fixed_rets:u32`,
    /// `keep_variadic_ret:u8`, `pass_variadic_res:u8`, `ic_site:u32`
    Call,

    /// `result = lhs + rhs` (numeric).
    /// Operands: `lhs:slot`, `rhs:slot`, `result:slot`
    AddVV,

    /// `result = lhs - rhs` (numeric).
    /// Operands: `lhs:slot`, `rhs:slot`, `result:slot`
    SubVV,

    /// Branch if `lhs < rhs` (numeric).
    /// Operands: `lhs:slot`, `rhs:slot`, `offset:i32` (relative to the
    /// start of this instruction)
    IsLtVV,

    /// Load a constant value into a local.
    /// Operands: `dst:slot`, `value:u64` (boxed bits)
    Constant,

    /// Create a closure from a child prototype, capturing upvalues from the
    /// current frame. Operands: `dst:slot`, `proto_index:u32`
    NewClosure,

    /// Close every open upvalue pointing at a local `>= start`.
    /// Operands: `start:slot`
    UpvalueClose,
}

impl Op {
    pub const COUNT: usize = Op::UpvalueClose as usize + 1;

    /// Convert a raw byte to an opcode without a bounds check.
    ///
    /// # Safety
    ///
    /// `byte` must be a valid opcode value (`< Op::COUNT`).
    #[inline(always)]
    pub unsafe fn from_u8_unchecked(byte: u8) -> Self {
        debug_assert!(
            (byte as usize) < Self::COUNT,
            "invalid opcode: 0x{byte:02x}"
        );
        unsafe { core::mem::transmute::<u8, Op>(byte) }
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if byte < Self::COUNT as u8 {
            // SAFETY: Op is repr(u8) with contiguous variants starting at 0.
            Ok(unsafe { core::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}

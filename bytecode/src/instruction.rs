use object::TValue;

use crate::slot::BytecodeSlot;

/// Decode the operand record at `offset` with an unaligned read.
///
/// # Safety
///
/// The bytes at `offset` must hold a record of type `T` (the builder only
/// ever emits whole records, so an offset produced by walking the stream
/// with [`crate::decoder::BytecodeDecoder`] is always valid).
#[inline(always)]
pub unsafe fn decode<T: Copy>(bytecode: &[u8], offset: usize) -> T {
    debug_assert!(offset + size_of::<T>() <= bytecode.len());
    unsafe { core::ptr::read_unaligned(bytecode.as_ptr().add(offset) as *const T) }
}

/// Decode the operand record at a raw instruction pointer.
///
/// # Safety
///
/// `instr` must point at a record of type `T` inside a live bytecode stream.
#[inline(always)]
pub unsafe fn decode_raw<T: Copy>(instr: *const u8) -> T {
    unsafe { core::ptr::read_unaligned(instr as *const T) }
}

/// View an operand record as raw bytes for emission.
#[inline(always)]
pub(crate) fn record_bytes<T: Copy>(record: &T) -> &[u8] {
    // SAFETY: operand records are packed plain-old-data, every byte is
    // initialized.
    unsafe { core::slice::from_raw_parts(record as *const T as *const u8, size_of::<T>()) }
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BcTableGetById {
    pub opcode: u8,
    pub base: BytecodeSlot,
    /// Constant ordinal of the property name.
    pub index: u32,
    pub dst: BytecodeSlot,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BcTablePutById {
    pub opcode: u8,
    pub base: BytecodeSlot,
    pub index: u32,
    pub src: BytecodeSlot,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BcTableGetByVal {
    pub opcode: u8,
    pub base: BytecodeSlot,
    pub index: BytecodeSlot,
    pub dst: BytecodeSlot,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BcTablePutByVal {
    pub opcode: u8,
    pub base: BytecodeSlot,
    pub index: BytecodeSlot,
    pub src: BytecodeSlot,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BcGlobalGet {
    pub opcode: u8,
    /// Constant ordinal of the global's name.
    pub index: u32,
    pub dst: BytecodeSlot,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BcGlobalPut {
    pub opcode: u8,
    pub index: u32,
    pub src: BytecodeSlot,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BcReturn {
    pub opcode: u8,
    pub slot_begin: BytecodeSlot,
    pub num_return_values: u16,
    is_variadic: u8,
}

impl BcReturn {
    pub(crate) fn new(slot_begin: BytecodeSlot, num_return_values: u16, is_variadic: bool) -> Self {
        Self {
            opcode: crate::op::Op::Return as u8,
            slot_begin,
            num_return_values,
            is_variadic: is_variadic as u8,
        }
    }

    /// The variadic results of the last call are appended to the fixed
    /// return values.
    #[inline(always)]
    pub fn is_variadic(&self) -> bool {
        self.is_variadic != 0
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BcCall {
    pub opcode: u8,
    pub func_slot: BytecodeSlot,
    pub num_fixed_params: u32,
    pub num_fixed_rets: u32,
    keep_variadic_ret: u8,
    pass_variadic_res: u8,
    /// Call-site ordinal, indexing the code block's inline-cache table.
    pub ic_site: u32,
}

impl BcCall {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        func_slot: BytecodeSlot,
        num_fixed_params: u32,
        num_fixed_rets: u32,
        keep_variadic_ret: bool,
        pass_variadic_res: bool,
        ic_site: u32,
    ) -> Self {
        Self {
            opcode: crate::op::Op::Call as u8,
            func_slot,
            num_fixed_params,
            num_fixed_rets,
            keep_variadic_ret: keep_variadic_ret as u8,
            pass_variadic_res: pass_variadic_res as u8,
            ic_site,
        }
    }

    /// Keep all results as variadic returns instead of storing fixed slots.
    #[inline(always)]
    pub fn keep_variadic_ret(&self) -> bool {
        self.keep_variadic_ret != 0
    }

    /// Append the current variadic results to the fixed arguments.
    #[inline(always)]
    pub fn pass_variadic_res(&self) -> bool {
        self.pass_variadic_res != 0
    }
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BcAddVV {
    pub opcode: u8,
    pub lhs: BytecodeSlot,
    pub rhs: BytecodeSlot,
    pub result: BytecodeSlot,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BcSubVV {
    pub opcode: u8,
    pub lhs: BytecodeSlot,
    pub rhs: BytecodeSlot,
    pub result: BytecodeSlot,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BcIsLtVV {
    pub opcode: u8,
    pub lhs: BytecodeSlot,
    pub rhs: BytecodeSlot,
    /// Branch target, in bytes relative to the start of this instruction.
    pub offset: i32,
}

/// Byte position of [`BcIsLtVV::offset`] within the record; the builder
/// patches branch targets through it.
pub(crate) const IS_LT_OFFSET_POS: usize = 9;

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BcConstant {
    pub opcode: u8,
    pub dst: BytecodeSlot,
    pub value: TValue,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BcNewClosure {
    pub opcode: u8,
    pub dst: BytecodeSlot,
    /// Ordinal into the prototype's child-prototype list.
    pub proto_index: u32,
}

#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct BcUpvalueClose {
    pub opcode: u8,
    /// Close every open upvalue at a local `>= start`.
    pub start: BytecodeSlot,
}

const _: () = assert!(size_of::<BcTableGetById>() == 13);
const _: () = assert!(size_of::<BcReturn>() == 8);
const _: () = assert!(size_of::<BcCall>() == 19);
const _: () = assert!(size_of::<BcIsLtVV>() == 13);
const _: () = assert!(size_of::<BcConstant>() == 13);
const _: () = assert!(size_of::<BcUpvalueClose>() == 5);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Op;

    #[test]
    fn unaligned_decode_roundtrip() {
        let rec = BcAddVV {
            opcode: Op::AddVV as u8,
            lhs: BytecodeSlot::local(0),
            rhs: BytecodeSlot::local(1),
            result: BytecodeSlot::local(2),
        };
        // force the record onto an odd offset
        let mut buf = vec![0xAAu8];
        buf.extend_from_slice(record_bytes(&rec));
        let back: BcAddVV = unsafe { decode(&buf, 1) };
        assert_eq!(back.opcode, Op::AddVV as u8);
        assert_eq!({ back.lhs }, BytecodeSlot::local(0));
        assert_eq!({ back.rhs }, BytecodeSlot::local(1));
        assert_eq!({ back.result }, BytecodeSlot::local(2));
    }

    #[test]
    fn is_lt_offset_position() {
        let rec = BcIsLtVV {
            opcode: Op::IsLtVV as u8,
            lhs: BytecodeSlot::local(0),
            rhs: BytecodeSlot::local(1),
            offset: -13,
        };
        let bytes = record_bytes(&rec);
        let patched = i32::from_le_bytes(
            bytes[IS_LT_OFFSET_POS..IS_LT_OFFSET_POS + 4]
                .try_into()
                .unwrap(),
        );
        assert_eq!(patched, -13);
    }
}

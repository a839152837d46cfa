use object::TValue;

use crate::instruction::*;
use crate::op::Op;
use crate::slot::BytecodeSlot;

/// A branch whose target is not yet known. Returned by the branch emitters,
/// resolved by [`BytecodeBuilder::bind`].
#[derive(Debug, Clone, Copy)]
#[must_use = "an unbound label leaves a zero branch offset in the stream"]
pub struct Label {
    /// Byte position of the i32 offset field to patch.
    offset_pos: usize,
    /// Instruction start the offset is relative to.
    base: usize,
}

/// Emits packed instruction records and resolves branch targets.
#[derive(Default)]
pub struct BytecodeBuilder {
    buf: Vec<u8>,
    num_call_sites: u32,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte offset the next instruction will start at.
    #[inline(always)]
    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    pub fn num_call_sites(&self) -> u32 {
        self.num_call_sites
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn emit<T: Copy>(&mut self, record: &T) {
        self.buf.extend_from_slice(record_bytes(record));
    }

    // ── table & global access ──────────────────────────────────────

    pub fn table_get_by_id(&mut self, base: BytecodeSlot, index: u32, dst: BytecodeSlot) {
        self.emit(&BcTableGetById {
            opcode: Op::TableGetById as u8,
            base,
            index,
            dst,
        });
    }

    pub fn table_put_by_id(&mut self, base: BytecodeSlot, index: u32, src: BytecodeSlot) {
        self.emit(&BcTablePutById {
            opcode: Op::TablePutById as u8,
            base,
            index,
            src,
        });
    }

    pub fn table_get_by_val(&mut self, base: BytecodeSlot, index: BytecodeSlot, dst: BytecodeSlot) {
        self.emit(&BcTableGetByVal {
            opcode: Op::TableGetByVal as u8,
            base,
            index,
            dst,
        });
    }

    pub fn table_put_by_val(&mut self, base: BytecodeSlot, index: BytecodeSlot, src: BytecodeSlot) {
        self.emit(&BcTablePutByVal {
            opcode: Op::TablePutByVal as u8,
            base,
            index,
            src,
        });
    }

    pub fn global_get(&mut self, index: u32, dst: BytecodeSlot) {
        self.emit(&BcGlobalGet {
            opcode: Op::GlobalGet as u8,
            index,
            dst,
        });
    }

    pub fn global_put(&mut self, index: u32, src: BytecodeSlot) {
        self.emit(&BcGlobalPut {
            opcode: Op::GlobalPut as u8,
            index,
            src,
        });
    }

    // ── calls & returns ────────────────────────────────────────────

    /// Emit a call. Returns the call-site ordinal that indexes the code
    /// block's inline-cache table.
    pub fn call(
        &mut self,
        func_slot: BytecodeSlot,
        num_fixed_params: u32,
        num_fixed_rets: u32,
        keep_variadic_ret: bool,
        pass_variadic_res: bool,
    ) -> u32 {
        let site = self.num_call_sites;
        self.num_call_sites += 1;
        self.emit(&BcCall::new(
            func_slot,
            num_fixed_params,
            num_fixed_rets,
            keep_variadic_ret,
            pass_variadic_res,
            site,
        ));
        site
    }

    pub fn ret(&mut self, slot_begin: BytecodeSlot, num_return_values: u16) {
        self.emit(&BcReturn::new(slot_begin, num_return_values, false));
    }

    pub fn ret_variadic(&mut self, slot_begin: BytecodeSlot, num_return_values: u16) {
        self.emit(&BcReturn::new(slot_begin, num_return_values, true));
    }

    // ── arithmetic & branches ──────────────────────────────────────

    pub fn add_vv(&mut self, lhs: BytecodeSlot, rhs: BytecodeSlot, result: BytecodeSlot) {
        self.emit(&BcAddVV {
            opcode: Op::AddVV as u8,
            lhs,
            rhs,
            result,
        });
    }

    pub fn sub_vv(&mut self, lhs: BytecodeSlot, rhs: BytecodeSlot, result: BytecodeSlot) {
        self.emit(&BcSubVV {
            opcode: Op::SubVV as u8,
            lhs,
            rhs,
            result,
        });
    }

    /// Emit a forward branch taken when `lhs < rhs`; patch the target later
    /// with [`bind`](Self::bind).
    pub fn is_lt_vv(&mut self, lhs: BytecodeSlot, rhs: BytecodeSlot) -> Label {
        let base = self.buf.len();
        self.emit(&BcIsLtVV {
            opcode: Op::IsLtVV as u8,
            lhs,
            rhs,
            offset: 0,
        });
        Label {
            offset_pos: base + IS_LT_OFFSET_POS,
            base,
        }
    }

    /// Emit a branch to an already-emitted target (backward edges).
    pub fn is_lt_vv_to(&mut self, lhs: BytecodeSlot, rhs: BytecodeSlot, target: usize) {
        let base = self.buf.len();
        self.emit(&BcIsLtVV {
            opcode: Op::IsLtVV as u8,
            lhs,
            rhs,
            offset: target as i32 - base as i32,
        });
    }

    /// Point `label` at the current offset.
    pub fn bind(&mut self, label: Label) {
        let offset = (self.buf.len() - label.base) as i32;
        self.buf[label.offset_pos..label.offset_pos + 4]
            .copy_from_slice(&offset.to_le_bytes());
    }

    // ── constants & closures ───────────────────────────────────────

    pub fn constant(&mut self, dst: BytecodeSlot, value: TValue) {
        self.emit(&BcConstant {
            opcode: Op::Constant as u8,
            dst,
            value,
        });
    }

    pub fn new_closure(&mut self, dst: BytecodeSlot, proto_index: u32) {
        self.emit(&BcNewClosure {
            opcode: Op::NewClosure as u8,
            dst,
            proto_index,
        });
    }

    pub fn upvalue_close(&mut self, start: BytecodeSlot) {
        self.emit(&BcUpvalueClose {
            opcode: Op::UpvalueClose as u8,
            start,
        });
    }
}

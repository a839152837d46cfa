use std::fmt::Write as _;
use std::rc::Rc;

use crate::executable::{CodeBlock, FunctionPrototype};
use crate::instruction::*;
use crate::op::Op;
use crate::slot::BytecodeSlot;

/// A set of local slots an instruction reads or writes: single ordinals
/// and contiguous ranges (argument and return windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSpan {
    One(u32),
    Range { start: u32, len: u32 },
}

/// Per-instruction data-flow read or write set over frame locals.
/// Constant operands never appear here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataFlowInfo {
    pub spans: Vec<SlotSpan>,
}

impl DataFlowInfo {
    fn push_slot(&mut self, slot: BytecodeSlot) {
        if slot.is_local() {
            self.spans.push(SlotSpan::One(slot.local_ord() as u32));
        }
    }

    fn push_range(&mut self, start: BytecodeSlot, len: u32) {
        if len > 0 {
            debug_assert!(start.is_local());
            self.spans.push(SlotSpan::Range {
                start: start.local_ord() as u32,
                len,
            });
        }
    }

    pub fn for_each_local(&self, mut f: impl FnMut(u32)) {
        for span in &self.spans {
            match *span {
                SlotSpan::One(ord) => f(ord),
                SlotSpan::Range { start, len } => {
                    for ord in start..start + len {
                        f(ord);
                    }
                }
            }
        }
    }
}

/// Walks an instruction stream: opcode and record access, instruction
/// boundaries, and the data-flow sets the liveness analysis consumes.
pub struct BytecodeDecoder<'a> {
    bytecode: &'a [u8],
    child_protos: &'a [Rc<FunctionPrototype>],
}

impl<'a> BytecodeDecoder<'a> {
    pub fn for_prototype(prototype: &'a FunctionPrototype) -> Self {
        Self {
            bytecode: &prototype.bytecode,
            child_protos: &prototype.child_protos,
        }
    }

    pub fn for_code_block(code_block: &'a CodeBlock) -> Self {
        Self {
            bytecode: &code_block.bytecode,
            child_protos: &code_block.prototype.child_protos,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.bytecode.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.bytecode.is_empty()
    }

    /// The opcode at `offset`. `offset` must be an instruction boundary.
    #[inline(always)]
    pub fn op_at(&self, offset: usize) -> Op {
        let byte = self.bytecode[offset];
        assert!(
            (byte as usize) < Op::COUNT,
            "invalid opcode 0x{byte:02x} at offset {offset}"
        );
        // SAFETY: just range-checked.
        unsafe { Op::from_u8_unchecked(byte) }
    }

    /// Byte offset of the instruction following the one at `offset`.
    pub fn next_position(&self, offset: usize) -> usize {
        offset
            + match self.op_at(offset) {
                Op::TableGetById => size_of::<BcTableGetById>(),
                Op::TablePutById => size_of::<BcTablePutById>(),
                Op::TableGetByVal => size_of::<BcTableGetByVal>(),
                Op::TablePutByVal => size_of::<BcTablePutByVal>(),
                Op::GlobalGet => size_of::<BcGlobalGet>(),
                Op::GlobalPut => size_of::<BcGlobalPut>(),
                Op::Return => size_of::<BcReturn>(),
                Op::Call => size_of::<BcCall>(),
                Op::AddVV => size_of::<BcAddVV>(),
                Op::SubVV => size_of::<BcSubVV>(),
                Op::IsLtVV => size_of::<BcIsLtVV>(),
                Op::Constant => size_of::<BcConstant>(),
                Op::NewClosure => size_of::<BcNewClosure>(),
                Op::UpvalueClose => size_of::<BcUpvalueClose>(),
            }
    }

    /// Byte offsets of every instruction, in stream order.
    pub fn instruction_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::new();
        let mut pos = 0;
        while pos < self.bytecode.len() {
            offsets.push(pos);
            pos = self.next_position(pos);
        }
        debug_assert_eq!(pos, self.bytecode.len());
        offsets
    }

    // ── typed record access ────────────────────────────────────────

    pub fn as_new_closure(&self, offset: usize) -> Option<BcNewClosure> {
        if self.op_at(offset) == Op::NewClosure {
            // SAFETY: opcode says a BcNewClosure record starts here.
            Some(unsafe { decode(self.bytecode, offset) })
        } else {
            None
        }
    }

    pub fn as_upvalue_close(&self, offset: usize) -> Option<BcUpvalueClose> {
        if self.op_at(offset) == Op::UpvalueClose {
            // SAFETY: opcode says a BcUpvalueClose record starts here.
            Some(unsafe { decode(self.bytecode, offset) })
        } else {
            None
        }
    }

    pub fn child_proto(&self, ord: u32) -> &Rc<FunctionPrototype> {
        &self.child_protos[ord as usize]
    }

    // ── data-flow sets ─────────────────────────────────────────────

    /// Locals the instruction at `offset` reads.
    ///
    /// `NewClosure` reports no reads here; its captures depend on the
    /// destination slot and are handled by the liveness analysis.
    pub fn read_info(&self, offset: usize) -> DataFlowInfo {
        let mut info = DataFlowInfo::default();
        match self.op_at(offset) {
            Op::TableGetById => {
                let bc: BcTableGetById = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.base);
            }
            Op::TablePutById => {
                let bc: BcTablePutById = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.base);
                info.push_slot(bc.src);
            }
            Op::TableGetByVal => {
                let bc: BcTableGetByVal = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.base);
                info.push_slot(bc.index);
            }
            Op::TablePutByVal => {
                let bc: BcTablePutByVal = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.base);
                info.push_slot(bc.index);
                info.push_slot(bc.src);
            }
            Op::GlobalGet => {}
            Op::GlobalPut => {
                let bc: BcGlobalPut = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.src);
            }
            Op::Return => {
                let bc: BcReturn = unsafe { decode(self.bytecode, offset) };
                info.push_range(bc.slot_begin, bc.num_return_values as u32);
            }
            Op::Call => {
                let bc: BcCall = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.func_slot);
                let func = bc.func_slot;
                if bc.num_fixed_params > 0 {
                    info.push_range(
                        BytecodeSlot::local(func.local_ord() as u32 + 1),
                        bc.num_fixed_params,
                    );
                }
            }
            Op::AddVV => {
                let bc: BcAddVV = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.lhs);
                info.push_slot(bc.rhs);
            }
            Op::SubVV => {
                let bc: BcSubVV = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.lhs);
                info.push_slot(bc.rhs);
            }
            Op::IsLtVV => {
                let bc: BcIsLtVV = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.lhs);
                info.push_slot(bc.rhs);
            }
            Op::Constant | Op::NewClosure | Op::UpvalueClose => {}
        }
        info
    }

    /// Locals the instruction at `offset` writes.
    pub fn write_info(&self, offset: usize) -> DataFlowInfo {
        let mut info = DataFlowInfo::default();
        match self.op_at(offset) {
            Op::TableGetById => {
                let bc: BcTableGetById = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.dst);
            }
            Op::TableGetByVal => {
                let bc: BcTableGetByVal = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.dst);
            }
            Op::GlobalGet => {
                let bc: BcGlobalGet = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.dst);
            }
            Op::Call => {
                let bc: BcCall = unsafe { decode(self.bytecode, offset) };
                // a call keeping variadic results stores nothing to locals
                if !bc.keep_variadic_ret() && bc.num_fixed_rets > 0 {
                    info.push_range(bc.func_slot, bc.num_fixed_rets);
                }
            }
            Op::AddVV => {
                let bc: BcAddVV = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.result);
            }
            Op::SubVV => {
                let bc: BcSubVV = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.result);
            }
            Op::Constant => {
                let bc: BcConstant = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.dst);
            }
            Op::NewClosure => {
                let bc: BcNewClosure = unsafe { decode(self.bytecode, offset) };
                info.push_slot(bc.dst);
            }
            Op::TablePutById
            | Op::TablePutByVal
            | Op::GlobalPut
            | Op::Return
            | Op::IsLtVV
            | Op::UpvalueClose => {}
        }
        info
    }

    // ── disassembly ────────────────────────────────────────────────

    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for offset in self.instruction_offsets() {
            let _ = write!(out, "{offset:5}  ");
            match self.op_at(offset) {
                Op::TableGetById => {
                    let bc: BcTableGetById = unsafe { decode(self.bytecode, offset) };
                    let _ = writeln!(
                        out,
                        "TableGetById   {:?} = {:?}[k{}]",
                        { bc.dst },
                        { bc.base },
                        { bc.index }
                    );
                }
                Op::TablePutById => {
                    let bc: BcTablePutById = unsafe { decode(self.bytecode, offset) };
                    let _ = writeln!(
                        out,
                        "TablePutById   {:?}[k{}] = {:?}",
                        { bc.base },
                        { bc.index },
                        { bc.src }
                    );
                }
                Op::TableGetByVal => {
                    let bc: BcTableGetByVal = unsafe { decode(self.bytecode, offset) };
                    let _ = writeln!(
                        out,
                        "TableGetByVal  {:?} = {:?}[{:?}]",
                        { bc.dst },
                        { bc.base },
                        { bc.index }
                    );
                }
                Op::TablePutByVal => {
                    let bc: BcTablePutByVal = unsafe { decode(self.bytecode, offset) };
                    let _ = writeln!(
                        out,
                        "TablePutByVal  {:?}[{:?}] = {:?}",
                        { bc.base },
                        { bc.index },
                        { bc.src }
                    );
                }
                Op::GlobalGet => {
                    let bc: BcGlobalGet = unsafe { decode(self.bytecode, offset) };
                    let _ = writeln!(out, "GlobalGet      {:?} = [k{}]", { bc.dst }, { bc.index });
                }
                Op::GlobalPut => {
                    let bc: BcGlobalPut = unsafe { decode(self.bytecode, offset) };
                    let _ = writeln!(out, "GlobalPut      [k{}] = {:?}", { bc.index }, { bc.src });
                }
                Op::Return => {
                    let bc: BcReturn = unsafe { decode(self.bytecode, offset) };
                    let _ = writeln!(
                        out,
                        "Return         from {:?} x{}{}",
                        { bc.slot_begin },
                        { bc.num_return_values },
                        if bc.is_variadic() { " +variadic" } else { "" }
                    );
                }
                Op::Call => {
                    let bc: BcCall = unsafe { decode(self.bytecode, offset) };
                    let _ = writeln!(
                        out,
                        "Call           {:?} args={} rets={} site={}",
                        { bc.func_slot },
                        { bc.num_fixed_params },
                        { bc.num_fixed_rets },
                        { bc.ic_site }
                    );
                }
                Op::AddVV => {
                    let bc: BcAddVV = unsafe { decode(self.bytecode, offset) };
                    let _ = writeln!(
                        out,
                        "AddVV          {:?} = {:?} + {:?}",
                        { bc.result },
                        { bc.lhs },
                        { bc.rhs }
                    );
                }
                Op::SubVV => {
                    let bc: BcSubVV = unsafe { decode(self.bytecode, offset) };
                    let _ = writeln!(
                        out,
                        "SubVV          {:?} = {:?} - {:?}",
                        { bc.result },
                        { bc.lhs },
                        { bc.rhs }
                    );
                }
                Op::IsLtVV => {
                    let bc: BcIsLtVV = unsafe { decode(self.bytecode, offset) };
                    let _ = writeln!(
                        out,
                        "IsLtVV         {:?} < {:?} -> {}",
                        { bc.lhs },
                        { bc.rhs },
                        offset as i64 + { bc.offset } as i64
                    );
                }
                Op::Constant => {
                    let bc: BcConstant = unsafe { decode(self.bytecode, offset) };
                    let _ = writeln!(out, "Constant       {:?} = {:?}", { bc.dst }, { bc.value });
                }
                Op::NewClosure => {
                    let bc: BcNewClosure = unsafe { decode(self.bytecode, offset) };
                    let _ = writeln!(
                        out,
                        "NewClosure     {:?} = proto {}",
                        { bc.dst },
                        { bc.proto_index }
                    );
                }
                Op::UpvalueClose => {
                    let bc: BcUpvalueClose = unsafe { decode(self.bytecode, offset) };
                    let _ = writeln!(out, "UpvalueClose   >= {:?}", { bc.start });
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BytecodeBuilder;
    use object::TValue;

    fn proto_of(builder: BytecodeBuilder, num_locals: u32) -> FunctionPrototype {
        let num_call_sites = builder.num_call_sites();
        let mut proto = FunctionPrototype::new(builder.finish(), vec![], num_locals, 0);
        proto.num_call_sites = num_call_sites;
        proto
    }

    #[test]
    fn offsets_cover_the_stream() {
        let mut b = BytecodeBuilder::new();
        b.constant(BytecodeSlot::local(0), TValue::from_f64(5.0));
        b.global_get(0, BytecodeSlot::local(1));
        b.add_vv(
            BytecodeSlot::local(0),
            BytecodeSlot::local(1),
            BytecodeSlot::local(2),
        );
        b.ret(BytecodeSlot::local(2), 1);
        let proto = proto_of(b, 3);
        let dec = BytecodeDecoder::for_prototype(&proto);

        let offsets = dec.instruction_offsets();
        assert_eq!(offsets.len(), 4);
        assert_eq!(offsets[0], 0);
        for pair in offsets.windows(2) {
            assert_eq!(dec.next_position(pair[0]), pair[1]);
        }
        assert_eq!(dec.next_position(offsets[3]), dec.len());
    }

    #[test]
    fn arithmetic_read_write_sets() {
        let mut b = BytecodeBuilder::new();
        b.add_vv(
            BytecodeSlot::local(3),
            BytecodeSlot::constant(0),
            BytecodeSlot::local(5),
        );
        let proto = proto_of(b, 6);
        let dec = BytecodeDecoder::for_prototype(&proto);

        let mut reads = Vec::new();
        dec.read_info(0).for_each_local(|ord| reads.push(ord));
        assert_eq!(reads, vec![3]); // constant operand not reported

        let mut writes = Vec::new();
        dec.write_info(0).for_each_local(|ord| writes.push(ord));
        assert_eq!(writes, vec![5]);
    }

    #[test]
    fn call_reports_argument_and_return_windows() {
        let mut b = BytecodeBuilder::new();
        b.call(BytecodeSlot::local(4), 2, 3, false, false);
        let proto = proto_of(b, 8);
        let dec = BytecodeDecoder::for_prototype(&proto);

        let reads = dec.read_info(0);
        assert_eq!(
            reads.spans,
            vec![SlotSpan::One(4), SlotSpan::Range { start: 5, len: 2 }]
        );
        let writes = dec.write_info(0);
        assert_eq!(writes.spans, vec![SlotSpan::Range { start: 4, len: 3 }]);
    }

    #[test]
    fn variadic_keeping_call_writes_no_locals() {
        let mut b = BytecodeBuilder::new();
        b.call(BytecodeSlot::local(0), 1, 0, true, false);
        let proto = proto_of(b, 4);
        let dec = BytecodeDecoder::for_prototype(&proto);
        assert!(dec.write_info(0).spans.is_empty());
    }

    #[test]
    fn return_reads_its_window() {
        let mut b = BytecodeBuilder::new();
        b.ret(BytecodeSlot::local(2), 2);
        let proto = proto_of(b, 4);
        let dec = BytecodeDecoder::for_prototype(&proto);
        assert_eq!(
            dec.read_info(0).spans,
            vec![SlotSpan::Range { start: 2, len: 2 }]
        );
    }
}

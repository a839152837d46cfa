use crate::bitvec::BitVector;

/// One basic block as reported by the control-flow / upvalue analysis.
///
/// That analysis runs outside this crate; liveness consumes its result
/// read-only. Blocks are referenced by their index in
/// [`ControlFlowInfo::blocks`].
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Ordinal (in the whole stream) of the block's first instruction.
    pub bytecode_index: usize,
    /// Byte offset of the block's first instruction.
    pub bytecode_offset: usize,
    /// Byte offset of the block's terminal instruction.
    pub terminal_offset: usize,
    pub num_bytecodes: usize,
    pub successors: Vec<usize>,
    /// Locals captured by a closure before entry to this block.
    pub captured_at_head: BitVector,
    /// Locals captured by a closure created within this block.
    pub captured_in_block: BitVector,
}

/// The full control-flow picture of one function's bytecode.
#[derive(Debug, Clone, Default)]
pub struct ControlFlowInfo {
    pub blocks: Vec<BasicBlock>,
}

impl ControlFlowInfo {
    /// Convenience constructor for blocks with no captured locals.
    ///
    /// `spans` lists `(bytecode_index, bytecode_offset, terminal_offset,
    /// num_bytecodes)` per block; `edges` the successor indices.
    pub fn from_spans(
        num_locals: usize,
        spans: &[(usize, usize, usize, usize)],
        edges: &[Vec<usize>],
    ) -> Self {
        assert_eq!(spans.len(), edges.len());
        let blocks = spans
            .iter()
            .zip(edges.iter())
            .map(
                |(&(bytecode_index, bytecode_offset, terminal_offset, num_bytecodes), succ)| {
                    BasicBlock {
                        bytecode_index,
                        bytecode_offset,
                        terminal_offset,
                        num_bytecodes,
                        successors: succ.clone(),
                        captured_at_head: BitVector::new(num_locals),
                        captured_in_block: BitVector::new(num_locals),
                    }
                },
            )
            .collect();
        Self { blocks }
    }
}

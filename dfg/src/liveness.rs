use bytecode::decoder::BytecodeDecoder;

use crate::bitvec::{update_after_monotonic_propagation, BitVector};
use crate::cfg::{BasicBlock, ControlFlowInfo};

/// Liveness of every frame local at every instruction, indexed by the
/// instruction's ordinal in the stream.
///
/// `before_use(i)` holds right before instruction `i` consumes its inputs;
/// `after_use(i)` right after the inputs are consumed but before the
/// outputs are written. The result is an over-approximation: a bit may be
/// live for a value never actually read, but never the other way around.
pub struct BytecodeLiveness {
    before_use: Vec<BitVector>,
    after_use: Vec<BitVector>,
}

impl BytecodeLiveness {
    #[inline(always)]
    pub fn before_use(&self, bytecode_index: usize) -> &BitVector {
        &self.before_use[bytecode_index]
    }

    #[inline(always)]
    pub fn after_use(&self, bytecode_index: usize) -> &BitVector {
        &self.after_use[bytecode_index]
    }

    pub fn num_bytecodes(&self) -> usize {
        self.before_use.len()
    }

    /// Run the analysis over one function's bytecode.
    ///
    /// `control_flow` comes from the external control-flow / upvalue pass
    /// and must describe the same instruction stream the decoder walks.
    pub fn compute(
        decoder: &BytecodeDecoder,
        num_locals: usize,
        control_flow: &ControlFlowInfo,
    ) -> BytecodeLiveness {
        let num_bytecodes = decoder.instruction_offsets().len();
        let mut blocks = build_block_infos(decoder, control_flow, num_locals);
        let sweeps = solve(&mut blocks, num_locals);
        log::debug!(
            "bytecode liveness converged after {sweeps} sweep(s) over {} block(s)",
            blocks.len()
        );

        if cfg!(debug_assertions) {
            verify_fixpoint(&blocks, num_locals);
        }

        let mut result = BytecodeLiveness {
            before_use: (0..num_bytecodes).map(|_| BitVector::new(0)).collect(),
            after_use: (0..num_bytecodes).map(|_| BitVector::new(0)).collect(),
        };
        for block in &blocks {
            block.compute_per_bytecode_liveness(&mut result);
        }

        // Trivially unreachable bytecodes (e.g. code after a dead loop)
        // belong to no block; give them all-dead records so offset-indexed
        // lookups never see an unsized vector.
        for index in 0..num_bytecodes {
            if result.before_use[index].is_empty() {
                debug_assert!(result.after_use[index].is_empty());
                result.before_use[index] = BitVector::new(num_locals);
                result.after_use[index] = BitVector::new(num_locals);
            }
            debug_assert_eq!(result.before_use[index].len(), num_locals);
            debug_assert_eq!(result.after_use[index].len(), num_locals);
        }

        result
    }
}

/// Per-block solver state: the block's def/use stream in reverse
/// instruction order, its head/tail sets, and the replay masks.
struct BlockInfo {
    num_bytecodes: usize,
    first_bytecode_index: usize,
    /// The defs of the k-th instruction (in reverse order) are
    /// `info[info_index[2k-1]..info_index[2k]]` (with `info_index[-1]`
    /// read as 0); its uses are `info[info_index[2k]..info_index[2k+1]]`.
    info: Vec<u32>,
    info_index: Vec<u32>,
    at_head: BitVector,
    at_tail: BitVector,
    /// Once the tail is updated, the new head is
    /// `(tail & and_mask) | or_mask`.
    and_mask: BitVector,
    or_mask: BitVector,
    /// Positions in the solver's block array (which is sorted, not in
    /// original block order).
    successors: Vec<usize>,
    last_changed_epoch: u64,
    last_checked_epoch: u64,
    has_predecessor: bool,
}

impl BlockInfo {
    fn new(decoder: &BytecodeDecoder, block: &BasicBlock, num_locals: usize) -> Self {
        assert!(block.num_bytecodes > 0);

        // Offsets of the block's instructions, in reverse order.
        let mut offsets = vec![0u32; block.num_bytecodes];
        {
            let mut cur = block.bytecode_offset;
            for step in 0..block.num_bytecodes {
                debug_assert_eq!(
                    step == block.num_bytecodes - 1,
                    cur == block.terminal_offset
                );
                offsets[block.num_bytecodes - 1 - step] = cur as u32;
                cur = decoder.next_position(cur);
            }
        }

        let mut info: Vec<u32> = Vec::new();
        let mut info_index = vec![0u32; block.num_bytecodes * 2];
        for (index, &offset) in offsets.iter().enumerate() {
            let offset = offset as usize;

            decoder.write_info(offset).for_each_local(|ord| {
                info.push(ord);
            });
            info_index[index * 2] = info.len() as u32;

            decoder.read_info(offset).for_each_local(|ord| {
                info.push(ord);
            });

            // A closure creation uses every parent local it captures,
            // except a capture of its own destination slot: that local is
            // overwritten by the output before it could ever be read, so a
            // self-reference is never a use.
            if let Some(bc) = decoder.as_new_closure(offset) {
                let dest_local = { bc.dst }.local_ord() as u32;
                let proto = decoder.child_proto(bc.proto_index);
                for uv in &proto.upvalues {
                    if uv.is_parent_local && uv.slot != dest_local {
                        info.push(uv.slot);
                    }
                }
            }

            // An upvalue close uses every captured local it closes.
            if let Some(bc) = decoder.as_upvalue_close(offset) {
                debug_assert_eq!(offset, block.terminal_offset);
                let start = { bc.start }.local_ord();
                debug_assert!(start <= num_locals);
                for ord in start..num_locals {
                    if block.captured_at_head.test(ord) || block.captured_in_block.test(ord) {
                        info.push(ord as u32);
                    }
                }
            }

            info_index[index * 2 + 1] = info.len() as u32;
        }

        debug_assert!(info.iter().all(|&ord| (ord as usize) < num_locals));

        let mut this = Self {
            num_bytecodes: block.num_bytecodes,
            first_bytecode_index: block.bytecode_index,
            info,
            info_index,
            at_head: BitVector::new(num_locals),
            at_tail: BitVector::new(num_locals),
            and_mask: BitVector::new(num_locals),
            or_mask: BitVector::new(num_locals),
            successors: Vec::new(),
            last_changed_epoch: 0,
            last_checked_epoch: 0,
            has_predecessor: false,
        };

        // Derive the masks by replaying the block against the two extreme
        // tails. The or-mask comes second so the tail ends all-zero.
        let mut mask = BitVector::new(num_locals);
        this.at_tail.set_all();
        this.compute_head_based_on_tail(&mut mask);
        this.and_mask.copy_from(&mask);

        this.at_tail.clear_all();
        this.compute_head_based_on_tail(&mut mask);
        this.or_mask.copy_from(&mask);

        debug_assert!(
            (0..num_locals).all(|bit| !this.or_mask.test(bit) || this.and_mask.test(bit))
        );

        this
    }

    /// Replay the block backwards from the current tail: clear each
    /// instruction's defs, then set its uses. The head itself is untouched.
    fn compute_head_based_on_tail(&self, out: &mut BitVector) {
        out.copy_from(&self.at_tail);

        let mut cur = 0usize;
        for index in 0..self.num_bytecodes {
            let def_end = self.info_index[index * 2] as usize;
            while cur < def_end {
                out.clear(self.info[cur] as usize);
                cur += 1;
            }
            let use_end = self.info_index[index * 2 + 1] as usize;
            while cur < use_end {
                out.set(self.info[cur] as usize);
                cur += 1;
            }
        }
        debug_assert_eq!(cur, self.info.len());
    }

    /// The word-level equivalent of the replay.
    fn compute_head_based_on_tail_fast(&self, out: &mut BitVector) {
        debug_assert_eq!(out.len(), self.at_tail.len());
        for ((dst, &tail), (&and, &or)) in out
            .words_mut()
            .iter_mut()
            .zip(self.at_tail.words())
            .zip(self.and_mask.words().iter().zip(self.or_mask.words()))
        {
            *dst = (tail & and) | or;
        }
    }

    /// Materialize per-instruction liveness by one backward in-block
    /// replay from the converged tail.
    fn compute_per_bytecode_liveness(&self, r: &mut BytecodeLiveness) {
        debug_assert_eq!(r.before_use.len(), r.after_use.len());
        let num_locals = self.at_head.len();
        let last_bytecode_index = self.first_bytecode_index + self.num_bytecodes - 1;
        debug_assert!(last_bytecode_index < r.before_use.len());

        for index in self.first_bytecode_index..=last_bytecode_index {
            debug_assert!(r.before_use[index].is_empty());
            debug_assert!(r.after_use[index].is_empty());
            r.before_use[index] = BitVector::new(num_locals);
            r.after_use[index] = BitVector::new(num_locals);
        }

        let mut cur = 0usize;
        let mut bytecode_index = last_bytecode_index;
        for index in 0..self.num_bytecodes {
            // after-use is the next instruction's before-use (the block
            // tail for the terminal) minus this instruction's defs
            if index > 0 {
                let src = &r.before_use[bytecode_index + 1];
                r.after_use[bytecode_index].copy_from(src);
            } else {
                r.after_use[bytecode_index].copy_from(&self.at_tail);
            }

            {
                let after_use = &mut r.after_use[bytecode_index];
                let def_end = self.info_index[index * 2] as usize;
                while cur < def_end {
                    after_use.clear(self.info[cur] as usize);
                    cur += 1;
                }
            }

            // before-use adds this instruction's uses on top
            {
                let src = &r.after_use[bytecode_index];
                r.before_use[bytecode_index].copy_from(src);
                let before_use = &mut r.before_use[bytecode_index];
                let use_end = self.info_index[index * 2 + 1] as usize;
                while cur < use_end {
                    before_use.set(self.info[cur] as usize);
                    cur += 1;
                }
            }

            bytecode_index = bytecode_index.wrapping_sub(1);
        }
        debug_assert_eq!(cur, self.info.len());
        debug_assert_eq!(bytecode_index.wrapping_add(1), self.first_bytecode_index);
    }
}

/// Build the solver blocks, sorted by descending first bytecode index.
/// The order does not affect correctness, only how fast the backward
/// propagation converges.
fn build_block_infos(
    decoder: &BytecodeDecoder,
    control_flow: &ControlFlowInfo,
    num_locals: usize,
) -> Vec<BlockInfo> {
    let num_blocks = control_flow.blocks.len();

    let mut order: Vec<usize> = (0..num_blocks).collect();
    order.sort_by(|&a, &b| {
        control_flow.blocks[b]
            .bytecode_index
            .cmp(&control_flow.blocks[a].bytecode_index)
    });
    debug_assert!(order.windows(2).all(|pair| {
        control_flow.blocks[pair[0]].bytecode_index > control_flow.blocks[pair[1]].bytecode_index
    }));

    // original block index -> position in the sorted array
    let mut sorted_pos = vec![0usize; num_blocks];
    for (pos, &orig) in order.iter().enumerate() {
        sorted_pos[orig] = pos;
    }

    let mut blocks: Vec<BlockInfo> = order
        .iter()
        .map(|&orig| BlockInfo::new(decoder, &control_flow.blocks[orig], num_locals))
        .collect();

    for (pos, &orig) in order.iter().enumerate() {
        let successors: Vec<usize> = control_flow.blocks[orig]
            .successors
            .iter()
            .map(|&succ| sorted_pos[succ])
            .collect();
        for &succ in &successors {
            blocks[succ].has_predecessor = true;
        }
        blocks[pos].successors = successors;
    }

    blocks
}

/// Propagate head/tail states to fixpoint. Returns the number of sweeps.
fn solve(blocks: &mut [BlockInfo], num_locals: usize) -> usize {
    let mut tmp = BitVector::new(num_locals);
    let mut current_epoch: u64 = 1;
    let mut is_first_iteration = true;
    let mut sweeps = 0usize;

    loop {
        sweeps += 1;
        let mut need_more_iterations = false;

        for ord in 0..blocks.len() {
            // The tail can only change if a successor's head changed since
            // we last looked (or this is the first sweep).
            let should_check = blocks[ord]
                .successors
                .iter()
                .any(|&succ| blocks[succ].last_changed_epoch > blocks[ord].last_checked_epoch);
            if !(should_check || is_first_iteration) {
                continue;
            }

            current_epoch += 1;
            blocks[ord].last_checked_epoch = current_epoch;

            // New tail: union of all successor heads.
            tmp.clear_all();
            for pos in 0..blocks[ord].successors.len() {
                let succ = blocks[ord].successors[pos];
                tmp.or_from(&blocks[succ].at_head);
            }

            let tail_changed = update_after_monotonic_propagation(&mut blocks[ord].at_tail, &tmp);

            if tail_changed || is_first_iteration {
                blocks[ord].compute_head_based_on_tail_fast(&mut tmp);
                let head_changed =
                    update_after_monotonic_propagation(&mut blocks[ord].at_head, &tmp);

                if cfg!(debug_assertions) {
                    // the mask shortcut must agree with the slow replay
                    blocks[ord].compute_head_based_on_tail(&mut tmp);
                    debug_assert_eq!(tmp, blocks[ord].at_head);
                }

                // A changed tail with an unchanged head affects nobody:
                // predecessors only ever read our head.
                if head_changed {
                    current_epoch += 1;
                    blocks[ord].last_changed_epoch = current_epoch;
                    if blocks[ord].has_predecessor {
                        need_more_iterations = true;
                    }
                }
            }
        }

        if !need_more_iterations {
            return sweeps;
        }
        is_first_iteration = false;
    }
}

/// Debug-build check that the converged state really is a fixpoint: every
/// tail equals the union of its successor heads, and every head equals the
/// slow replay of its tail.
fn verify_fixpoint(blocks: &[BlockInfo], num_locals: usize) {
    let mut tmp = BitVector::new(num_locals);
    for block in blocks {
        tmp.clear_all();
        for &succ in &block.successors {
            tmp.or_from(&blocks[succ].at_head);
        }
        assert_eq!(tmp, block.at_tail);

        block.compute_head_based_on_tail(&mut tmp);
        assert_eq!(tmp, block.at_head);
    }
}

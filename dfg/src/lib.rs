//! Bytecode data-flow analyses for the optimizing tiers: bit vectors, the
//! control-flow input types, and the backward liveness fixpoint.

pub mod bitvec;
pub mod cfg;
pub mod liveness;

pub use bitvec::{update_after_monotonic_propagation, BitVector};
pub use cfg::{BasicBlock, ControlFlowInfo};
pub use liveness::BytecodeLiveness;

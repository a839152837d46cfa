//! The execution engine: the stack frame ABI, the dispatch trampoline,
//! per-opcode handlers, and call-site inline caches.

pub mod coroutine;
pub mod dispatch;
pub mod frame;
mod handlers;
pub mod ic;

pub use coroutine::{Coroutine, VARIADIC_RETS_INVALID};
pub use dispatch::{run, OpHandler, Step};
pub use frame::{
    StackFrameHeader, FRAME_HEADER_SLOTS, MIN_NIL_FILL_RETURN_VALUES,
};
pub use ic::{
    ic_stats, plan_call_site, reset_ic_stats, CallSiteDesc, IcStats, TerminatorDesc, TypeMask,
};

/// Errors the embedding surface reports. Errors raised by guest code
/// itself (wrong operand types, calling non-functions) are fatal in this
/// tier instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    /// The root callee is not a function object.
    NotCallable,
    /// The requested frame does not fit in the coroutine's value stack.
    StackExhausted,
}

impl core::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RuntimeError::NotCallable => write!(f, "called value is not a function"),
            RuntimeError::StackExhausted => write!(f, "value stack exhausted"),
        }
    }
}

impl std::error::Error for RuntimeError {}

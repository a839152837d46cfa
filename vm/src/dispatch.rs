use bytecode::Op;

use crate::coroutine::Coroutine;
use crate::handlers;

/// What a handler tells the trampoline to do next.
pub enum Step {
    /// Continue at `instr` within the frame based at `frame`.
    Dispatch { frame: usize, instr: *const u8 },
    /// The root frame has returned.
    Finished,
}

/// Every opcode handler has this shape: it receives the coroutine, the
/// current frame base, and a pointer to its own (opcode-prefixed)
/// instruction record.
pub type OpHandler = fn(&mut Coroutine, usize, *const u8) -> Step;

/// Indexed by opcode byte; must stay in [`Op`] declaration order.
static DISPATCH_TABLE: [OpHandler; Op::COUNT] = [
    handlers::table_get_by_id,
    handlers::table_put_by_id,
    handlers::table_get_by_val,
    handlers::table_put_by_val,
    handlers::global_get,
    handlers::global_put,
    handlers::ret,
    handlers::call,
    handlers::add_vv,
    handlers::sub_vv,
    handlers::is_lt_vv,
    handlers::constant,
    handlers::new_closure,
    handlers::upvalue_close,
];

/// The trampoline: each handler returns instead of jumping, and this loop
/// re-dispatches on the next opcode byte. Handlers never call each other
/// through the bytecode, so interpreter stack depth stays constant no
/// matter how deep the guest call stack grows.
pub fn run(cr: &mut Coroutine, frame: usize, instr: *const u8) {
    let mut frame = frame;
    let mut instr = instr;
    loop {
        // SAFETY: `instr` always points at an opcode byte inside a live
        // code block's bytecode stream.
        let opcode = unsafe { *instr };
        debug_assert!((opcode as usize) < Op::COUNT);
        let handler = DISPATCH_TABLE[opcode as usize];
        match handler(cr, frame, instr) {
            Step::Dispatch {
                frame: next_frame,
                instr: next_instr,
            } => {
                frame = next_frame;
                instr = next_instr;
            }
            Step::Finished => return,
        }
    }
}

use bytecode::{ExecutableCode, FunctionObject};
use object::{object_type_of, Heap, ObjectType, TValue, TableObject};

use crate::dispatch::{run, Step};
use crate::frame::{StackFrameHeader, FRAME_HEADER_SLOTS, MIN_NIL_FILL_RETURN_VALUES};
use crate::RuntimeError;

/// Sentinel for [`Coroutine::num_variadic_rets`] when no call has published
/// a variadic result window.
pub const VARIADIC_RETS_INVALID: u32 = u32::MAX;

/// One thread of interpretation: a value arena plus the per-coroutine
/// state the call protocol communicates through.
pub struct Coroutine {
    pub stack: Box<[TValue]>,
    pub global_object: *mut TableObject,
    /// Number of values in the published variadic result window, or
    /// [`VARIADIC_RETS_INVALID`] between publications.
    pub num_variadic_rets: u32,
    /// Absolute stack index of the first published variadic result.
    pub variadic_ret_slot_begin: u32,
    pub heap: Heap,
    /// Absolute stack index of the most recent root-level return window.
    pub last_ret_start: usize,
    pub(crate) final_rets: Vec<TValue>,
}

impl Coroutine {
    pub fn new(heap: Heap, global_object: *mut TableObject, stack_slots: usize) -> Self {
        assert!(stack_slots >= FRAME_HEADER_SLOTS + MIN_NIL_FILL_RETURN_VALUES);
        Self {
            stack: vec![TValue::nil(); stack_slots].into_boxed_slice(),
            global_object,
            num_variadic_rets: VARIADIC_RETS_INVALID,
            variadic_ret_slot_begin: 0,
            heap,
            last_ret_start: 0,
            final_rets: Vec::new(),
        }
    }

    /// Runs `func` to completion on a fresh root frame and returns its
    /// results. Extra arguments beyond the callee's fixed count become
    /// varargs when accepted and are dropped otherwise; missing ones are
    /// nil-filled.
    pub fn call_root(&mut self, func: TValue, args: &[TValue]) -> Result<Vec<TValue>, RuntimeError> {
        if !func.is_pointer() {
            return Err(RuntimeError::NotCallable);
        }
        // SAFETY: pointer values always reference a live heap cell.
        if unsafe { object_type_of(func) } != ObjectType::Function {
            return Err(RuntimeError::NotCallable);
        }
        // SAFETY: checked to be a function object above.
        let func_obj = unsafe { &*func.as_ptr::<FunctionObject>() };
        let code_block = match &func_obj.executable {
            ExecutableCode::Function(cb) => cb.clone(),
            ExecutableCode::Native(native) => return Ok(native(args)),
        };
        let proto = &code_block.prototype;
        let expected = proto.num_fixed_args as usize;

        let mut num_varargs = 0usize;
        if proto.accepts_variadic_args && args.len() > expected {
            num_varargs = args.len() - expected;
        }
        let frame_base = num_varargs + FRAME_HEADER_SLOTS;
        // a short return from the last local nil-fills past the frame top,
        // so the reservation carries that headroom
        let frame_reach = code_block.num_locals as usize + (MIN_NIL_FILL_RETURN_VALUES - 1);
        if frame_base + frame_reach > self.stack.len() {
            return Err(RuntimeError::StackExhausted);
        }

        let num_fixed = args.len().min(expected);
        self.stack[frame_base..frame_base + num_fixed].copy_from_slice(&args[..num_fixed]);
        for slot in &mut self.stack[frame_base + num_fixed..frame_base + expected] {
            *slot = TValue::nil();
        }
        self.stack[..num_varargs].copy_from_slice(&args[expected..expected + num_varargs]);

        let header = StackFrameHeader {
            caller_base: 0,
            ret: root_return,
            func: func_obj,
            caller_bytecode_offset: 0,
            num_variadic_args: num_varargs as u32,
        };
        header.store(&mut self.stack, frame_base);

        self.num_variadic_rets = VARIADIC_RETS_INVALID;
        self.final_rets.clear();
        run(self, frame_base, code_block.bytecode.as_ptr());
        Ok(std::mem::take(&mut self.final_rets))
    }
}

fn root_return(cr: &mut Coroutine, _caller_base: usize, ret_start: usize, num_rets: usize) -> Step {
    cr.last_ret_start = ret_start;
    cr.final_rets
        .extend_from_slice(&cr.stack[ret_start..ret_start + num_rets]);
    Step::Finished
}

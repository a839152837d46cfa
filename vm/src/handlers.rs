//! One handler per opcode. Each decodes its own operand record, performs
//! the operation, and tells the trampoline where to dispatch next.
//!
//! Operand shapes outside the supported fast paths are fatal in this tier;
//! the slow paths live in later tiers.

use std::rc::Rc;

use bytecode::instruction::{
    decode_raw, BcAddVV, BcCall, BcConstant, BcGlobalGet, BcGlobalPut, BcIsLtVV, BcNewClosure,
    BcReturn, BcSubVV, BcTableGetById, BcTableGetByVal, BcTablePutById, BcTablePutByVal,
};
use bytecode::{BytecodeSlot, CodeBlock, ExecutableCode, FunctionObject};
use object::{object_type_of, ObjectType, StringObject, TValue, TableObject};

use crate::coroutine::{Coroutine, VARIADIC_RETS_INVALID};
use crate::dispatch::Step;
use crate::frame::{StackFrameHeader, FRAME_HEADER_SLOTS, MIN_NIL_FILL_RETURN_VALUES};
use crate::ic::resolve_call_target;

#[inline(always)]
fn local(cr: &Coroutine, frame: usize, slot: BytecodeSlot) -> TValue {
    cr.stack[frame + slot.local_ord()]
}

#[inline(always)]
fn set_local(cr: &mut Coroutine, frame: usize, slot: BytecodeSlot, value: TValue) {
    cr.stack[frame + slot.local_ord()] = value;
}

#[inline(always)]
fn code_block_of(cr: &Coroutine, frame: usize) -> Rc<CodeBlock> {
    let func = StackFrameHeader::function(&cr.stack, frame);
    // SAFETY: frames are only built for live function objects.
    match unsafe { &(*func).executable } {
        ExecutableCode::Function(cb) => cb.clone(),
        ExecutableCode::Native(_) => unreachable!("native calls never build a bytecode frame"),
    }
}

#[inline(always)]
fn step_over<T>(frame: usize, instr: *const u8) -> Step {
    Step::Dispatch {
        frame,
        // SAFETY: the builder always emits a next instruction (or the
        // stream's terminal return) directly after a non-branching record.
        instr: unsafe { instr.add(size_of::<T>()) },
    }
}

/// Type-checked view of a table operand. Fatal on anything else.
#[inline(always)]
fn expect_table<'a>(base: TValue) -> &'a mut TableObject {
    if !base.is_pointer() {
        unimplemented!("table access on a non-pointer value");
    }
    // SAFETY: pointer values always reference a live heap cell.
    if unsafe { object_type_of(base) } != ObjectType::Table {
        unimplemented!("table access on a non-table object");
    }
    // SAFETY: checked to be a table object above.
    unsafe { base.as_obj_mut::<TableObject>() }
}

#[inline(always)]
fn constant_string(cb: &CodeBlock, ord: u32) -> *const StringObject {
    let name = cb.constants[ord as usize];
    debug_assert!(name.is_pointer());
    // SAFETY: name constants are interned strings by construction.
    unsafe {
        debug_assert_eq!(object_type_of(name), ObjectType::Str);
        name.as_ptr::<StringObject>()
    }
}

// ── table and global access ────────────────────────────────────────

pub(crate) fn table_get_by_id(cr: &mut Coroutine, frame: usize, instr: *const u8) -> Step {
    // SAFETY: dispatched on this record's opcode byte.
    let bc: BcTableGetById = unsafe { decode_raw(instr) };
    let cb = code_block_of(cr, frame);
    let table = expect_table(local(cr, frame, { bc.base }));
    let ic = table.prepare_get_by_id(constant_string(&cb, { bc.index }));
    set_local(cr, frame, { bc.dst }, table.get_by_id(ic));
    step_over::<BcTableGetById>(frame, instr)
}

pub(crate) fn table_put_by_id(cr: &mut Coroutine, frame: usize, instr: *const u8) -> Step {
    // SAFETY: dispatched on this record's opcode byte.
    let bc: BcTablePutById = unsafe { decode_raw(instr) };
    let cb = code_block_of(cr, frame);
    let table = expect_table(local(cr, frame, { bc.base }));
    let name = constant_string(&cb, { bc.index });
    let ic = table.prepare_put_by_id(name);
    table.put_by_id(name, ic, local(cr, frame, { bc.src }));
    step_over::<BcTablePutById>(frame, instr)
}

pub(crate) fn table_get_by_val(cr: &mut Coroutine, frame: usize, instr: *const u8) -> Step {
    // SAFETY: dispatched on this record's opcode byte.
    let bc: BcTableGetByVal = unsafe { decode_raw(instr) };
    let table = expect_table(local(cr, frame, { bc.base }));
    let key = local(cr, frame, { bc.index });
    let value = if key.is_int32() {
        let ic = table.prepare_get_by_integer_index();
        // SAFETY: checked int32.
        table.get_by_integer_index(unsafe { key.as_i32() }, ic)
    } else if key.is_double() {
        let ic = table.prepare_get_by_integer_index();
        // SAFETY: checked double.
        table.get_by_double_index(unsafe { key.as_f64() }, ic)
    } else if key.is_pointer() {
        // SAFETY: checked pointer; string keys are the only pointer keys
        // the builder emits.
        unsafe {
            debug_assert_eq!(object_type_of(key), ObjectType::Str);
            let ic = table.prepare_get_by_id(key.as_ptr::<StringObject>());
            table.get_by_id(ic)
        }
    } else {
        unimplemented!("table read with a nil or boolean key");
    };
    set_local(cr, frame, { bc.dst }, value);
    step_over::<BcTableGetByVal>(frame, instr)
}

pub(crate) fn table_put_by_val(cr: &mut Coroutine, frame: usize, instr: *const u8) -> Step {
    // SAFETY: dispatched on this record's opcode byte.
    let bc: BcTablePutByVal = unsafe { decode_raw(instr) };
    let table = expect_table(local(cr, frame, { bc.base }));
    let key = local(cr, frame, { bc.index });
    let value = local(cr, frame, { bc.src });
    if key.is_int32() {
        // SAFETY: checked int32.
        table.put_by_integer_index(unsafe { key.as_i32() }, value);
    } else if key.is_double() {
        // SAFETY: checked double.
        table.put_by_double_index(unsafe { key.as_f64() }, value);
    } else if key.is_pointer() {
        // SAFETY: checked pointer; string keys are the only pointer keys
        // the builder emits.
        unsafe {
            debug_assert_eq!(object_type_of(key), ObjectType::Str);
            let name = key.as_ptr::<StringObject>();
            let ic = table.prepare_put_by_id(name);
            table.put_by_id(name, ic, value);
        }
    } else {
        unimplemented!("table write with a nil or boolean key");
    }
    step_over::<BcTablePutByVal>(frame, instr)
}

pub(crate) fn global_get(cr: &mut Coroutine, frame: usize, instr: *const u8) -> Step {
    // SAFETY: dispatched on this record's opcode byte.
    let bc: BcGlobalGet = unsafe { decode_raw(instr) };
    let cb = code_block_of(cr, frame);
    let name = constant_string(&cb, { bc.index });
    // SAFETY: the global object outlives every coroutine running under it.
    let global = unsafe { &*cr.global_object };
    let ic = global.prepare_get_by_id(name);
    set_local(cr, frame, { bc.dst }, global.get_by_id(ic));
    step_over::<BcGlobalGet>(frame, instr)
}

pub(crate) fn global_put(cr: &mut Coroutine, frame: usize, instr: *const u8) -> Step {
    // SAFETY: dispatched on this record's opcode byte.
    let bc: BcGlobalPut = unsafe { decode_raw(instr) };
    let cb = code_block_of(cr, frame);
    let name = constant_string(&cb, { bc.index });
    let value = local(cr, frame, { bc.src });
    // SAFETY: the global object outlives every coroutine running under it.
    let global = unsafe { &mut *cr.global_object };
    let ic = global.prepare_put_by_id(name);
    global.put_by_id(name, ic, value);
    step_over::<BcGlobalPut>(frame, instr)
}

// ── arithmetic and branching ───────────────────────────────────────

pub(crate) fn add_vv(cr: &mut Coroutine, frame: usize, instr: *const u8) -> Step {
    // SAFETY: dispatched on this record's opcode byte.
    let bc: BcAddVV = unsafe { decode_raw(instr) };
    let lhs = local(cr, frame, { bc.lhs });
    let rhs = local(cr, frame, { bc.rhs });
    if lhs.is_double() && rhs.is_double() {
        // SAFETY: both checked double; from_f64 canonicalizes a NaN result.
        let sum = unsafe { lhs.as_f64() + rhs.as_f64() };
        set_local(cr, frame, { bc.result }, TValue::from_f64(sum));
    } else {
        unimplemented!("AddVV on non-double operands");
    }
    step_over::<BcAddVV>(frame, instr)
}

pub(crate) fn sub_vv(cr: &mut Coroutine, frame: usize, instr: *const u8) -> Step {
    // SAFETY: dispatched on this record's opcode byte.
    let bc: BcSubVV = unsafe { decode_raw(instr) };
    let lhs = local(cr, frame, { bc.lhs });
    let rhs = local(cr, frame, { bc.rhs });
    if lhs.is_double() && rhs.is_double() {
        // SAFETY: both checked double.
        let diff = unsafe { lhs.as_f64() - rhs.as_f64() };
        set_local(cr, frame, { bc.result }, TValue::from_f64(diff));
    } else {
        unimplemented!("SubVV on non-double operands");
    }
    step_over::<BcSubVV>(frame, instr)
}

pub(crate) fn is_lt_vv(cr: &mut Coroutine, frame: usize, instr: *const u8) -> Step {
    // SAFETY: dispatched on this record's opcode byte.
    let bc: BcIsLtVV = unsafe { decode_raw(instr) };
    let lhs = local(cr, frame, { bc.lhs });
    let rhs = local(cr, frame, { bc.rhs });
    if !(lhs.is_double() && rhs.is_double()) {
        unimplemented!("IsLtVV on non-double operands");
    }
    // SAFETY: both checked double.
    if unsafe { lhs.as_f64() < rhs.as_f64() } {
        Step::Dispatch {
            frame,
            // SAFETY: the builder patched this offset to an instruction
            // boundary in the same stream.
            instr: unsafe { instr.offset({ bc.offset } as isize) },
        }
    } else {
        step_over::<BcIsLtVV>(frame, instr)
    }
}

pub(crate) fn constant(cr: &mut Coroutine, frame: usize, instr: *const u8) -> Step {
    // SAFETY: dispatched on this record's opcode byte.
    let bc: BcConstant = unsafe { decode_raw(instr) };
    set_local(cr, frame, { bc.dst }, { bc.value });
    step_over::<BcConstant>(frame, instr)
}

// ── calls and returns ──────────────────────────────────────────────

pub(crate) fn call(cr: &mut Coroutine, frame: usize, instr: *const u8) -> Step {
    // SAFETY: dispatched on this record's opcode byte.
    let bc: BcCall = unsafe { decode_raw(instr) };
    let caller_cb = code_block_of(cr, frame);
    let caller_offset = instr as usize - caller_cb.bytecode.as_ptr() as usize;
    StackFrameHeader::set_caller_bytecode_offset(&mut cr.stack, frame, caller_offset as u32);

    let func = local(cr, frame, { bc.func_slot });
    let target = resolve_call_target(&caller_cb.call_ics[{ bc.ic_site } as usize], func);

    let num_fixed = { bc.num_fixed_params } as usize;
    let args_begin = frame + { bc.func_slot }.local_ord() + 1;
    let mut total_args = num_fixed;
    if bc.pass_variadic_res() {
        assert_ne!(cr.num_variadic_rets, VARIADIC_RETS_INVALID);
        total_args += cr.num_variadic_rets as usize;
    }
    let frame_end = frame + caller_cb.num_locals as usize;

    // SAFETY: resolved targets point into live function objects.
    let callee_cb = match unsafe { &*target } {
        ExecutableCode::Function(cb) => cb.clone(),
        ExecutableCode::Native(native) => {
            let native = *native;
            let mut args: Vec<TValue> =
                cr.stack[args_begin..args_begin + num_fixed].to_vec();
            if bc.pass_variadic_res() {
                let src = cr.variadic_ret_slot_begin as usize;
                let n = cr.num_variadic_rets as usize;
                args.extend_from_slice(&cr.stack[src..src + n]);
            }
            let rets = native(&args);

            let ret_start = frame_end + FRAME_HEADER_SLOTS;
            let window = rets.len().max(MIN_NIL_FILL_RETURN_VALUES);
            assert!(ret_start + window <= cr.stack.len(), "value stack exhausted");
            cr.stack[ret_start..ret_start + rets.len()].copy_from_slice(&rets);
            for slot in &mut cr.stack[ret_start + rets.len()..ret_start + window] {
                *slot = TValue::nil();
            }
            cr.num_variadic_rets = VARIADIC_RETS_INVALID;
            return on_return(cr, frame, ret_start, rets.len());
        }
    };

    let proto = &callee_cb.prototype;
    let expected = proto.num_fixed_args as usize;
    let mut base = frame_end + FRAME_HEADER_SLOTS;
    let mut num_varargs = 0usize;

    if proto.accepts_variadic_args {
        if total_args > expected {
            num_varargs = total_args - expected;
            base += num_varargs;
        }
        // the argument window is staged at `base` before surplus values
        // move below the header, so it needs room too; a short return from
        // the last local nil-fills past the frame top
        let frame_reach = callee_cb.num_locals as usize + (MIN_NIL_FILL_RETURN_VALUES - 1);
        let reach = frame_reach.max(total_args);
        assert!(base + reach <= cr.stack.len(), "value stack exhausted");
        if bc.pass_variadic_res() {
            let src = cr.variadic_ret_slot_begin as usize;
            let n = cr.num_variadic_rets as usize;
            cr.stack.copy_within(src..src + n, base + num_fixed);
        }
        cr.stack.copy_within(args_begin..args_begin + num_fixed, base);
        if total_args > expected {
            // surplus arguments move below the header, becoming varargs
            cr.stack
                .copy_within(base + expected..base + total_args, frame_end);
        }
    } else {
        // same headroom as above for the nil-fill on return
        let frame_reach = callee_cb.num_locals as usize + (MIN_NIL_FILL_RETURN_VALUES - 1);
        assert!(base + frame_reach <= cr.stack.len(), "value stack exhausted");
        if bc.pass_variadic_res() && expected > num_fixed {
            let src = cr.variadic_ret_slot_begin as usize;
            let n = (cr.num_variadic_rets as usize).min(expected - num_fixed);
            cr.stack.copy_within(src..src + n, base + num_fixed);
        }
        let copied = num_fixed.min(expected);
        cr.stack.copy_within(args_begin..args_begin + copied, base);
    }
    if total_args < expected {
        for slot in &mut cr.stack[base + total_args..base + expected] {
            *slot = TValue::nil();
        }
    }

    let header = StackFrameHeader {
        caller_base: frame,
        ret: on_return,
        // SAFETY: resolve_call_target established that `func` is a
        // function object.
        func: unsafe { func.as_ptr::<FunctionObject>() },
        caller_bytecode_offset: 0,
        num_variadic_args: num_varargs as u32,
    };
    header.store(&mut cr.stack, base);

    Step::Dispatch {
        frame: base,
        instr: callee_cb.bytecode.as_ptr(),
    }
}

/// Return continuation installed by [`call`]: lands back in the caller's
/// frame with the callee's results.
pub(crate) fn on_return(cr: &mut Coroutine, frame: usize, ret_start: usize, num_rets: usize) -> Step {
    let cb = code_block_of(cr, frame);
    let offset = StackFrameHeader::load(&cr.stack, frame).caller_bytecode_offset as usize;
    // SAFETY: the offset was recorded off this code block's own stream.
    let instr = unsafe { cb.bytecode.as_ptr().add(offset) };
    // SAFETY: the recorded offset points at the call instruction.
    let bc: BcCall = unsafe { decode_raw(instr) };

    if bc.keep_variadic_ret() {
        cr.num_variadic_rets = num_rets as u32;
        cr.variadic_ret_slot_begin = ret_start as u32;
    } else {
        let dst = frame + { bc.func_slot }.local_ord();
        let wanted = { bc.num_fixed_rets } as usize;
        if wanted <= MIN_NIL_FILL_RETURN_VALUES {
            // the return side guaranteed this many readable slots
            cr.stack.copy_within(ret_start..ret_start + wanted, dst);
        } else if num_rets < wanted {
            cr.stack.copy_within(ret_start..ret_start + num_rets, dst);
            for slot in &mut cr.stack[dst + num_rets..dst + wanted] {
                *slot = TValue::nil();
            }
        } else {
            cr.stack.copy_within(ret_start..ret_start + wanted, dst);
        }
    }

    Step::Dispatch {
        frame,
        // SAFETY: execution resumes at the instruction after the call.
        instr: unsafe { instr.add(size_of::<BcCall>()) },
    }
}

pub(crate) fn ret(cr: &mut Coroutine, frame: usize, instr: *const u8) -> Step {
    // SAFETY: dispatched on this record's opcode byte.
    let bc: BcReturn = unsafe { decode_raw(instr) };
    let begin = frame + { bc.slot_begin }.local_ord();
    let mut num = { bc.num_return_values } as usize;
    if bc.is_variadic() {
        assert_ne!(cr.num_variadic_rets, VARIADIC_RETS_INVALID);
        let src = cr.variadic_ret_slot_begin as usize;
        let n = cr.num_variadic_rets as usize;
        cr.stack.copy_within(src..src + n, begin + num);
        num += n;
    }
    cr.num_variadic_rets = VARIADIC_RETS_INVALID;
    for i in num..MIN_NIL_FILL_RETURN_VALUES {
        cr.stack[begin + i] = TValue::nil();
    }
    let header = StackFrameHeader::load(&cr.stack, frame);
    (header.ret)(cr, header.caller_base, begin, num)
}

// ── closures ───────────────────────────────────────────────────────

pub(crate) fn new_closure(cr: &mut Coroutine, frame: usize, instr: *const u8) -> Step {
    // SAFETY: dispatched on this record's opcode byte.
    let bc: BcNewClosure = unsafe { decode_raw(instr) };
    let cb = code_block_of(cr, frame);
    let proto = cb.prototype.child_protos[{ bc.proto_index } as usize].clone();

    let parent = StackFrameHeader::function(&cr.stack, frame);
    let upvalues: Vec<TValue> = proto
        .upvalues
        .iter()
        .map(|uv| {
            if uv.is_parent_local {
                cr.stack[frame + uv.slot as usize]
            } else {
                // SAFETY: the parent function object is live while its
                // frame runs.
                unsafe { (&(*parent).upvalues)[uv.slot as usize] }
            }
        })
        .collect();

    let callee_cb = proto.code_block_for(cb.global_object);
    let obj = cr
        .heap
        .alloc(FunctionObject::from_code_block(callee_cb, upvalues));
    set_local(cr, frame, { bc.dst }, TValue::from_ptr(obj));
    step_over::<BcNewClosure>(frame, instr)
}

pub(crate) fn upvalue_close(_cr: &mut Coroutine, _frame: usize, _instr: *const u8) -> Step {
    unimplemented!("closing upvalues requires the open-upvalue list runtime");
}

use bytecode::FunctionObject;
use object::TValue;

use crate::coroutine::Coroutine;
use crate::dispatch::Step;

/// Stack frame layout within the coroutine's value arena:
///
/// ```text
///     [... varargs ...] [header] [... locals ...]
///                                ^ frame base
/// ```
///
/// The header occupies [`FRAME_HEADER_SLOTS`] value-sized slots immediately
/// before the locals, so local access is plain index arithmetic off the
/// frame base.
pub const FRAME_HEADER_SLOTS: usize = 4;

/// A return must populate at least this many slots (nil-filled past the
/// actual values), so a caller expecting up to this many fixed results can
/// read them without a count check.
pub const MIN_NIL_FILL_RETURN_VALUES: usize = 3;

/// Invoked by the callee's return: `(coroutine, caller frame base,
/// absolute index of the first return value, number of return values)`.
pub type ReturnContinuation = fn(&mut Coroutine, usize, usize, usize) -> Step;

/// The decoded form of the header slots preceding a frame's locals.
#[derive(Clone, Copy)]
pub struct StackFrameHeader {
    pub caller_base: usize,
    pub ret: ReturnContinuation,
    pub func: *const FunctionObject,
    /// Offset of the call instruction in the caller's bytecode; only
    /// meaningful while this frame's function is itself calling.
    pub caller_bytecode_offset: u32,
    pub num_variadic_args: u32,
}

impl StackFrameHeader {
    pub fn store(&self, stack: &mut [TValue], frame_base: usize) {
        debug_assert!(frame_base >= FRAME_HEADER_SLOTS);
        stack[frame_base - 4] = TValue::from_raw(self.caller_base as u64);
        stack[frame_base - 3] = TValue::from_raw(self.ret as usize as u64);
        stack[frame_base - 2] = TValue::from_raw(self.func as u64);
        stack[frame_base - 1] = TValue::from_raw(
            self.caller_bytecode_offset as u64 | ((self.num_variadic_args as u64) << 32),
        );
    }

    pub fn load(stack: &[TValue], frame_base: usize) -> Self {
        debug_assert!(frame_base >= FRAME_HEADER_SLOTS);
        let packed = stack[frame_base - 1].raw();
        Self {
            caller_base: stack[frame_base - 4].raw() as usize,
            // SAFETY: the slot was written by `store` from a live
            // ReturnContinuation; fn pointers are word-sized here.
            ret: unsafe {
                core::mem::transmute::<usize, ReturnContinuation>(
                    stack[frame_base - 3].raw() as usize,
                )
            },
            func: stack[frame_base - 2].raw() as *const FunctionObject,
            caller_bytecode_offset: packed as u32,
            num_variadic_args: (packed >> 32) as u32,
        }
    }

    pub fn function(stack: &[TValue], frame_base: usize) -> *const FunctionObject {
        stack[frame_base - 2].raw() as *const FunctionObject
    }

    pub fn set_caller_bytecode_offset(stack: &mut [TValue], frame_base: usize, offset: u32) {
        let slot = &mut stack[frame_base - 1];
        *slot = TValue::from_raw((slot.raw() & !0xFFFF_FFFF) | offset as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_ret(_: &mut Coroutine, _: usize, _: usize, _: usize) -> Step {
        Step::Finished
    }

    #[test]
    fn header_roundtrip() {
        let mut stack = vec![TValue::nil(); 16];
        let hdr = StackFrameHeader {
            caller_base: 4,
            ret: noop_ret,
            func: 0x1234_5678usize as *const FunctionObject,
            caller_bytecode_offset: 77,
            num_variadic_args: 9,
        };
        hdr.store(&mut stack, 8);
        let back = StackFrameHeader::load(&stack, 8);
        assert_eq!(back.caller_base, 4);
        assert_eq!(back.ret as usize, noop_ret as usize);
        assert_eq!(back.func, hdr.func);
        assert_eq!(back.caller_bytecode_offset, 77);
        assert_eq!(back.num_variadic_args, 9);
        assert_eq!(StackFrameHeader::function(&stack, 8), hdr.func);
    }

    #[test]
    fn caller_offset_update_preserves_vararg_count() {
        let mut stack = vec![TValue::nil(); 16];
        let hdr = StackFrameHeader {
            caller_base: 0,
            ret: noop_ret,
            func: core::ptr::null(),
            caller_bytecode_offset: 0,
            num_variadic_args: 5,
        };
        hdr.store(&mut stack, 4);
        StackFrameHeader::set_caller_bytecode_offset(&mut stack, 4, 1234);
        let back = StackFrameHeader::load(&stack, 4);
        assert_eq!(back.caller_bytecode_offset, 1234);
        assert_eq!(back.num_variadic_args, 5);
    }
}

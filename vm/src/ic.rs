use std::cell::Cell;

use bitflags::bitflags;
use bytecode::{CallIc, ExecutableCode, FunctionObject, IcShape};
use object::{object_type_of, ObjectType, TValue};

bitflags! {
    /// The dynamic types a dataflow fact can prove for a value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeMask: u16 {
        const NIL      = 1 << 0;
        const BOOL     = 1 << 1;
        const DOUBLE   = 1 << 2;
        const INT32    = 1 << 3;
        const STRING   = 1 << 4;
        const TABLE    = 1 << 5;
        const FUNCTION = 1 << 6;
    }
}

/// What the frontend knows about the block terminator feeding a call.
#[derive(Debug, Clone, Copy)]
pub struct TerminatorDesc {
    pub is_conditional_branch: bool,
    /// The branch condition type-checks the same value the call invokes.
    pub checks_callee_operand: bool,
    /// Types the checked value can still have on the edge reaching the call.
    pub proven_on_taken_edge: TypeMask,
}

/// What the frontend knows about one call site when shapes are planned.
#[derive(Debug, Clone, Copy)]
pub struct CallSiteDesc {
    /// The callee operand is produced by a callable-narrowing conversion
    /// inside the call's own block.
    pub callee_from_narrowing: bool,
    pub num_block_predecessors: u32,
    pub predecessor_terminator: Option<TerminatorDesc>,
}

/// Decides whether a call site may test its cache key before the callee
/// type check.
///
/// Hoisting is sound only when control flow already proves the operand
/// callable on the path reaching the call: the operand must come from a
/// callable-narrowing conversion, the call's block must have exactly one
/// predecessor, and that predecessor's terminator must be a conditional
/// type check of the same value whose taken-edge mask covers the function
/// type. The mask may be wider than functions alone; a key hit still
/// proves the exact cached callee. Anything weaker keeps the default
/// [`IcShape::Checked`] shape.
pub fn plan_call_site(site: &CallSiteDesc) -> IcShape {
    if !site.callee_from_narrowing {
        return IcShape::Checked;
    }
    if site.num_block_predecessors != 1 {
        return IcShape::Checked;
    }
    let Some(term) = site.predecessor_terminator else {
        return IcShape::Checked;
    };
    if !term.is_conditional_branch || !term.checks_callee_operand {
        return IcShape::Checked;
    }
    if !term.proven_on_taken_edge.contains(TypeMask::FUNCTION) {
        return IcShape::Checked;
    }
    IcShape::Hoisted
}

thread_local! {
    static RESOLUTIONS: Cell<u64> = const { Cell::new(0) };
    static HITS: Cell<u64> = const { Cell::new(0) };
}

/// Counters for cache behavior, kept per thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IcStats {
    /// Full callee resolutions (cache misses or caching disabled).
    pub resolutions: u64,
    /// Calls served from a cached target.
    pub hits: u64,
}

pub fn ic_stats() -> IcStats {
    IcStats {
        resolutions: RESOLUTIONS.with(|c| c.get()),
        hits: HITS.with(|c| c.get()),
    }
}

pub fn reset_ic_stats() {
    RESOLUTIONS.with(|c| c.set(0));
    HITS.with(|c| c.set(0));
}

#[inline(always)]
fn is_function_object(value: TValue) -> bool {
    // SAFETY: pointer values always reference a live heap cell.
    value.is_pointer() && unsafe { object_type_of(value) } == ObjectType::Function
}

/// The uncached path: load the executable out of the function object.
#[inline(always)]
fn resolve_generic(callee: TValue) -> *const ExecutableCode {
    RESOLUTIONS.with(|c| c.set(c.get() + 1));
    // SAFETY: the caller established that `callee` is a function object.
    unsafe { &(*callee.as_ptr::<FunctionObject>()).executable }
}

/// Resolves the executable a call site transfers to, consulting and
/// refilling the site's cache.
///
/// Hoisted sites compare the key first; a hit skips the type check
/// entirely. Checked sites type-check first. Calling a value that is not
/// a function is fatal in this tier.
#[inline(always)]
#[cfg_attr(not(feature = "inline-cache"), allow(unused_variables))]
pub(crate) fn resolve_call_target(site: &CallIc, callee: TValue) -> *const ExecutableCode {
    #[cfg(feature = "inline-cache")]
    {
        match site.shape() {
            IcShape::Hoisted => {
                if site.is_hit(callee.raw()) {
                    HITS.with(|c| c.set(c.get() + 1));
                    return site.target();
                }
            }
            IcShape::Checked => {
                if is_function_object(callee) && site.is_hit(callee.raw()) {
                    HITS.with(|c| c.set(c.get() + 1));
                    return site.target();
                }
            }
        }
        if !is_function_object(callee) {
            unimplemented!("call of a value that is not a function");
        }
        let target = resolve_generic(callee);
        log::trace!(
            "call ic miss ({:?}): caching callee 0x{:016x}",
            site.shape(),
            callee.raw()
        );
        site.update(callee.raw(), target);
        target
    }
    #[cfg(not(feature = "inline-cache"))]
    {
        if !is_function_object(callee) {
            unimplemented!("call of a value that is not a function");
        }
        resolve_generic(callee)
    }
}

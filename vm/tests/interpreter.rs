use std::rc::Rc;

use bytecode::{
    BytecodeBuilder, BytecodeSlot, FunctionObject, FunctionPrototype, UpvalueMetadata,
};
use object::{Heap, TValue, TableObject};
use vm::{Coroutine, RuntimeError};

fn host(stack_slots: usize) -> Coroutine {
    let mut heap = Heap::new();
    let global = heap.alloc(TableObject::new());
    Coroutine::new(heap, global, stack_slots)
}

fn finish_proto(
    b: BytecodeBuilder,
    constants: Vec<TValue>,
    num_locals: u32,
    num_fixed_args: u32,
) -> Rc<FunctionPrototype> {
    let num_call_sites = b.num_call_sites();
    let mut proto = FunctionPrototype::new(b.finish(), constants, num_locals, num_fixed_args);
    proto.num_call_sites = num_call_sites;
    Rc::new(proto)
}

fn instantiate(cr: &mut Coroutine, proto: &Rc<FunctionPrototype>) -> TValue {
    let code_block = proto.code_block_for(cr.global_object);
    let func = cr
        .heap
        .alloc(FunctionObject::from_code_block(code_block, vec![]));
    TValue::from_ptr(func)
}

fn as_f64(v: TValue) -> f64 {
    assert!(v.is_double(), "expected a double, got {v:?}");
    unsafe { v.as_f64() }
}

fn l(ord: u32) -> BytecodeSlot {
    BytecodeSlot::local(ord)
}

#[test]
fn adds_two_constants() {
    let mut cr = host(256);
    let mut b = BytecodeBuilder::new();
    b.constant(l(0), TValue::from_f64(5.0));
    b.constant(l(1), TValue::from_f64(3.0));
    b.add_vv(l(0), l(1), l(2));
    b.ret(l(2), 1);
    let proto = finish_proto(b, vec![], 3, 0);

    let func = instantiate(&mut cr, &proto);
    let rets = cr.call_root(func, &[]).unwrap();
    assert_eq!(rets.len(), 1);
    assert_eq!(as_f64(rets[0]), 8.0);

    // the return protocol nil-fills the window up to three readable slots
    let start = cr.last_ret_start;
    assert!(cr.stack[start + 1].is_nil());
    assert!(cr.stack[start + 2].is_nil());
}

#[test]
fn loop_sums_to_the_limit() {
    let mut cr = host(256);
    let mut b = BytecodeBuilder::new();
    b.constant(l(0), TValue::from_f64(0.0));
    b.constant(l(1), TValue::from_f64(1.0));
    b.constant(l(2), TValue::from_f64(100.0));
    let head = b.current_offset();
    b.add_vv(l(0), l(1), l(0));
    b.is_lt_vv_to(l(0), l(2), head);
    b.ret(l(0), 1);
    let proto = finish_proto(b, vec![], 3, 0);

    let func = instantiate(&mut cr, &proto);
    let rets = cr.call_root(func, &[]).unwrap();
    assert_eq!(as_f64(rets[0]), 100.0);
}

#[test]
fn forward_branch_skips_the_fallthrough() {
    // if 1.0 < 2.0 return 10.0 else return 20.0
    let mut cr = host(256);
    let mut b = BytecodeBuilder::new();
    b.constant(l(0), TValue::from_f64(1.0));
    b.constant(l(1), TValue::from_f64(2.0));
    b.constant(l(2), TValue::from_f64(20.0));
    let taken = b.is_lt_vv(l(0), l(1));
    b.ret(l(2), 1);
    b.bind(taken);
    b.constant(l(2), TValue::from_f64(10.0));
    b.ret(l(2), 1);
    let proto = finish_proto(b, vec![], 3, 0);

    let func = instantiate(&mut cr, &proto);
    let rets = cr.call_root(func, &[]).unwrap();
    assert_eq!(as_f64(rets[0]), 10.0);
}

#[test]
fn calls_a_bytecode_function() {
    let mut cr = host(512);

    // callee(a, b) = a + b
    let mut b = BytecodeBuilder::new();
    b.add_vv(l(0), l(1), l(2));
    b.ret(l(2), 1);
    let callee = finish_proto(b, vec![], 3, 2);

    // caller(f, x, y) = f(x, y)
    let mut b = BytecodeBuilder::new();
    b.call(l(0), 2, 1, false, false);
    b.ret(l(0), 1);
    let caller = finish_proto(b, vec![], 3, 3);

    let callee_fn = instantiate(&mut cr, &callee);
    let caller_fn = instantiate(&mut cr, &caller);
    let rets = cr
        .call_root(
            caller_fn,
            &[callee_fn, TValue::from_f64(2.0), TValue::from_f64(40.0)],
        )
        .unwrap();
    assert_eq!(as_f64(rets[0]), 42.0);
}

#[test]
fn missing_arguments_read_as_nil() {
    let mut cr = host(512);

    // callee(a, b) returns its first argument untouched
    let mut b = BytecodeBuilder::new();
    b.ret(l(0), 1);
    let callee = finish_proto(b, vec![], 2, 2);

    // caller(f) = f()  -- no arguments passed
    let mut b = BytecodeBuilder::new();
    b.call(l(0), 0, 1, false, false);
    b.ret(l(0), 1);
    let caller = finish_proto(b, vec![], 1, 1);

    let callee_fn = instantiate(&mut cr, &callee);
    let caller_fn = instantiate(&mut cr, &caller);
    let rets = cr.call_root(caller_fn, &[callee_fn]).unwrap();
    assert!(rets[0].is_nil());
}

#[test]
fn short_returns_nil_fill_the_fixed_ret_window() {
    let mut cr = host(512);

    // callee() = 42.0  (one value)
    let mut b = BytecodeBuilder::new();
    b.constant(l(0), TValue::from_f64(42.0));
    b.ret(l(0), 1);
    let callee = finish_proto(b, vec![], 1, 0);

    // caller(f) asks for three results and returns all of them
    let mut b = BytecodeBuilder::new();
    b.call(l(0), 0, 3, false, false);
    b.ret(l(0), 3);
    let caller = finish_proto(b, vec![], 3, 1);

    let callee_fn = instantiate(&mut cr, &callee);
    let caller_fn = instantiate(&mut cr, &caller);
    let rets = cr.call_root(caller_fn, &[callee_fn]).unwrap();
    assert_eq!(rets.len(), 3);
    assert_eq!(as_f64(rets[0]), 42.0);
    assert!(rets[1].is_nil());
    assert!(rets[2].is_nil());
}

#[test]
fn variadic_results_append_to_a_return() {
    let mut cr = host(512);

    // callee() = 1.0, 2.0
    let mut b = BytecodeBuilder::new();
    b.constant(l(0), TValue::from_f64(1.0));
    b.constant(l(1), TValue::from_f64(2.0));
    b.ret(l(0), 2);
    let callee = finish_proto(b, vec![], 2, 0);

    // caller(f) = 10.0, f()...
    let mut b = BytecodeBuilder::new();
    b.call(l(0), 0, 0, true, false);
    b.constant(l(1), TValue::from_f64(10.0));
    b.ret_variadic(l(1), 1);
    let caller = finish_proto(b, vec![], 2, 1);

    let callee_fn = instantiate(&mut cr, &callee);
    let caller_fn = instantiate(&mut cr, &caller);
    let rets = cr.call_root(caller_fn, &[callee_fn]).unwrap();
    assert_eq!(rets.len(), 3);
    assert_eq!(as_f64(rets[0]), 10.0);
    assert_eq!(as_f64(rets[1]), 1.0);
    assert_eq!(as_f64(rets[2]), 2.0);
}

#[test]
fn variadic_results_pass_through_to_the_next_call() {
    let mut cr = host(512);

    // a() = 1.0, 2.0
    let mut b = BytecodeBuilder::new();
    b.constant(l(0), TValue::from_f64(1.0));
    b.constant(l(1), TValue::from_f64(2.0));
    b.ret(l(0), 2);
    let a = finish_proto(b, vec![], 2, 0);

    // sum(x, y) = x + y
    let mut b = BytecodeBuilder::new();
    b.add_vv(l(0), l(1), l(2));
    b.ret(l(2), 1);
    let sum = finish_proto(b, vec![], 3, 2);

    // caller(fa, fsum) = fsum(fa()...)
    let mut b = BytecodeBuilder::new();
    b.call(l(0), 0, 0, true, false);
    b.call(l(1), 0, 1, false, true);
    b.ret(l(1), 1);
    let caller = finish_proto(b, vec![], 2, 2);

    let a_fn = instantiate(&mut cr, &a);
    let sum_fn = instantiate(&mut cr, &sum);
    let caller_fn = instantiate(&mut cr, &caller);
    let rets = cr.call_root(caller_fn, &[a_fn, sum_fn]).unwrap();
    assert_eq!(as_f64(rets[0]), 3.0);
}

#[test]
fn surplus_arguments_become_varargs() {
    let mut cr = host(512);

    // callee takes one fixed argument plus varargs, returns the fixed one
    let mut b = BytecodeBuilder::new();
    b.ret(l(0), 1);
    let mut callee = FunctionPrototype::new(b.finish(), vec![], 1, 1);
    callee.accepts_variadic_args = true;
    let callee = Rc::new(callee);

    // caller(f, x, y, z) = f(x, y, z)
    let mut b = BytecodeBuilder::new();
    b.call(l(0), 3, 1, false, false);
    b.ret(l(0), 1);
    let caller = finish_proto(b, vec![], 4, 4);

    let callee_fn = instantiate(&mut cr, &callee);
    let caller_fn = instantiate(&mut cr, &caller);
    let rets = cr
        .call_root(
            caller_fn,
            &[
                callee_fn,
                TValue::from_f64(7.0),
                TValue::from_f64(8.0),
                TValue::from_f64(9.0),
            ],
        )
        .unwrap();
    assert_eq!(as_f64(rets[0]), 7.0);
}

#[test]
fn calls_a_native_function() {
    fn double(args: &[TValue]) -> Vec<TValue> {
        vec![TValue::from_f64(unsafe { args[0].as_f64() } * 2.0)]
    }

    let mut cr = host(512);
    let native = TValue::from_ptr(cr.heap.alloc(FunctionObject::native(double)));

    // caller(f, x) = f(x)
    let mut b = BytecodeBuilder::new();
    b.call(l(0), 1, 1, false, false);
    b.ret(l(0), 1);
    let caller = finish_proto(b, vec![], 2, 2);

    let caller_fn = instantiate(&mut cr, &caller);
    let rets = cr
        .call_root(caller_fn, &[native, TValue::from_f64(21.0)])
        .unwrap();
    assert_eq!(as_f64(rets[0]), 42.0);
}

#[test]
fn globals_roundtrip_through_the_global_object() {
    let mut cr = host(256);
    let name = cr.heap.intern("answer");

    let mut b = BytecodeBuilder::new();
    b.constant(l(0), TValue::from_f64(3.5));
    b.global_put(0, l(0));
    b.global_get(0, l(1));
    b.ret(l(1), 1);
    let proto = finish_proto(b, vec![TValue::from_ptr(name)], 2, 0);

    let func = instantiate(&mut cr, &proto);
    let rets = cr.call_root(func, &[]).unwrap();
    assert_eq!(as_f64(rets[0]), 3.5);

    // the write is visible to the host through the same table
    let globals = unsafe { &*cr.global_object };
    let ic = globals.prepare_get_by_id(name);
    assert_eq!(as_f64(globals.get_by_id(ic)), 3.5);
}

#[test]
fn named_table_properties_roundtrip() {
    let mut cr = host(256);
    let name = cr.heap.intern("field");
    let table = TValue::from_ptr(cr.heap.alloc(TableObject::new()));

    // prog(t): t.field = 5.5; return t.field
    let mut b = BytecodeBuilder::new();
    b.constant(l(1), TValue::from_f64(5.5));
    b.table_put_by_id(l(0), 0, l(1));
    b.table_get_by_id(l(0), 0, l(2));
    b.ret(l(2), 1);
    let proto = finish_proto(b, vec![TValue::from_ptr(name)], 3, 1);

    let func = instantiate(&mut cr, &proto);
    let rets = cr.call_root(func, &[table]).unwrap();
    assert_eq!(as_f64(rets[0]), 5.5);
}

#[test]
fn indexed_table_access_by_double_key() {
    let mut cr = host(256);
    let table = TValue::from_ptr(cr.heap.alloc(TableObject::new()));

    // prog(t): t[2.0] = true; return t[2.0], t[9.0]
    let mut b = BytecodeBuilder::new();
    b.constant(l(1), TValue::from_f64(2.0));
    b.constant(l(2), TValue::from_bool(true));
    b.table_put_by_val(l(0), l(1), l(2));
    b.table_get_by_val(l(0), l(1), l(3));
    b.constant(l(1), TValue::from_f64(9.0));
    b.table_get_by_val(l(0), l(1), l(4));
    b.ret(l(3), 2);
    let proto = finish_proto(b, vec![], 5, 1);

    let func = instantiate(&mut cr, &proto);
    let rets = cr.call_root(func, &[table]).unwrap();
    assert!(rets[0].is_bool() && unsafe { rets[0].as_bool() });
    assert!(rets[1].is_nil());
}

#[test]
fn string_keys_take_the_named_path_by_val() {
    let mut cr = host(256);
    let key = cr.heap.intern("k");
    let table = TValue::from_ptr(cr.heap.alloc(TableObject::new()));

    let mut b = BytecodeBuilder::new();
    b.constant(l(1), TValue::from_ptr(key));
    b.constant(l(2), TValue::from_f64(6.25));
    b.table_put_by_val(l(0), l(1), l(2));
    b.table_get_by_val(l(0), l(1), l(3));
    b.ret(l(3), 1);
    let proto = finish_proto(b, vec![], 4, 1);

    let func = instantiate(&mut cr, &proto);
    let rets = cr.call_root(func, &[table]).unwrap();
    assert_eq!(as_f64(rets[0]), 6.25);
}

#[test]
fn closures_capture_parent_locals() {
    let mut cr = host(256);

    // child() = 7.0, capturing the parent's l1
    let mut b = BytecodeBuilder::new();
    b.constant(l(0), TValue::from_f64(7.0));
    b.ret(l(0), 1);
    let mut child = FunctionPrototype::new(b.finish(), vec![], 1, 0);
    child.upvalues = vec![UpvalueMetadata {
        is_parent_local: true,
        slot: 1,
    }];
    let child = Rc::new(child);

    // parent() = closure over l1 = 99.0
    let mut b = BytecodeBuilder::new();
    b.constant(l(1), TValue::from_f64(99.0));
    b.new_closure(l(0), 0);
    b.ret(l(0), 1);
    let mut parent = FunctionPrototype::new(b.finish(), vec![], 2, 0);
    parent.child_protos = vec![child];
    let parent = Rc::new(parent);

    let parent_fn = instantiate(&mut cr, &parent);
    let rets = cr.call_root(parent_fn, &[]).unwrap();
    let closure = rets[0];
    assert!(closure.is_pointer());
    let obj = unsafe { closure.as_obj::<FunctionObject>() };
    assert_eq!(obj.upvalues.len(), 1);
    assert_eq!(as_f64(obj.upvalues[0]), 99.0);

    // and the closure runs
    let rets = cr.call_root(closure, &[]).unwrap();
    assert_eq!(as_f64(rets[0]), 7.0);
}

#[test]
fn nested_closures_capture_parent_upvalues() {
    let mut cr = host(256);

    // grandchild captures the child's upvalue 0
    let mut b = BytecodeBuilder::new();
    b.ret(l(0), 0);
    let mut grandchild = FunctionPrototype::new(b.finish(), vec![], 1, 0);
    grandchild.upvalues = vec![UpvalueMetadata {
        is_parent_local: false,
        slot: 0,
    }];
    let grandchild = Rc::new(grandchild);

    // child (capturing parent's l1) returns a closure of the grandchild
    let mut b = BytecodeBuilder::new();
    b.new_closure(l(0), 0);
    b.ret(l(0), 1);
    let mut child = FunctionPrototype::new(b.finish(), vec![], 1, 0);
    child.upvalues = vec![UpvalueMetadata {
        is_parent_local: true,
        slot: 1,
    }];
    child.child_protos = vec![grandchild];
    let child = Rc::new(child);

    let mut b = BytecodeBuilder::new();
    b.constant(l(1), TValue::from_f64(55.0));
    b.new_closure(l(0), 0);
    b.call(l(0), 0, 1, false, false);
    b.ret(l(0), 1);
    let mut parent = FunctionPrototype::new(b.finish(), vec![], 2, 0);
    parent.child_protos = vec![child];
    parent.num_call_sites = 1;
    let parent = Rc::new(parent);

    let parent_fn = instantiate(&mut cr, &parent);
    let rets = cr.call_root(parent_fn, &[]).unwrap();
    let inner = unsafe { rets[0].as_obj::<FunctionObject>() };
    assert_eq!(inner.upvalues.len(), 1);
    assert_eq!(as_f64(inner.upvalues[0]), 55.0);
}

#[test]
fn root_call_rejects_non_functions() {
    let mut cr = host(256);
    assert_eq!(
        cr.call_root(TValue::from_f64(1.0), &[]),
        Err(RuntimeError::NotCallable)
    );
    let table = TValue::from_ptr(cr.heap.alloc(TableObject::new()));
    assert_eq!(cr.call_root(table, &[]), Err(RuntimeError::NotCallable));
}

#[test]
fn root_call_reports_stack_exhaustion() {
    let mut cr = host(16);
    let mut b = BytecodeBuilder::new();
    b.ret(l(0), 0);
    let proto = finish_proto(b, vec![], 1000, 0);
    let func = instantiate(&mut cr, &proto);
    assert_eq!(cr.call_root(func, &[]), Err(RuntimeError::StackExhausted));
}

#[test]
fn root_frame_reserves_the_return_nil_fill_window() {
    // rets from the last local, so the nil fill reaches two slots past
    // the frame top; frame_base 4 + 8 locals + 2 headroom = 14
    let mut b = BytecodeBuilder::new();
    b.constant(l(7), TValue::from_f64(1.0));
    b.ret(l(7), 1);
    let proto = finish_proto(b, vec![], 8, 0);

    let mut cr = host(13);
    let func = instantiate(&mut cr, &proto);
    assert_eq!(cr.call_root(func, &[]), Err(RuntimeError::StackExhausted));

    let mut cr = host(14);
    let func = instantiate(&mut cr, &proto);
    let rets = cr.call_root(func, &[]).unwrap();
    assert_eq!(as_f64(rets[0]), 1.0);
}

#[test]
#[should_panic(expected = "value stack exhausted")]
fn nested_frame_reserves_the_return_nil_fill_window() {
    let mut cr = host(18);

    // callee rets from its last local; its frame base lands at 9, so
    // 8 locals fit but the nil-fill headroom does not
    let mut b = BytecodeBuilder::new();
    b.constant(l(7), TValue::from_f64(1.0));
    b.ret(l(7), 1);
    let callee = finish_proto(b, vec![], 8, 0);

    let mut b = BytecodeBuilder::new();
    b.call(l(0), 0, 1, false, false);
    b.ret(l(0), 1);
    let caller = finish_proto(b, vec![], 1, 1);

    let callee_fn = instantiate(&mut cr, &callee);
    let caller_fn = instantiate(&mut cr, &caller);
    let _ = cr.call_root(caller_fn, &[callee_fn]);
}

#[cfg(feature = "inline-cache")]
mod inline_cache {
    use super::*;
    use bytecode::IcShape;
    use vm::{ic_stats, reset_ic_stats};

    #[test]
    fn repeat_calls_hit_without_resolving() {
        let mut cr = host(512);

        let mut b = BytecodeBuilder::new();
        b.constant(l(0), TValue::from_f64(1.0));
        b.ret(l(0), 1);
        let callee_a = finish_proto(b, vec![], 1, 0);

        let mut b = BytecodeBuilder::new();
        b.constant(l(0), TValue::from_f64(2.0));
        b.ret(l(0), 1);
        let callee_b = finish_proto(b, vec![], 1, 0);

        // caller(f) = f()
        let mut b = BytecodeBuilder::new();
        b.call(l(0), 0, 1, false, false);
        b.ret(l(0), 1);
        let caller = finish_proto(b, vec![], 1, 1);

        let a = instantiate(&mut cr, &callee_a);
        let b_fn = instantiate(&mut cr, &callee_b);
        let caller_fn = instantiate(&mut cr, &caller);

        reset_ic_stats();
        assert_eq!(as_f64(cr.call_root(caller_fn, &[a]).unwrap()[0]), 1.0);
        let s = ic_stats();
        assert_eq!((s.resolutions, s.hits), (1, 0));

        // same callee again: served by the cache
        assert_eq!(as_f64(cr.call_root(caller_fn, &[a]).unwrap()[0]), 1.0);
        let s = ic_stats();
        assert_eq!((s.resolutions, s.hits), (1, 1));

        // different callee: monomorphic overwrite, then hits again
        assert_eq!(as_f64(cr.call_root(caller_fn, &[b_fn]).unwrap()[0]), 2.0);
        let s = ic_stats();
        assert_eq!((s.resolutions, s.hits), (2, 1));

        assert_eq!(as_f64(cr.call_root(caller_fn, &[b_fn]).unwrap()[0]), 2.0);
        let s = ic_stats();
        assert_eq!((s.resolutions, s.hits), (2, 2));

        // switching back misses again: the cache holds one entry
        assert_eq!(as_f64(cr.call_root(caller_fn, &[a]).unwrap()[0]), 1.0);
        let s = ic_stats();
        assert_eq!((s.resolutions, s.hits), (3, 2));
    }

    #[test]
    fn caches_are_per_call_site() {
        let mut cr = host(512);

        let mut b = BytecodeBuilder::new();
        b.constant(l(0), TValue::from_f64(1.0));
        b.ret(l(0), 1);
        let callee = finish_proto(b, vec![], 1, 0);

        // caller(f, g) = f() + g() -- two distinct sites
        let mut b = BytecodeBuilder::new();
        b.call(l(0), 0, 1, false, false);
        b.call(l(1), 0, 1, false, false);
        b.add_vv(l(0), l(1), l(0));
        b.ret(l(0), 1);
        let caller = finish_proto(b, vec![], 2, 2);

        let f = instantiate(&mut cr, &callee);
        let g = instantiate(&mut cr, &callee);
        let caller_fn = instantiate(&mut cr, &caller);

        reset_ic_stats();
        cr.call_root(caller_fn, &[f, g]).unwrap();
        let s = ic_stats();
        assert_eq!((s.resolutions, s.hits), (2, 0));

        // each site stays monomorphic on its own callee
        cr.call_root(caller_fn, &[f, g]).unwrap();
        let s = ic_stats();
        assert_eq!((s.resolutions, s.hits), (2, 2));
    }

    #[test]
    fn hoisted_sites_hit_on_the_raw_key_alone() {
        let mut cr = host(512);

        let mut b = BytecodeBuilder::new();
        b.constant(l(0), TValue::from_f64(5.0));
        b.ret(l(0), 1);
        let callee = finish_proto(b, vec![], 1, 0);

        // caller(f) = f(), with the site planned to test its key first
        let mut b = BytecodeBuilder::new();
        b.call(l(0), 0, 1, false, false);
        b.ret(l(0), 1);
        let num_call_sites = b.num_call_sites();
        let mut caller = FunctionPrototype::new(b.finish(), vec![], 1, 1);
        caller.num_call_sites = num_call_sites;
        caller.call_site_shapes = vec![IcShape::Hoisted];
        let caller = Rc::new(caller);

        let f = instantiate(&mut cr, &callee);
        let caller_fn = instantiate(&mut cr, &caller);
        let cb = caller.code_block_for(cr.global_object);
        assert_eq!(cb.call_ics[0].shape(), IcShape::Hoisted);

        reset_ic_stats();
        assert_eq!(as_f64(cr.call_root(caller_fn, &[f]).unwrap()[0]), 5.0);
        let s = ic_stats();
        assert_eq!((s.resolutions, s.hits), (1, 0));

        // the repeat call is served on the key comparison, no type check
        assert_eq!(as_f64(cr.call_root(caller_fn, &[f]).unwrap()[0]), 5.0);
        let s = ic_stats();
        assert_eq!((s.resolutions, s.hits), (1, 1));
    }
}

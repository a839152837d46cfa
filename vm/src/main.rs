use std::rc::Rc;

use clap::Parser;

use bytecode::{BytecodeBuilder, BytecodeDecoder, BytecodeSlot, FunctionObject, FunctionPrototype};
use dfg::{BytecodeLiveness, ControlFlowInfo};
use object::{Heap, TValue, TableObject};
use vm::Coroutine;

/// Demo driver: builds a few programs by hand and runs them through the
/// interpreter.
#[derive(Parser)]
#[command(name = "vm")]
struct Cli {
    /// Disassemble the demo programs before running them.
    #[arg(long)]
    dump_bytecode: bool,

    /// Print per-instruction liveness for the loop program.
    #[arg(long)]
    liveness: bool,

    /// Upper bound for the summing loop.
    #[arg(long, default_value_t = 1000.0)]
    limit: f64,
}

/// `return 5.0 + 3.0`
fn build_add() -> Rc<FunctionPrototype> {
    let mut b = BytecodeBuilder::new();
    b.constant(BytecodeSlot::local(0), TValue::from_f64(5.0));
    b.constant(BytecodeSlot::local(1), TValue::from_f64(3.0));
    b.add_vv(
        BytecodeSlot::local(0),
        BytecodeSlot::local(1),
        BytecodeSlot::local(2),
    );
    b.ret(BytecodeSlot::local(2), 1);
    Rc::new(FunctionPrototype::new(b.finish(), vec![], 3, 0))
}

/// `acc = 0; while acc < limit { acc = acc + 1 }; return acc`
fn build_loop(limit: f64) -> Rc<FunctionPrototype> {
    let mut b = BytecodeBuilder::new();
    b.constant(BytecodeSlot::local(0), TValue::from_f64(0.0));
    b.constant(BytecodeSlot::local(1), TValue::from_f64(1.0));
    b.constant(BytecodeSlot::local(2), TValue::from_f64(limit));
    let loop_head = b.current_offset();
    b.add_vv(
        BytecodeSlot::local(0),
        BytecodeSlot::local(1),
        BytecodeSlot::local(0),
    );
    b.is_lt_vv_to(BytecodeSlot::local(0), BytecodeSlot::local(2), loop_head);
    b.ret(BytecodeSlot::local(0), 1);
    Rc::new(FunctionPrototype::new(b.finish(), vec![], 3, 0))
}

/// `return add2(2.0, 40.0)` with `add2` looked up in the globals.
fn build_call(name_ordinal: u32, constants: Vec<TValue>) -> Rc<FunctionPrototype> {
    let mut b = BytecodeBuilder::new();
    b.global_get(name_ordinal, BytecodeSlot::local(0));
    b.constant(BytecodeSlot::local(1), TValue::from_f64(2.0));
    b.constant(BytecodeSlot::local(2), TValue::from_f64(40.0));
    let _site = b.call(BytecodeSlot::local(0), 2, 1, false, false);
    b.ret(BytecodeSlot::local(0), 1);
    let num_call_sites = b.num_call_sites();
    let mut proto = FunctionPrototype::new(b.finish(), constants, 3, 0);
    proto.num_call_sites = num_call_sites;
    Rc::new(proto)
}

fn native_add2(args: &[TValue]) -> Vec<TValue> {
    // SAFETY: the demo only ever passes doubles.
    let sum = unsafe { args[0].as_f64() + args[1].as_f64() };
    vec![TValue::from_f64(sum)]
}

fn print_liveness(proto: &FunctionPrototype, control_flow: &ControlFlowInfo) {
    let decoder = BytecodeDecoder::for_prototype(proto);
    let liveness = BytecodeLiveness::compute(&decoder, proto.num_locals as usize, control_flow);
    for index in 0..liveness.num_bytecodes() {
        let before: Vec<usize> = liveness.before_use(index).iter_ones().collect();
        let after: Vec<usize> = liveness.after_use(index).iter_ones().collect();
        println!("  bc {index}: before_use {before:?}  after_use {after:?}");
    }
}

fn run_proto(cr: &mut Coroutine, proto: &Rc<FunctionPrototype>, label: &str) {
    let code_block = proto.code_block_for(cr.global_object);
    let func = cr.heap.alloc(FunctionObject::from_code_block(code_block, vec![]));
    match cr.call_root(TValue::from_ptr(func), &[]) {
        Ok(rets) => println!("{label}: {:?}", rets.first()),
        Err(err) => eprintln!("{label}: error: {err}"),
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut heap = Heap::new();
    let global = heap.alloc(TableObject::new());
    let mut cr = Coroutine::new(heap, global, 64 * 1024);

    let add2_name = cr.heap.intern("add2");
    {
        // SAFETY: the global table is live for the whole program.
        let globals = unsafe { &mut *global };
        let ic = globals.prepare_put_by_id(add2_name);
        let f = cr.heap.alloc(FunctionObject::native(native_add2));
        globals.put_by_id(add2_name, ic, TValue::from_ptr(f));
    }

    let add = build_add();
    let looped = build_loop(cli.limit);
    let call = build_call(0, vec![TValue::from_ptr(add2_name)]);

    if cli.dump_bytecode {
        for (label, proto) in [("add", &add), ("loop", &looped), ("call", &call)] {
            println!("-- {label} --");
            print!("{}", BytecodeDecoder::for_prototype(proto).disassemble());
        }
    }

    if cli.liveness {
        // the loop program's shape is known by construction: one block for
        // the loop body, one for the terminal return
        let decoder = BytecodeDecoder::for_prototype(&looped);
        let offsets = decoder.instruction_offsets();
        let control_flow = ControlFlowInfo::from_spans(
            looped.num_locals as usize,
            &[
                (0, offsets[0], offsets[2], 3),
                (3, offsets[3], offsets[4], 2),
                (5, offsets[5], offsets[5], 1),
            ],
            &[vec![1], vec![1, 2], vec![]],
        );
        println!("-- loop liveness --");
        print_liveness(&looped, &control_flow);
    }

    run_proto(&mut cr, &add, "add");
    run_proto(&mut cr, &looped, "loop");
    run_proto(&mut cr, &call, "call");
}

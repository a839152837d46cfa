//! The bytecode layer: operand slots, the opcode set and its packed
//! instruction records, the builder/decoder pair, and the executable
//! structures (`FunctionPrototype`, `CodeBlock`, `FunctionObject`) the
//! execution engine runs.

pub mod builder;
pub mod decoder;
pub mod executable;
pub mod instruction;
pub mod op;
pub mod slot;

pub use builder::{BytecodeBuilder, Label};
pub use decoder::{BytecodeDecoder, DataFlowInfo, SlotSpan};
pub use executable::{
    CallIc, CodeBlock, ExecutableCode, FunctionObject, FunctionPrototype, IcShape,
    NativeFunction, UpvalueMetadata,
};
pub use op::Op;
pub use slot::BytecodeSlot;

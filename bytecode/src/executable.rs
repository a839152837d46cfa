use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use object::{Header, ObjectType, TValue, TableObject};

/// Where a captured variable lives when a closure is created: either a
/// local of the enclosing frame, or an upvalue the enclosing closure
/// already captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueMetadata {
    pub is_parent_local: bool,
    /// Local ordinal of the parent frame, or ordinal into the parent's
    /// upvalue list.
    pub slot: u32,
}

/// How a call site consults its inline cache, fixed at specialization time.
///
/// `Hoisted` sites test the cache key before the callee type check (the
/// check is subsumed by a hit); `Checked` sites type-check first. Either
/// shape is correct for every site; the planner only picks `Hoisted` where
/// the surrounding control flow already proves the operand callable on the
/// hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IcShape {
    Hoisted,
    #[default]
    Checked,
}

/// A monomorphic call-site inline cache: the raw bits of the last callee
/// seen, and its resolved executable. Misses overwrite unconditionally.
pub struct CallIc {
    shape: IcShape,
    key: Cell<u64>,
    target: Cell<*const ExecutableCode>,
}

impl CallIc {
    pub fn new(shape: IcShape) -> Self {
        Self {
            shape,
            key: Cell::new(TValue::impossible_bits()),
            target: Cell::new(core::ptr::null()),
        }
    }

    #[inline(always)]
    pub fn shape(&self) -> IcShape {
        self.shape
    }

    /// Hit test: raw bit equality against the cached callee.
    #[inline(always)]
    pub fn is_hit(&self, callee_raw: u64) -> bool {
        self.key.get() == callee_raw
    }

    /// The cached executable. Only meaningful after [`is_hit`](Self::is_hit)
    /// returned true.
    #[inline(always)]
    pub fn target(&self) -> *const ExecutableCode {
        self.target.get()
    }

    #[inline(always)]
    pub fn update(&self, callee_raw: u64, target: *const ExecutableCode) {
        self.key.set(callee_raw);
        self.target.set(target);
    }
}

impl core::fmt::Debug for CallIc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CallIc")
            .field("shape", &self.shape)
            .field("key", &format_args!("0x{:016x}", self.key.get()))
            .finish()
    }
}

/// A builtin implemented in the host: consumes the argument window,
/// produces its return values.
pub type NativeFunction = fn(&[TValue]) -> Vec<TValue>;

/// What a function object executes: a specialized code block, or a host
/// builtin.
pub enum ExecutableCode {
    Function(Rc<CodeBlock>),
    Native(NativeFunction),
}

impl ExecutableCode {
    #[inline(always)]
    pub fn as_code_block(&self) -> Option<&Rc<CodeBlock>> {
        match self {
            ExecutableCode::Function(cb) => Some(cb),
            ExecutableCode::Native(_) => None,
        }
    }
}

/// An unlinked function: the bytecode and everything shared between all
/// instantiations, independent of any global object.
pub struct FunctionPrototype {
    pub bytecode: Vec<u8>,
    pub constants: Vec<TValue>,
    pub num_locals: u32,
    pub num_fixed_args: u32,
    pub accepts_variadic_args: bool,
    pub num_call_sites: u32,
    /// Per-call-site cache shape; sites past the end default to `Checked`.
    pub call_site_shapes: Vec<IcShape>,
    /// Captures performed when this prototype is instantiated.
    pub upvalues: Vec<UpvalueMetadata>,
    /// Prototypes instantiated by `NewClosure` in this function's body.
    pub child_protos: Vec<Rc<FunctionPrototype>>,
    code_blocks: RefCell<CodeBlockCache>,
}

/// Almost every prototype only ever runs under one global object, so the
/// cache keeps that one inline and spills the rest to a map.
#[derive(Default)]
struct CodeBlockCache {
    default_global: Option<(usize, Rc<CodeBlock>)>,
    rare: HashMap<usize, Rc<CodeBlock>>,
}

impl FunctionPrototype {
    pub fn new(
        bytecode: Vec<u8>,
        constants: Vec<TValue>,
        num_locals: u32,
        num_fixed_args: u32,
    ) -> Self {
        Self {
            bytecode,
            constants,
            num_locals,
            num_fixed_args,
            accepts_variadic_args: false,
            num_call_sites: 0,
            call_site_shapes: Vec::new(),
            upvalues: Vec::new(),
            child_protos: Vec::new(),
            code_blocks: RefCell::new(CodeBlockCache::default()),
        }
    }

    /// The code block specializing this prototype for `global`, creating it
    /// on first use.
    pub fn code_block_for(self: &Rc<Self>, global: *mut TableObject) -> Rc<CodeBlock> {
        let key = global as usize;
        let mut cache = self.code_blocks.borrow_mut();
        match &cache.default_global {
            None => {
                let cb = Rc::new(CodeBlock::specialize(self, global));
                cache.default_global = Some((key, cb.clone()));
                cb
            }
            Some((default_key, cb)) if *default_key == key => cb.clone(),
            Some(_) => {
                if let Some(cb) = cache.rare.get(&key) {
                    return cb.clone();
                }
                let cb = Rc::new(CodeBlock::specialize(self, global));
                cache.rare.insert(key, cb.clone());
                cb
            }
        }
    }
}

/// A prototype specialized for one global object: its own copy of the
/// instruction stream and constants, plus one [`CallIc`] per call site.
/// Immutable after creation except for the cache cells.
pub struct CodeBlock {
    pub prototype: Rc<FunctionPrototype>,
    pub global_object: *mut TableObject,
    pub bytecode: Vec<u8>,
    pub constants: Vec<TValue>,
    pub num_locals: u32,
    pub call_ics: Vec<CallIc>,
}

impl CodeBlock {
    fn specialize(prototype: &Rc<FunctionPrototype>, global: *mut TableObject) -> Self {
        let call_ics = (0..prototype.num_call_sites as usize)
            .map(|site| {
                let shape = prototype
                    .call_site_shapes
                    .get(site)
                    .copied()
                    .unwrap_or_default();
                CallIc::new(shape)
            })
            .collect();
        Self {
            prototype: prototype.clone(),
            global_object: global,
            bytecode: prototype.bytecode.clone(),
            constants: prototype.constants.clone(),
            num_locals: prototype.num_locals,
            call_ics,
        }
    }
}

/// A runtime closure: the header makes it a heap object, the executable
/// says what runs, the upvalues hold the captured environment.
#[repr(C)]
pub struct FunctionObject {
    pub header: Header,
    pub executable: ExecutableCode,
    pub upvalues: Vec<TValue>,
}

impl FunctionObject {
    pub fn from_code_block(code_block: Rc<CodeBlock>, upvalues: Vec<TValue>) -> Self {
        Self {
            header: Header::new(ObjectType::Function),
            executable: ExecutableCode::Function(code_block),
            upvalues,
        }
    }

    pub fn native(f: NativeFunction) -> Self {
        Self {
            header: Header::new(ObjectType::Function),
            executable: ExecutableCode::Native(f),
            upvalues: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_proto() -> Rc<FunctionPrototype> {
        Rc::new(FunctionPrototype::new(vec![], vec![], 4, 0))
    }

    #[test]
    fn code_block_cache_default_and_rare() {
        let proto = tiny_proto();
        let mut g1 = TableObject::new();
        let mut g2 = TableObject::new();

        let a = proto.code_block_for(&mut g1);
        let b = proto.code_block_for(&mut g1);
        assert!(Rc::ptr_eq(&a, &b));

        let c = proto.code_block_for(&mut g2);
        assert!(!Rc::ptr_eq(&a, &c));
        let d = proto.code_block_for(&mut g2);
        assert!(Rc::ptr_eq(&c, &d));

        // the default entry is still intact
        let e = proto.code_block_for(&mut g1);
        assert!(Rc::ptr_eq(&a, &e));
    }

    #[test]
    fn call_ic_starts_empty_and_overwrites() {
        let ic = CallIc::new(IcShape::Checked);
        assert!(!ic.is_hit(TValue::nil().raw()));
        assert!(!ic.is_hit(0));

        let target_a = 0x1000 as *const ExecutableCode;
        let target_b = 0x2000 as *const ExecutableCode;
        ic.update(17, target_a);
        assert!(ic.is_hit(17));
        assert_eq!(ic.target(), target_a);

        ic.update(99, target_b);
        assert!(!ic.is_hit(17));
        assert!(ic.is_hit(99));
        assert_eq!(ic.target(), target_b);
    }

    #[test]
    fn specialization_honors_site_shapes() {
        let mut proto = FunctionPrototype::new(vec![], vec![], 2, 0);
        proto.num_call_sites = 3;
        proto.call_site_shapes = vec![IcShape::Hoisted, IcShape::Checked];
        let proto = Rc::new(proto);
        let mut global = TableObject::new();
        let cb = proto.code_block_for(&mut global);
        assert_eq!(cb.call_ics.len(), 3);
        assert_eq!(cb.call_ics[0].shape(), IcShape::Hoisted);
        assert_eq!(cb.call_ics[1].shape(), IcShape::Checked);
        assert_eq!(cb.call_ics[2].shape(), IcShape::Checked);
    }
}

use std::any::Any;
use std::collections::HashMap;

use crate::header::{Header, HeaderFlags, ObjectType};

/// An interned heap string. Property names are always interned, so name
/// equality anywhere in the runtime is pointer equality.
#[repr(C)]
pub struct StringObject {
    pub header: Header,
    data: Box<str>,
}

impl StringObject {
    #[inline(always)]
    pub fn as_str(&self) -> &str {
        &self.data
    }
}

impl core::fmt::Debug for StringObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "StringObject({:?})", self.as_str())
    }
}

/// The allocator behind all heap objects.
///
/// Objects live in individually boxed cells, so the raw pointers handed out
/// stay valid for the lifetime of the heap no matter how many allocations
/// follow. Collection is out of scope here; a real collector only needs the
/// [`Header`] layout to agree.
#[derive(Default)]
pub struct Heap {
    cells: Vec<Box<dyn Any>>,
    intern_table: HashMap<Box<str>, *const StringObject>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `obj` and return a stable raw pointer to it.
    pub fn alloc<T: 'static>(&mut self, obj: T) -> *mut T {
        let mut cell = Box::new(obj);
        let ptr = &mut *cell as *mut T;
        self.cells.push(cell);
        ptr
    }

    /// Intern `s`, returning the canonical [`StringObject`] for it.
    pub fn intern(&mut self, s: &str) -> *const StringObject {
        if let Some(&ptr) = self.intern_table.get(s) {
            return ptr;
        }
        let header = Header::new(ObjectType::Str);
        header.add_flag(HeaderFlags::INTERNED);
        let ptr = self.alloc(StringObject {
            header,
            data: s.into(),
        }) as *const StringObject;
        self.intern_table.insert(s.into(), ptr);
        ptr
    }

    pub fn num_objects(&self) -> usize {
        self.cells.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_canonical() {
        let mut heap = Heap::new();
        let a = heap.intern("x");
        let b = heap.intern("y");
        let c = heap.intern("x");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(unsafe { (*a).as_str() }, "x");
        assert!(unsafe { (*a).header.has_flag(HeaderFlags::INTERNED) });
    }

    #[test]
    fn alloc_pointers_survive_growth() {
        let mut heap = Heap::new();
        let first = heap.alloc(123u64);
        for i in 0..1000u64 {
            heap.alloc(i);
        }
        assert_eq!(unsafe { *first }, 123);
    }
}

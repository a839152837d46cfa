use crate::header::{Header, ObjectType};
use crate::heap::StringObject;
use crate::value::TValue;

/// Result of preparing a property read. Everything the actual read needs is
/// captured here, so the execution engine can cache the descriptor and
/// replay [`TableObject::get_by_id`] without repeating the lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetByIdIcInfo {
    /// Property slot ordinal, or `None` when the property is absent
    /// (the read then yields nil).
    pub slot: Option<u32>,
}

/// Result of preparing a property write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutByIdIcInfo {
    pub slot: u32,
    /// The write adds the property rather than overwriting an existing slot.
    pub is_transition: bool,
}

/// Result of preparing an indexed read: a snapshot of the dense part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetByIntegerIcInfo {
    pub dense_len: u32,
}

/// A dynamic table: named properties in insertion-ordered slots plus a
/// dense 1-based integer-indexed part.
///
/// Property names are interned strings, so the slot lookup compares
/// pointers only. Every access goes through a `prepare_*` step that fills
/// an IC descriptor and a second step that performs the access through the
/// descriptor; this split is what lets call sites cache the first half.
#[repr(C)]
pub struct TableObject {
    pub header: Header,
    keys: Vec<*const StringObject>,
    named: Vec<TValue>,
    indexed: Vec<TValue>,
}

impl TableObject {
    pub fn new() -> Self {
        Self {
            header: Header::new(ObjectType::Table),
            keys: Vec::new(),
            named: Vec::new(),
            indexed: Vec::new(),
        }
    }

    // ── named properties ───────────────────────────────────────────

    pub fn prepare_get_by_id(&self, name: *const StringObject) -> GetByIdIcInfo {
        let slot = self
            .keys
            .iter()
            .position(|&k| k == name)
            .map(|ord| ord as u32);
        GetByIdIcInfo { slot }
    }

    #[inline(always)]
    pub fn get_by_id(&self, ic: GetByIdIcInfo) -> TValue {
        match ic.slot {
            Some(slot) => self.named[slot as usize],
            None => TValue::nil(),
        }
    }

    pub fn prepare_put_by_id(&self, name: *const StringObject) -> PutByIdIcInfo {
        match self.keys.iter().position(|&k| k == name) {
            Some(ord) => PutByIdIcInfo {
                slot: ord as u32,
                is_transition: false,
            },
            None => PutByIdIcInfo {
                slot: self.keys.len() as u32,
                is_transition: true,
            },
        }
    }

    pub fn put_by_id(&mut self, name: *const StringObject, ic: PutByIdIcInfo, value: TValue) {
        if ic.is_transition {
            debug_assert_eq!(ic.slot as usize, self.keys.len());
            self.keys.push(name);
            self.named.push(value);
        } else {
            self.named[ic.slot as usize] = value;
        }
    }

    // ── indexed properties ─────────────────────────────────────────

    pub fn prepare_get_by_integer_index(&self) -> GetByIntegerIcInfo {
        GetByIntegerIcInfo {
            dense_len: self.indexed.len() as u32,
        }
    }

    /// Indices run from 1; anything outside the dense part reads as nil.
    #[inline(always)]
    pub fn get_by_integer_index(&self, index: i32, ic: GetByIntegerIcInfo) -> TValue {
        if index >= 1 && (index as u32) <= ic.dense_len {
            self.indexed[index as usize - 1]
        } else {
            TValue::nil()
        }
    }

    /// Double keys take the integer path when they represent an exact
    /// integer; non-integral keys read as nil.
    #[inline(always)]
    pub fn get_by_double_index(&self, index: f64, ic: GetByIntegerIcInfo) -> TValue {
        let as_int = index as i32;
        if as_int as f64 == index {
            self.get_by_integer_index(as_int, ic)
        } else {
            TValue::nil()
        }
    }

    pub fn put_by_integer_index(&mut self, index: i32, value: TValue) {
        assert!(index >= 1, "indexed part starts at 1, got {index}");
        let ord = index as usize - 1;
        if ord >= self.indexed.len() {
            self.indexed.resize(ord + 1, TValue::nil());
        }
        self.indexed[ord] = value;
    }

    pub fn put_by_double_index(&mut self, index: f64, value: TValue) {
        let as_int = index as i32;
        assert!(
            as_int as f64 == index,
            "non-integral table key: {index}"
        );
        self.put_by_integer_index(as_int, value);
    }

    pub fn num_named_properties(&self) -> usize {
        self.keys.len()
    }
}

impl Default for TableObject {
    fn default() -> Self {
        Self::new()
    }
}

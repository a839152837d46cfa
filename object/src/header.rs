use std::sync::atomic::{AtomicU8, Ordering};

use bitflags::bitflags;

/// Object type tag stored in bits 2..7 of the header's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectType {
    Table = 0,
    Function,
    Str,
}

impl ObjectType {
    pub const COUNT: usize = Self::Str as usize + 1;
}

bitflags! {
    /// GC / bookkeeping flags stored atomically in the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        const REMEMBERED = 1 << 0;
        const PINNED = 1 << 1;
        const INTERNED = 1 << 2;
    }
}

const HEADER_TAG: u8 = 0b11;

/// The 8-byte header at the start of every heap object.
///
/// ```text
/// byte 0:    [tag:2 = 0b11] [object_type:6]
/// byte 1:    flags (atomic): Remembered | Pinned | Interned
/// byte 2:    age   (atomic): GC generation counter
/// bytes 3‥7: reserved (zero)
/// ```
///
/// The collector itself is external to this crate; the header only fixes
/// the layout that collector and interpreter agree on.
#[repr(C)]
pub struct Header {
    tag_and_type: u8,
    flags: AtomicU8,
    age: AtomicU8,
    _reserved: [u8; 5],
}

const _: () = assert!(size_of::<Header>() == 8);

impl Header {
    pub fn new(object_type: ObjectType) -> Self {
        Self {
            tag_and_type: ((object_type as u8) << 2) | HEADER_TAG,
            flags: AtomicU8::new(0),
            age: AtomicU8::new(0),
            _reserved: [0; 5],
        }
    }

    #[inline(always)]
    pub fn object_type(&self) -> ObjectType {
        let raw = self.tag_and_type >> 2;
        debug_assert!((raw as usize) < ObjectType::COUNT);
        // SAFETY: ObjectType is repr(u8) with contiguous variants from 0,
        // and the constructor only ever stores valid type tags.
        unsafe { core::mem::transmute::<u8, ObjectType>(raw) }
    }

    #[inline(always)]
    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed))
    }

    #[inline(always)]
    pub fn has_flag(&self, flag: HeaderFlags) -> bool {
        self.flags().contains(flag)
    }

    #[inline(always)]
    pub fn add_flag(&self, flag: HeaderFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn remove_flag(&self, flag: HeaderFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn age(&self) -> u8 {
        self.age.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn set_age(&self, age: u8) {
        self.age.store(age, Ordering::Relaxed);
    }
}

impl core::fmt::Debug for Header {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Header")
            .field("type", &self.object_type())
            .field("flags", &self.flags())
            .field("age", &self.age())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tag_roundtrip() {
        for ty in [ObjectType::Table, ObjectType::Function, ObjectType::Str] {
            assert_eq!(Header::new(ty).object_type(), ty);
        }
    }

    #[test]
    fn flags_and_age() {
        let h = Header::new(ObjectType::Table);
        assert!(!h.has_flag(HeaderFlags::PINNED));
        h.add_flag(HeaderFlags::PINNED);
        h.add_flag(HeaderFlags::INTERNED);
        assert!(h.has_flag(HeaderFlags::PINNED));
        h.remove_flag(HeaderFlags::PINNED);
        assert!(!h.has_flag(HeaderFlags::PINNED));
        assert!(h.has_flag(HeaderFlags::INTERNED));
        h.set_age(3);
        assert_eq!(h.age(), 3);
    }
}

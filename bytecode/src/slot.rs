const INVALID: i32 = 0x7fff_ffff;

/// An operand slot: a local ordinal (`>= 0`), a constant-table ordinal
/// (encoded negative), or the invalid sentinel.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct BytecodeSlot(i32);

impl BytecodeSlot {
    #[inline(always)]
    pub const fn invalid() -> Self {
        Self(INVALID)
    }

    #[inline(always)]
    pub const fn local(ord: u32) -> Self {
        Self(ord as i32)
    }

    /// Constant ordinal `ord` is stored as `-(ord + 1)`.
    #[inline(always)]
    pub const fn constant(ord: u32) -> Self {
        Self(-(ord as i32) - 1)
    }

    #[inline(always)]
    pub const fn is_invalid(self) -> bool {
        self.0 == INVALID
    }

    #[inline(always)]
    pub const fn is_local(self) -> bool {
        self.0 >= 0 && self.0 != INVALID
    }

    #[inline(always)]
    pub const fn is_constant(self) -> bool {
        self.0 < 0
    }

    #[inline(always)]
    pub fn local_ord(self) -> usize {
        debug_assert!(self.is_local());
        self.0 as usize
    }

    #[inline(always)]
    pub fn constant_ord(self) -> usize {
        debug_assert!(self.is_constant());
        (-self.0 - 1) as usize
    }
}

impl core::fmt::Debug for BytecodeSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_invalid() {
            write!(f, "Slot(invalid)")
        } else if self.is_local() {
            write!(f, "Local({})", self.0)
        } else {
            write!(f, "Const({})", self.constant_ord())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_and_constant_are_disjoint() {
        let l = BytecodeSlot::local(0);
        let c = BytecodeSlot::constant(0);
        assert!(l.is_local() && !l.is_constant() && !l.is_invalid());
        assert!(c.is_constant() && !c.is_local() && !c.is_invalid());
        assert_eq!(l.local_ord(), 0);
        assert_eq!(c.constant_ord(), 0);
    }

    #[test]
    fn ordinals_roundtrip() {
        for ord in [0u32, 1, 7, 255, 65535] {
            assert_eq!(BytecodeSlot::local(ord).local_ord(), ord as usize);
            assert_eq!(BytecodeSlot::constant(ord).constant_ord(), ord as usize);
        }
    }

    #[test]
    fn invalid_sentinel() {
        let s = BytecodeSlot::invalid();
        assert!(s.is_invalid());
        assert!(!s.is_local());
        assert!(!s.is_constant());
    }
}

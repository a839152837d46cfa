/// Tag constants: the top 16 bits of the encoded word.
const TAG_SHIFT: u32 = 48;
const POINTER_TAG: u64 = 0xFFFA;
const INT32_TAG: u64 = 0xFFFB;
const MIV_TAG: u64 = 0xFFFC;

const PAYLOAD_MASK: u64 = (1 << TAG_SHIFT) - 1;

/// All NaNs produced by arithmetic are rewritten to this pattern so that
/// no live double ever collides with the tag space above.
const CANONICAL_NAN: u64 = 0x7FF8_0000_0000_0000;

const MIV_NIL: u64 = 0;
const MIV_FALSE: u64 = 1;
const MIV_TRUE: u64 = 2;

/// A NaN-boxed 64-bit dynamic value.
///
/// Encoding (top 16 bits):
/// - **Double**:  any pattern outside `0xFFFA..=0xFFFC`: the IEEE-754 bits
///   verbatim, with NaNs canonicalized on construction.
/// - **Pointer**: `0xFFFA`, 48-bit heap address in the payload.
/// - **Int32**:   `0xFFFB`, the `i32` bits in the low payload.
/// - **MIV**:     `0xFFFC`, miscellaneous immediate: nil (0), false (1),
///   true (2).
///
/// Two values are the same dynamic value iff their raw bit patterns are
/// equal; [`TValue::raw`] exposes the pattern for inline-cache key
/// comparisons.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct TValue(u64);

impl TValue {
    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// A bit pattern no constructible value carries. Used as the empty
    /// inline-cache key so the first comparison at a call site always misses.
    #[inline(always)]
    pub const fn impossible_bits() -> u64 {
        (MIV_TAG << TAG_SHIFT) | 0xFFFF_FFFF
    }

    #[inline(always)]
    const fn tag(self) -> u64 {
        self.0 >> TAG_SHIFT
    }

    // ── Double ─────────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_double(self) -> bool {
        self.tag() < POINTER_TAG || self.tag() > MIV_TAG
    }

    #[inline(always)]
    pub fn from_f64(n: f64) -> Self {
        if n.is_nan() {
            Self(CANONICAL_NAN)
        } else {
            Self(n.to_bits())
        }
    }

    /// # Safety
    ///
    /// The value must be a double.
    #[inline(always)]
    pub unsafe fn as_f64(self) -> f64 {
        debug_assert!(self.is_double());
        f64::from_bits(self.0)
    }

    // ── Int32 ──────────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_int32(self) -> bool {
        self.tag() == INT32_TAG
    }

    #[inline(always)]
    pub const fn from_i32(n: i32) -> Self {
        Self((INT32_TAG << TAG_SHIFT) | (n as u32 as u64))
    }

    /// # Safety
    ///
    /// The value must be an int32.
    #[inline(always)]
    pub unsafe fn as_i32(self) -> i32 {
        debug_assert!(self.is_int32());
        self.0 as u32 as i32
    }

    // ── Pointer ────────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_pointer(self) -> bool {
        self.tag() == POINTER_TAG
    }

    #[inline(always)]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        let addr = ptr as u64;
        debug_assert!(addr & !PAYLOAD_MASK == 0, "address exceeds 48 bits");
        Self((POINTER_TAG << TAG_SHIFT) | addr)
    }

    /// # Safety
    ///
    /// The value must be a pointer.
    #[inline(always)]
    pub unsafe fn as_ptr<T>(self) -> *mut T {
        debug_assert!(self.is_pointer());
        (self.0 & PAYLOAD_MASK) as *mut T
    }

    /// # Safety
    ///
    /// The value must be a pointer to a valid, live `T`.
    #[inline(always)]
    pub unsafe fn as_obj<'a, T>(self) -> &'a T {
        unsafe { &*self.as_ptr::<T>() }
    }

    /// # Safety
    ///
    /// The value must be a pointer to a valid, live `T`, and no other
    /// references to it may exist.
    #[inline(always)]
    pub unsafe fn as_obj_mut<'a, T>(self) -> &'a mut T {
        unsafe { &mut *self.as_ptr::<T>() }
    }

    // ── MIV ────────────────────────────────────────────────────────

    #[inline(always)]
    pub const fn nil() -> Self {
        Self((MIV_TAG << TAG_SHIFT) | MIV_NIL)
    }

    #[inline(always)]
    pub const fn from_bool(b: bool) -> Self {
        Self((MIV_TAG << TAG_SHIFT) | if b { MIV_TRUE } else { MIV_FALSE })
    }

    #[inline(always)]
    pub const fn is_miv(self) -> bool {
        self.tag() == MIV_TAG
    }

    #[inline(always)]
    pub const fn is_nil(self) -> bool {
        self.0 == Self::nil().0
    }

    #[inline(always)]
    pub const fn is_bool(self) -> bool {
        self.is_miv() && matches!(self.0 & PAYLOAD_MASK, MIV_FALSE | MIV_TRUE)
    }

    /// # Safety
    ///
    /// The value must be true or false.
    #[inline(always)]
    pub unsafe fn as_bool(self) -> bool {
        debug_assert!(self.is_bool());
        (self.0 & PAYLOAD_MASK) == MIV_TRUE
    }
}

impl core::fmt::Debug for TValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_double() {
            write!(f, "Double({})", unsafe { self.as_f64() })
        } else if self.is_int32() {
            write!(f, "Int32({})", unsafe { self.as_i32() })
        } else if self.is_pointer() {
            write!(f, "Ptr(0x{:x})", self.0 & PAYLOAD_MASK)
        } else {
            match self.0 & PAYLOAD_MASK {
                MIV_NIL => write!(f, "Nil"),
                MIV_FALSE => write!(f, "False"),
                MIV_TRUE => write!(f, "True"),
                other => write!(f, "Miv({other})"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_roundtrip() {
        for n in [0.0, -0.0, 1.5, -123.25, f64::INFINITY, f64::NEG_INFINITY] {
            let v = TValue::from_f64(n);
            assert!(v.is_double());
            assert!(!v.is_int32() && !v.is_pointer() && !v.is_miv());
            assert_eq!(unsafe { v.as_f64() }.to_bits(), n.to_bits());
        }
    }

    #[test]
    fn nan_is_canonicalized() {
        let payload_nan = f64::from_bits(0xFFFB_DEAD_BEEF_0001);
        assert!(payload_nan.is_nan());
        let v = TValue::from_f64(payload_nan);
        assert!(v.is_double());
        assert_eq!(v.raw(), 0x7FF8_0000_0000_0000);
    }

    #[test]
    fn int32_roundtrip() {
        for n in [0, 1, -1, i32::MIN, i32::MAX] {
            let v = TValue::from_i32(n);
            assert!(v.is_int32());
            assert!(!v.is_double());
            assert_eq!(unsafe { v.as_i32() }, n);
        }
    }

    #[test]
    fn pointer_roundtrip() {
        let x = 42u64;
        let v = TValue::from_ptr(&x);
        assert!(v.is_pointer());
        assert!(!v.is_double());
        assert_eq!(unsafe { v.as_ptr::<u64>() }, &x as *const u64 as *mut u64);
    }

    #[test]
    fn mivs_are_distinct() {
        let nil = TValue::nil();
        let t = TValue::from_bool(true);
        let f = TValue::from_bool(false);
        assert!(nil.is_nil() && !nil.is_bool());
        assert!(t.is_bool() && unsafe { t.as_bool() });
        assert!(f.is_bool() && !unsafe { f.as_bool() });
        assert_ne!(nil.raw(), t.raw());
        assert_ne!(t.raw(), f.raw());
    }

    #[test]
    fn raw_equality_is_identity() {
        assert_eq!(TValue::from_f64(2.5), TValue::from_f64(2.5));
        assert_ne!(TValue::from_i32(1).raw(), TValue::from_f64(1.0).raw());
    }

    #[test]
    fn impossible_bits_never_constructible() {
        let bits = TValue::impossible_bits();
        assert_ne!(TValue::nil().raw(), bits);
        assert_ne!(TValue::from_bool(false).raw(), bits);
        assert_ne!(TValue::from_bool(true).raw(), bits);
        let v = TValue::from_raw(bits);
        assert!(v.is_miv() && !v.is_nil() && !v.is_bool());
    }
}

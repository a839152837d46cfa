/// A fixed-length bit vector over `u64` words.
///
/// Bits past `len` in the last word are kept zero by every operation, so
/// word-level comparisons and the mask formula in the liveness analysis
/// never see stray tail bits.
#[derive(Clone, PartialEq, Eq)]
pub struct BitVector {
    words: Box<[u64]>,
    len: usize,
}

impl BitVector {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)].into_boxed_slice(),
            len,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    #[inline(always)]
    pub fn words_mut(&mut self) -> &mut [u64] {
        &mut self.words
    }

    #[inline(always)]
    pub fn test(&self, bit: usize) -> bool {
        debug_assert!(bit < self.len);
        self.words[bit / 64] & (1u64 << (bit % 64)) != 0
    }

    #[inline(always)]
    pub fn set(&mut self, bit: usize) {
        debug_assert!(bit < self.len);
        self.words[bit / 64] |= 1u64 << (bit % 64);
    }

    #[inline(always)]
    pub fn clear(&mut self, bit: usize) {
        debug_assert!(bit < self.len);
        self.words[bit / 64] &= !(1u64 << (bit % 64));
    }

    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Set every bit below `len` (tail bits of the last word stay zero).
    pub fn set_all(&mut self) {
        self.words.fill(u64::MAX);
        let tail = self.len % 64;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last = (1u64 << tail) - 1;
            }
        } else if self.len == 0 {
            self.words.fill(0);
        }
    }

    pub fn copy_from(&mut self, other: &BitVector) {
        debug_assert_eq!(self.len, other.len);
        self.words.copy_from_slice(&other.words);
    }

    pub fn or_from(&mut self, other: &BitVector) {
        debug_assert_eq!(self.len, other.len);
        for (dst, src) in self.words.iter_mut().zip(other.words.iter()) {
            *dst |= src;
        }
    }

    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|&bit| self.test(bit))
    }
}

impl core::fmt::Debug for BitVector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter_ones()).finish()
    }
}

/// Replace `bv` with `copy_from`, which must be a superset of `bv`
/// (asserted in debug builds). Returns whether the value changed.
#[must_use]
pub fn update_after_monotonic_propagation(bv: &mut BitVector, copy_from: &BitVector) -> bool {
    debug_assert_eq!(bv.len(), copy_from.len());
    let mut changed = false;
    for (dst, &src) in bv.words.iter_mut().zip(copy_from.words.iter()) {
        debug_assert_eq!(*dst & src, *dst, "propagation shrank a liveness set");
        changed |= *dst != src;
        *dst = src;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_test_clear() {
        let mut bv = BitVector::new(130);
        assert!(!bv.test(0) && !bv.test(129));
        bv.set(0);
        bv.set(64);
        bv.set(129);
        assert!(bv.test(0) && bv.test(64) && bv.test(129));
        assert!(!bv.test(1) && !bv.test(65) && !bv.test(128));
        bv.clear(64);
        assert!(!bv.test(64));
        assert_eq!(bv.iter_ones().collect::<Vec<_>>(), vec![0, 129]);
    }

    #[test]
    fn set_all_masks_tail_bits() {
        for len in [1usize, 63, 64, 65, 127, 128, 130] {
            let mut bv = BitVector::new(len);
            bv.set_all();
            assert_eq!(bv.iter_ones().count(), len);
            let expected_ones: u32 = bv.words().iter().map(|w| w.count_ones()).sum();
            assert_eq!(expected_ones as usize, len);
        }
    }

    #[test]
    fn or_and_copy() {
        let mut a = BitVector::new(70);
        let mut b = BitVector::new(70);
        a.set(3);
        b.set(69);
        a.or_from(&b);
        assert!(a.test(3) && a.test(69));
        let mut c = BitVector::new(70);
        c.copy_from(&a);
        assert_eq!(c, a);
    }

    #[test]
    fn monotonic_update_reports_change() {
        let mut bv = BitVector::new(8);
        bv.set(1);
        let mut bigger = bv.clone();
        bigger.set(5);
        assert!(update_after_monotonic_propagation(&mut bv, &bigger));
        assert!(!update_after_monotonic_propagation(&mut bv, &bigger));
        assert!(bv.test(1) && bv.test(5));
    }

    #[test]
    #[should_panic(expected = "propagation shrank")]
    #[cfg(debug_assertions)]
    fn monotonic_update_asserts_superset() {
        let mut bv = BitVector::new(8);
        bv.set(1);
        let empty = BitVector::new(8);
        let _ = update_after_monotonic_propagation(&mut bv, &empty);
    }
}

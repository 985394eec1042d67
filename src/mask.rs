//! Resource territory bitsets.
//!
//! A [`DependencyMask`] marks which resource identifiers (component types,
//! buffers, anything the host chooses to number) a job touches. The planner
//! only ever needs three things from it: set a bit, merge two masks, and ask
//! whether two masks overlap. All of them are a handful of word-wide
//! instructions on a 32-byte value.

/// Number of distinct resource identifiers a mask can describe.
pub const MASK_BITS: usize = 256;

const WORDS: usize = MASK_BITS / 64;

/// Fixed-width 256-bit set of resource identifiers.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DependencyMask {
    words: [u64; WORDS],
}

impl DependencyMask {
    /// An empty mask.
    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Builds a mask from a list of resource indices. Out-of-range indices are ignored.
    pub fn from_indices<I: IntoIterator<Item = usize>>(indices: I) -> Self {
        let mut mask = Self::new();
        for index in indices {
            mask.set(index);
        }
        mask
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, index: usize) -> Self {
        self.set(index);
        self
    }

    /// Marks `index`. Indices `>= 256` are a no-op so declarations can never
    /// fault on the hot path.
    #[inline]
    pub fn set(&mut self, index: usize) {
        if index >= MASK_BITS {
            return;
        }
        self.words[index / 64] |= 1u64 << (index % 64);
    }

    /// Whether `index` is marked.
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index < MASK_BITS && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Bitwise OR of `other` into `self`.
    #[inline]
    pub fn union(&mut self, other: &DependencyMask) {
        self.words[0] |= other.words[0];
        self.words[1] |= other.words[1];
        self.words[2] |= other.words[2];
        self.words[3] |= other.words[3];
    }

    /// True iff the two masks share at least one set bit.
    #[inline]
    pub fn conflicts(&self, other: &DependencyMask) -> bool {
        ((self.words[0] & other.words[0])
            | (self.words[1] & other.words[1])
            | (self.words[2] & other.words[2])
            | (self.words[3] & other.words[3]))
            != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    #[inline]
    pub fn clear(&mut self) {
        self.words = [0; WORDS];
    }

    /// Number of marked resources.
    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }
}

impl std::fmt::Debug for DependencyMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries((0..MASK_BITS).filter(|&i| self.contains(i)))
            .finish()
    }
}

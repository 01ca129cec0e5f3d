//! Growable bitset used for presence tracking.

/// Bits packed into `u64` words, little bit first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitset {
    words: Vec<u64>,
}

impl Bitset {
    /// Create a bitset able to hold `bits` bits without growing.
    pub fn with_len(bits: usize) -> Self {
        Self {
            words: vec![0; bits.div_ceil(64)],
        }
    }

    /// Wrap previously serialized words.
    pub const fn from_words(words: Vec<u64>) -> Self {
        Self { words }
    }

    /// Test a bit. Bits beyond the current length read as unset.
    #[inline]
    pub fn contains(&self, bit: usize) -> bool {
        self.words
            .get(bit >> 6)
            .is_some_and(|word| word & (1 << (bit & 63)) != 0)
    }

    /// Set a bit, growing as needed. Returns true if it was previously unset.
    #[inline]
    pub fn insert(&mut self, bit: usize) -> bool {
        let word = bit >> 6;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let mask = 1 << (bit & 63);
        let was_set = self.words[word] & mask != 0;
        self.words[word] |= mask;
        !was_set
    }

    /// Grow to hold at least `bits` bits.
    pub fn reserve_bits(&mut self, bits: usize) {
        let words = bits.div_ceil(64);
        if words > self.words.len() {
            self.words.resize(words, 0);
        }
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }

    /// Bytes of heap memory held.
    pub fn heap_bytes(&self) -> u64 {
        (self.words.capacity() * std::mem::size_of::<u64>()) as u64
    }

    /// Raw words, for serialization.
    pub fn words(&self) -> &[u64] {
        &self.words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_contains() {
        let mut bits = Bitset::default();
        assert!(!bits.contains(0));
        assert!(bits.insert(0));
        assert!(!bits.insert(0));
        assert!(bits.insert(130));
        assert!(bits.contains(130));
        assert!(!bits.contains(129));
        assert!(!bits.contains(100_000));
        assert_eq!(bits.count_ones(), 2);
    }

    #[test]
    fn test_from_words() {
        let bits = Bitset::from_words(vec![0b101, 1]);
        assert!(bits.contains(0));
        assert!(!bits.contains(1));
        assert!(bits.contains(2));
        assert!(bits.contains(64));
    }
}

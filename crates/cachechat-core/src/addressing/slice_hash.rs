use crate::config::ConfigError;

// Physical address bits XORed into each slice selector bit (Sandy Bridge to
// Coffee Lake, up to 8 slices).
const SELECTOR_BITS: [&[u32]; 3] = [
    &[
        6, 10, 12, 14, 16, 17, 18, 20, 22, 24, 25, 26, 27, 28, 30, 32, 33, 35, 36,
    ],
    &[
        7, 11, 13, 15, 17, 19, 20, 21, 22, 23, 24, 26, 28, 29, 31, 33, 34, 35, 37,
    ],
    &[8, 12, 13, 16, 19, 22, 23, 26, 27, 30, 31, 34, 35, 36, 37],
];

fn to_mask(bits: &[u32]) -> usize {
    bits.iter().fold(0, |mask, bit| mask | (1 << bit))
}

/// Slice selection function of a sliced last-level cache.
///
/// Selector bit `i` is the parity of `addr & masks[i]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceHash {
    masks: Vec<usize>,
}

impl SliceHash {
    /// The hash for a cache with `slices` slices (1, 2, 4 or 8).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsupportedSlices`] for any other slice count.
    pub fn for_slices(slices: usize) -> Result<Self, ConfigError> {
        let selectors = match slices {
            1 => 0,
            2 => 1,
            4 => 2,
            8 => 3,
            _ => return Err(ConfigError::UnsupportedSlices(slices)),
        };
        Ok(SliceHash {
            masks: SELECTOR_BITS[..selectors]
                .iter()
                .map(|bits| to_mask(bits))
                .collect(),
        })
    }

    /// Number of slices this hash distinguishes.
    pub fn slices(&self) -> usize {
        1 << self.masks.len()
    }

    /// Slice of the (physical) address `addr`.
    pub fn slice(&self, addr: usize) -> usize {
        self.masks
            .iter()
            .enumerate()
            .fold(0, |slice, (i, mask)| {
                slice | ((((addr & mask).count_ones() & 1) as usize) << i)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_bits() {
        let hash = SliceHash::for_slices(8).unwrap();
        assert_eq!(hash.slices(), 8);
        assert_eq!(hash.slice(0), 0);
        assert_eq!(hash.slice(1 << 6), 0b001);
        assert_eq!(hash.slice(1 << 7), 0b010);
        assert_eq!(hash.slice(1 << 8), 0b100);
        // bit 17 feeds h0 and h1, bit 12 feeds h0 and h2
        assert_eq!(hash.slice(1 << 17), 0b011);
        assert_eq!(hash.slice(1 << 12), 0b101);
        // parity cancels
        assert_eq!(hash.slice((1 << 6) | (1 << 10)), 0);
    }

    #[test]
    fn test_fewer_slices_drop_high_selectors() {
        let two = SliceHash::for_slices(2).unwrap();
        let four = SliceHash::for_slices(4).unwrap();
        let eight = SliceHash::for_slices(8).unwrap();
        for addr in (0..1usize << 24).step_by(0x1_0040) {
            assert_eq!(two.slice(addr), eight.slice(addr) & 1);
            assert_eq!(four.slice(addr), eight.slice(addr) & 3);
        }
        assert_eq!(SliceHash::for_slices(1).unwrap().slice(usize::MAX), 0);
    }

    #[test]
    fn test_unsupported() {
        assert!(SliceHash::for_slices(16).is_err());
        assert!(SliceHash::for_slices(3).is_err());
    }
}

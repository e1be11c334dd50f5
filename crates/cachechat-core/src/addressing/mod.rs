//! Construction of address sets that alias onto one cache set (and slice).
//!
//! The builder walks a region line by line, translates each address through a
//! [`VirtToPhysResolver`] and keeps those whose set index (and slice) match the
//! target. Which resolver is passed decides the addressing contract, see
//! [`Addressing`](crate::config::Addressing).

mod slice_hash;

pub use slice_hash::SliceHash;

use std::convert::Infallible;

use log::{debug, info};
use thiserror::Error;

use crate::config::{CacheGeometry, ChannelConfig, ConfigError};
use crate::memory::{BytePointer, LinuxPageMapError, VirtToPhysResolver};

/// Errors that can occur while building an address set.
#[derive(Debug, Error)]
pub enum AddressSetError {
    /// Not a single address of the region maps to the target
    #[error("no address of the region maps to set {set} (slice {slice:?})")]
    NoMatch {
        /// Target set
        set: usize,
        /// Target slice
        slice: Option<usize>,
    },
    /// Fewer matching addresses than required
    #[error("found only {found} of {required} addresses for set {set} (slice {slice:?})")]
    TooFew {
        /// Matching addresses found
        found: usize,
        /// Addresses required
        required: usize,
        /// Target set
        set: usize,
        /// Target slice
        slice: Option<usize>,
    },
    /// Address translation failed
    #[error(transparent)]
    Translation(#[from] LinuxPageMapError),
}

impl From<Infallible> for AddressSetError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

/// An ordered, fixed-size set of addresses mapping to one cache set and slice.
///
/// The pointers refer into the region the set was built from; the owner of the
/// set keeps that region alive.
#[derive(Debug)]
pub struct EvictionSet {
    addrs: Vec<*const u8>,
    set: usize,
    slice: Option<usize>,
}

impl EvictionSet {
    /// Wraps already selected addresses.
    pub fn from_addrs(addrs: Vec<*const u8>, set: usize, slice: Option<usize>) -> Self {
        EvictionSet { addrs, set, slice }
    }

    /// Number of addresses.
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Whether the set is empty. Built sets never are.
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// All addresses, in scan order.
    pub fn addrs(&self) -> &[*const u8] {
        &self.addrs
    }

    /// The first `n` addresses (all of them if the set is smaller).
    pub fn head(&self, n: usize) -> &[*const u8] {
        &self.addrs[..n.min(self.addrs.len())]
    }

    /// Target set index.
    pub fn set(&self) -> usize {
        self.set
    }

    /// Target slice, if slice-aware.
    pub fn slice(&self) -> Option<usize> {
        self.slice
    }
}

/// Selects the addresses of a region that alias onto a target set and slice.
#[derive(Clone, Debug)]
pub struct AddressSetBuilder {
    geometry: CacheGeometry,
    target_set: usize,
    slice: Option<(usize, SliceHash)>,
    min_count: usize,
    max_count: usize,
}

impl AddressSetBuilder {
    /// A builder collecting up to `geometry.ways` addresses of `target_set`,
    /// requiring at least one.
    pub fn new(geometry: CacheGeometry, target_set: usize) -> Self {
        AddressSetBuilder {
            geometry,
            target_set,
            slice: None,
            min_count: 1,
            max_count: geometry.ways,
        }
    }

    /// The builder a Prime+Probe channel needs for `config`: at least one
    /// address per way, up to `set_multiplier` times as many, slice-aware on
    /// sliced caches.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the slice count has no known hash.
    pub fn from_config(config: &ChannelConfig) -> Result<Self, ConfigError> {
        let ways = config.geometry.ways;
        let mut builder = AddressSetBuilder::new(config.geometry, config.cache_region)
            .count(ways, ways * config.set_multiplier);
        if let Some(slice) = config.slice() {
            builder = builder.slice(slice, SliceHash::for_slices(config.geometry.slices)?);
        }
        Ok(builder)
    }

    /// Only keep addresses of `slice` according to `hash`.
    pub fn slice(mut self, slice: usize, hash: SliceHash) -> Self {
        self.slice = Some((slice, hash));
        self
    }

    /// Require at least `min` and stop after `max` addresses.
    pub fn count(mut self, min: usize, max: usize) -> Self {
        self.min_count = min.max(1);
        self.max_count = max.max(self.min_count);
        self
    }

    /// Minimal region size in which the requested count can be expected.
    pub fn region_size_hint(&self) -> usize {
        let slices = self.slice.as_ref().map_or(1, |(_, hash)| hash.slices());
        // slice hashing is uniform only on average
        self.max_count * slices * 2 * self.geometry.set_stride()
    }

    fn matches(&self, phys: usize) -> bool {
        self.geometry.set_index(phys) == self.target_set
            && self
                .slice
                .as_ref()
                .is_none_or(|(slice, hash)| hash.slice(phys) == *slice)
    }

    /// Scans `region` and returns the matching addresses.
    ///
    /// # Errors
    ///
    /// Returns [`AddressSetError::NoMatch`] if nothing matches,
    /// [`AddressSetError::TooFew`] if fewer than the minimum count match, or the
    /// resolver's error if a translation fails.
    pub fn build<B, R>(&self, region: &B, resolver: &mut R) -> Result<EvictionSet, AddressSetError>
    where
        B: BytePointer + ?Sized,
        R: VirtToPhysResolver,
        AddressSetError: From<R::Error>,
    {
        let target_slice = self.slice.as_ref().map(|(slice, _)| *slice);
        debug!(
            "Scanning {} bytes at {:p} for set {} slice {:?}",
            region.len(),
            region.ptr(),
            self.target_set,
            target_slice
        );
        let mut addrs = Vec::with_capacity(self.max_count);
        for offset in (0..region.len()).step_by(self.geometry.line_size) {
            let addr = region.addr(offset);
            let phys = resolver.get_phys(addr as u64)?;
            if self.matches(phys.as_usize()) {
                addrs.push(addr);
                if addrs.len() == self.max_count {
                    break;
                }
            }
        }
        if addrs.is_empty() {
            return Err(AddressSetError::NoMatch {
                set: self.target_set,
                slice: target_slice,
            });
        }
        if addrs.len() < self.min_count {
            return Err(AddressSetError::TooFew {
                found: addrs.len(),
                required: self.min_count,
                set: self.target_set,
                slice: target_slice,
            });
        }
        info!(
            "Built address set of {} lines for set {} slice {:?}",
            addrs.len(),
            self.target_set,
            target_slice
        );
        Ok(EvictionSet::from_addrs(addrs, self.target_set, target_slice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{IdentityResolver, PhysAddr};

    const SMALL: CacheGeometry = CacheGeometry {
        line_size: 64,
        sets: 16,
        ways: 4,
        slices: 4,
    };

    #[test]
    fn test_every_address_in_target_set() -> anyhow::Result<()> {
        let region = vec![0u8; 16 * CacheGeometry::L1.set_stride()];
        let set = AddressSetBuilder::new(CacheGeometry::L1, 5).build(&region, &mut IdentityResolver)?;
        assert_eq!(set.len(), CacheGeometry::L1.ways);
        assert_eq!(set.set(), 5);
        assert_eq!(set.slice(), None);
        for &addr in set.addrs() {
            assert_eq!(CacheGeometry::L1.set_index(addr as usize), 5);
        }
        assert!(set.addrs().windows(2).all(|w| w[0] < w[1]));
        Ok(())
    }

    #[test]
    fn test_slice_aware() -> anyhow::Result<()> {
        let hash = SliceHash::for_slices(SMALL.slices)?;
        for slice in 0..SMALL.slices {
            let builder = AddressSetBuilder::new(SMALL, 3)
                .slice(slice, hash.clone())
                .count(SMALL.ways, 2 * SMALL.ways);
            let region = vec![0u8; 4 * builder.region_size_hint()];
            let set = builder.build(&region, &mut IdentityResolver)?;
            assert_eq!(set.len(), 2 * SMALL.ways);
            assert_eq!(set.slice(), Some(slice));
            for &addr in set.addrs() {
                assert_eq!(SMALL.set_index(addr as usize), 3);
                assert_eq!(hash.slice(addr as usize), slice);
            }
        }
        Ok(())
    }

    #[test]
    fn test_too_few() {
        let region = vec![0u8; 2 * CacheGeometry::L1.set_stride()];
        let res = AddressSetBuilder::new(CacheGeometry::L1, 0)
            .count(8, 8)
            .build(&region, &mut IdentityResolver);
        assert!(
            matches!(res, Err(AddressSetError::TooFew { found, required: 8, .. }) if found <= 3),
            "{:?}",
            res
        );
    }

    #[test]
    fn test_no_match() {
        let region = vec![0u8; 1];
        let set = CacheGeometry::L1.set_index(region.as_ptr() as usize);
        let res = AddressSetBuilder::new(CacheGeometry::L1, (set + 1) % 64)
            .build(&region, &mut IdentityResolver);
        assert!(matches!(res, Err(AddressSetError::NoMatch { .. })));
    }

    struct ScrambledFrames;

    impl VirtToPhysResolver for ScrambledFrames {
        type Error = Infallible;
        fn get_phys(&mut self, virt: u64) -> Result<PhysAddr, Self::Error> {
            Ok(PhysAddr::new((virt ^ (0x5 << 12)) as usize))
        }
    }

    #[test]
    fn test_physical_contract() -> anyhow::Result<()> {
        // 256 sets reach beyond the page offset, so translation changes the set
        let geometry = CacheGeometry {
            sets: 256,
            ..CacheGeometry::L1
        };
        let region = vec![0u8; 8 * geometry.set_stride()];
        let set = AddressSetBuilder::new(geometry, 17).build(&region, &mut ScrambledFrames)?;
        assert_eq!(set.len(), geometry.ways);
        for &addr in set.addrs() {
            let phys = ScrambledFrames.get_phys(addr as u64)?;
            assert_eq!(geometry.set_index(phys.as_usize()), 17);
            assert_ne!(geometry.set_index(addr as usize), 17);
        }
        Ok(())
    }

    #[test]
    fn test_from_config() -> anyhow::Result<()> {
        let config = ChannelConfig {
            geometry: CacheGeometry::LLC,
            target_slice: Some(2),
            set_multiplier: 3,
            cache_region: 7,
            ..Default::default()
        };
        let builder = AddressSetBuilder::from_config(&config)?;
        assert_eq!(builder.min_count, 16);
        assert_eq!(builder.max_count, 48);
        assert_eq!(builder.slice.as_ref().map(|(s, _)| *s), Some(2));
        assert_eq!(builder.target_set, 7);
        Ok(())
    }

    #[test]
    fn test_head() {
        let set = EvictionSet::from_addrs(vec![8 as *const u8, 16 as *const u8], 0, None);
        assert_eq!(set.head(1), &[8 as *const u8]);
        assert_eq!(set.head(5).len(), 2);
    }
}

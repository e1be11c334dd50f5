use cachechat_core::addressing::{AddressSetBuilder, AddressSetError, EvictionSet};
use cachechat_core::channel::{BitChannel, probe_decision};
use cachechat_core::classifier::{BitSample, Thresholds};
use cachechat_core::config::{Addressing, ChannelConfig, ConfigError};
use cachechat_core::memory::{
    BytePointer, CacheTimer, IdentityResolver, LinuxPageMap, LinuxPageMapError, Memory,
    MemoryError, wait_until,
};
use itertools::Itertools;
use log::{debug, info};
use thiserror::Error;

/// Errors that can occur while setting up a Prime+Probe channel.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The region could not be allocated
    #[error(transparent)]
    Memory(#[from] MemoryError),
    /// No usable eviction set in the region
    #[error(transparent)]
    AddressSet(#[from] AddressSetError),
    /// Physical address translation unavailable
    #[error(transparent)]
    PageMap(#[from] LinuxPageMapError),
}

/// Prime+Probe channel on one cache set.
///
/// The eviction set may hold several times the associativity. The sender
/// evicts with all of it; the receiver primes and probes only the first `ways`
/// lines, since priming more would evict its own lines.
pub struct PrimeProbe {
    config: ChannelConfig,
    thresholds: Thresholds,
    timer: Box<dyn CacheTimer>,
    set: EvictionSet,
    // the eviction set points into this region
    _region: Box<dyn BytePointer>,
}

impl PrimeProbe {
    /// Allocates a region and builds the eviction set described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the configuration is invalid, the region cannot be
    /// allocated or not enough aliasing lines are found.
    pub fn new(config: ChannelConfig, timer: Box<dyn CacheTimer>) -> Result<Self, Error> {
        config.validate()?;
        let size = AddressSetBuilder::from_config(&config)?.region_size_hint();
        let region = if config.hugepages {
            Memory::hugepage(size)?
        } else {
            Memory::mmap(size)?
        };
        Self::with_region(config, timer, Box::new(region))
    }

    /// Builds the eviction set inside an existing region.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the configuration is invalid or not enough
    /// aliasing lines are found.
    pub fn with_region(
        config: ChannelConfig,
        timer: Box<dyn CacheTimer>,
        region: Box<dyn BytePointer>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let builder = AddressSetBuilder::from_config(&config)?;
        let set = match config.addressing {
            Addressing::Virtual => builder.build(region.as_ref(), &mut IdentityResolver)?,
            Addressing::Physical => {
                builder.build(region.as_ref(), &mut LinuxPageMap::new()?)?
            }
        };
        info!(
            "Prime+Probe on set {} slice {:?}: {} lines, probing {}",
            set.set(),
            set.slice(),
            set.len(),
            config.geometry.ways.min(set.len())
        );
        Ok(PrimeProbe {
            thresholds: config.thresholds(),
            config,
            timer,
            set,
            _region: region,
        })
    }

    /// The eviction set.
    pub fn eviction_set(&self) -> &EvictionSet {
        &self.set
    }

    fn probe_set(&self) -> &[*const u8] {
        self.set.head(self.config.geometry.ways)
    }

    /// Touches every line twice, interleaved with its successor.
    fn prime_pass(&self, lines: &[*const u8]) {
        for (a, b) in lines.iter().copied().circular_tuple_windows() {
            unsafe {
                self.timer.access(a);
                self.timer.access(b);
                self.timer.access(a);
                self.timer.access(b);
            }
        }
    }

    fn evict_pass(&self) {
        for &addr in self.set.addrs() {
            unsafe { self.timer.access(addr) };
        }
    }
}

impl BitChannel for PrimeProbe {
    fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn timer(&self) -> &dyn CacheTimer {
        self.timer.as_ref()
    }

    fn send_bit(&self, bit: bool, period_start: u64) {
        let end = period_start + self.config.bit_period;
        if bit {
            loop {
                self.evict_pass();
                if self.timer.now() >= end {
                    break;
                }
            }
        }
        wait_until(self.timer.as_ref(), end);
    }

    fn detect_bit(&self, period_start: u64) -> BitSample {
        let lines = self.probe_set();
        let prime_end = period_start + self.config.prime_period;
        loop {
            self.prime_pass(lines);
            if self.timer.now() >= prime_end {
                break;
            }
        }
        wait_until(self.timer.as_ref(), period_start + self.config.probe_start());
        let mut sample = BitSample::default();
        for &addr in lines {
            sample.record(unsafe { self.thresholds.measure(self.timer.as_ref(), addr) });
        }
        wait_until(
            self.timer.as_ref(),
            period_start + self.config.bit_period,
        );
        debug!(
            "Probe: {} misses, {} hits of {} lines",
            sample.miss_count,
            sample.hit_count,
            lines.len()
        );
        sample
    }

    fn decide(&self, sample: &BitSample) -> bool {
        probe_decision(sample.miss_count, self.config.geometry.ways)
    }
}

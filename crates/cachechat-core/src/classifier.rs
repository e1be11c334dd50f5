//! Hit/miss classification of single timed accesses.
//!
//! Thresholds come from [`ChannelConfig`](crate::config::ChannelConfig); no
//! calibration happens here.

use serde::Serialize;

use crate::memory::CacheTimer;

/// Classification of one timed access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AccessClass {
    /// The line was served from the cache
    Hit,
    /// The line had been evicted
    Miss,
    /// The latency is too large to be explained by cache state (page walk, interrupt, ...)
    Outlier,
}

/// Latency thresholds used to classify accesses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Thresholds {
    /// Accesses up to this many cycles are hits
    pub miss: u64,
    /// Accesses of at least this many cycles are outliers
    pub outlier: u64,
}

impl Thresholds {
    /// Classifies a measured latency.
    pub fn classify(&self, cycles: u64) -> AccessClass {
        classify(cycles, self.miss, self.outlier)
    }

    /// Times one access through `timer` and classifies it.
    ///
    /// # Safety
    ///
    /// `addr` must be valid for reads.
    pub unsafe fn measure<T: CacheTimer + ?Sized>(&self, timer: &T, addr: *const u8) -> AccessClass {
        self.classify(unsafe { timer.time_access(addr) })
    }
}

/// Classifies `cycles` against the miss threshold and the outlier bound.
///
/// * `cycles <= miss_threshold` is a hit
/// * `miss_threshold < cycles < outlier_bound` is a miss
/// * `cycles >= outlier_bound` is an outlier
pub fn classify(cycles: u64, miss_threshold: u64, outlier_bound: u64) -> AccessClass {
    if cycles >= outlier_bound {
        AccessClass::Outlier
    } else if cycles <= miss_threshold {
        AccessClass::Hit
    } else {
        AccessClass::Miss
    }
}

/// Hit/miss tally of one bit period.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BitSample {
    /// Samples that were not outliers
    pub valid_samples: u64,
    /// Samples classified as misses
    pub miss_count: u64,
    /// Samples classified as hits
    pub hit_count: u64,
}

impl BitSample {
    /// Adds one classified access. Outliers are dropped.
    pub fn record(&mut self, class: AccessClass) {
        match class {
            AccessClass::Hit => {
                self.hit_count += 1;
                self.valid_samples += 1;
            }
            AccessClass::Miss => {
                self.miss_count += 1;
                self.valid_samples += 1;
            }
            AccessClass::Outlier => {}
        }
    }

    /// Builds a sample from known counts.
    pub fn from_counts(miss_count: u64, hit_count: u64) -> Self {
        BitSample {
            valid_samples: miss_count + hit_count,
            miss_count,
            hit_count,
        }
    }

    /// Fraction of valid samples that missed, 0 if there were none.
    pub fn miss_ratio(&self) -> f64 {
        if self.valid_samples == 0 {
            0.0
        } else {
            self.miss_count as f64 / self.valid_samples as f64
        }
    }

    /// Majority decision: 1 iff more than half of the valid samples missed.
    pub fn majority(&self) -> bool {
        self.miss_count > self.valid_samples / 2
    }

    /// Relaxed decision used while acquiring synchronization:
    /// 1 iff more than an eighth of the valid samples missed.
    pub fn relaxed(&self) -> bool {
        self.miss_count > self.valid_samples / 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(0, 80, 1000), AccessClass::Hit);
        assert_eq!(classify(80, 80, 1000), AccessClass::Hit);
        assert_eq!(classify(81, 80, 1000), AccessClass::Miss);
        assert_eq!(classify(999, 80, 1000), AccessClass::Miss);
        assert_eq!(classify(1000, 80, 1000), AccessClass::Outlier);
        assert_eq!(classify(u64::MAX, 80, 1000), AccessClass::Outlier);
    }

    #[test]
    fn test_outliers_not_counted() {
        let t = Thresholds {
            miss: 100,
            outlier: 500,
        };
        let mut sample = BitSample::default();
        for cycles in [40, 150, 600, 90, 3000, 200] {
            sample.record(t.classify(cycles));
        }
        assert_eq!(sample, BitSample::from_counts(2, 2));
        assert_eq!(sample.valid_samples, 4);
    }

    #[test]
    fn test_majority_and_relaxed() {
        let even = BitSample::from_counts(50, 50);
        assert!(!even.majority());
        assert!(even.relaxed());
        assert!(BitSample::from_counts(51, 49).majority());

        // 100 valid samples: relaxed needs more than 12 misses
        assert!(!BitSample::from_counts(12, 88).relaxed());
        assert!(BitSample::from_counts(13, 87).relaxed());

        let empty = BitSample::default();
        assert!(!empty.majority());
        assert!(!empty.relaxed());
        assert_eq!(empty.miss_ratio(), 0.0);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    #[ignore = "thresholds depend on the host; run with MISS_THRESHOLD set"]
    fn test_resident_and_flushed_lines() -> anyhow::Result<()> {
        let miss = std::env::var("MISS_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(80);
        let t = Thresholds {
            miss,
            outlier: 1000,
        };
        let timer = crate::memory::construct_cache_timer()?;
        let buf = vec![0u8; 4096];
        let addr = buf.as_ptr();
        const N: usize = 10_000;
        let (mut hits, mut misses) = (0, 0);
        for _ in 0..N {
            unsafe {
                timer.access(addr);
                if t.measure(timer.as_ref(), addr) == AccessClass::Hit {
                    hits += 1;
                }
                timer.flush(addr);
                if t.measure(timer.as_ref(), addr) == AccessClass::Miss {
                    misses += 1;
                }
            }
        }
        assert!(hits * 100 >= N * 99, "{} of {} resident accesses hit", hits, N);
        assert!(misses * 100 >= N * 99, "{} of {} flushed accesses missed", misses, N);
        Ok(())
    }
}

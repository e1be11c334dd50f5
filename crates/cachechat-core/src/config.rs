//! Channel configuration shared out of band by sender and receiver.
//!
//! Both peers must run with identical [`ChannelConfig`] values; nothing in the
//! protocol negotiates them.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::Thresholds;
use crate::util::{CL_SIZE, MAX_MESSAGE_LEN};

/// Errors detected while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Prime, access and probe phases do not fit into one bit period
    #[error(
        "prime ({prime}) + access ({access}) + probe ({probe}) cycles exceed the bit period of {bit_period} cycles"
    )]
    PeriodsExceedBitPeriod {
        /// Prime phase length
        prime: u64,
        /// Access phase length
        access: u64,
        /// Probe phase length
        probe: u64,
        /// Bit period length
        bit_period: u64,
    },
    /// The Flush+Reload flush slot is empty or longer than a bit period
    #[error("access period of {access} cycles must be in 1..={bit_period}")]
    AccessPeriod {
        /// Access period length
        access: u64,
        /// Bit period length
        bit_period: u64,
    },
    /// Bit period of zero cycles
    #[error("bit period must be positive")]
    ZeroBitPeriod,
    /// Miss threshold not below the outlier bound
    #[error("miss threshold ({miss}) must be below the outlier bound ({outlier})")]
    ThresholdOrder {
        /// Miss threshold
        miss: u64,
        /// Outlier bound
        outlier: u64,
    },
    /// A geometry parameter is not a power of two
    #[error("cache {what} must be a non-zero power of two, got {value}")]
    NotPowerOfTwo {
        /// Name of the parameter
        what: &'static str,
        /// Offending value
        value: usize,
    },
    /// Fewer than two lines per set leave no miss count to decide on
    #[error("cache associativity must be at least 2, got {0}")]
    TooFewWays(usize),
    /// No slice hash is known for this slice count
    #[error("unsupported slice count {0}, expected 1, 2, 4 or 8")]
    UnsupportedSlices(usize),
    /// Target set outside the geometry
    #[error("target set {set} out of range (cache has {sets} sets)")]
    TargetSetOutOfRange {
        /// Requested set
        set: usize,
        /// Sets per slice
        sets: usize,
    },
    /// Target slice outside the geometry
    #[error("target slice {slice} out of range (cache has {slices} slices)")]
    TargetSliceOutOfRange {
        /// Requested slice
        slice: usize,
        /// Number of slices
        slices: usize,
    },
    /// Eviction set multiplier of zero
    #[error("eviction set multiplier must be positive")]
    ZeroMultiplier,
    /// Flush+Reload without a shared file
    #[error("flush+reload needs a shared file (--shared-path)")]
    MissingSharedPath,
    /// Unknown value for an enumerated option
    #[error("unknown {what} '{value}'")]
    UnknownValue {
        /// Option name
        what: &'static str,
        /// Offending value
        value: String,
    },
    /// Config file could not be read
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Config file could not be parsed
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// The bit transmission technique.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    /// Prime+Probe on a private eviction set
    PrimeProbe,
    /// Flush+Reload on a line of a shared file
    FlushReload,
}

impl FromStr for ChannelKind {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prime-probe" | "pp" => Ok(ChannelKind::PrimeProbe),
            "flush-reload" | "fr" => Ok(ChannelKind::FlushReload),
            _ => Err(ConfigError::UnknownValue {
                what: "channel",
                value: s.into(),
            }),
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::PrimeProbe => write!(f, "prime-probe"),
            ChannelKind::FlushReload => write!(f, "flush-reload"),
        }
    }
}

/// How addresses are translated before set and slice are computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Addressing {
    /// Use virtual addresses as if they were physical.
    ///
    /// Exact inside the backing page (use huge pages for LLC sets); slice
    /// selection is only correct up to a constant permutation.
    #[default]
    Virtual,
    /// Translate through `/proc/self/pagemap` (root only).
    Physical,
}

impl FromStr for Addressing {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "virtual" => Ok(Addressing::Virtual),
            "physical" => Ok(Addressing::Physical),
            _ => Err(ConfigError::UnknownValue {
                what: "addressing",
                value: s.into(),
            }),
        }
    }
}

/// Geometry of the targeted cache level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheGeometry {
    /// Line size in bytes
    pub line_size: usize,
    /// Sets per slice
    pub sets: usize,
    /// Associativity
    pub ways: usize,
    /// Number of slices (1 for unsliced caches)
    pub slices: usize,
}

impl CacheGeometry {
    /// A typical 32 KB, 8-way L1 data cache.
    pub const L1: CacheGeometry = CacheGeometry {
        line_size: CL_SIZE,
        sets: 64,
        ways: 8,
        slices: 1,
    };

    /// A 16-way last-level cache with 8 slices of 2048 sets.
    pub const LLC: CacheGeometry = CacheGeometry {
        line_size: CL_SIZE,
        sets: 2048,
        ways: 16,
        slices: 8,
    };

    /// log2 of the line size.
    pub fn line_shift(&self) -> u32 {
        self.line_size.trailing_zeros()
    }

    /// Set index of `addr` within its slice.
    pub fn set_index(&self, addr: usize) -> usize {
        (addr >> self.line_shift()) & (self.sets - 1)
    }

    /// Distance between two consecutive addresses of the same set.
    pub fn set_stride(&self) -> usize {
        self.line_size * self.sets
    }

    /// Checks that all parameters are usable.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first invalid parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (what, value) in [
            ("line size", self.line_size),
            ("set count", self.sets),
            ("slice count", self.slices),
        ] {
            if !value.is_power_of_two() {
                return Err(ConfigError::NotPowerOfTwo { what, value });
            }
        }
        if self.ways < 2 {
            return Err(ConfigError::TooFewWays(self.ways));
        }
        if self.slices > 8 {
            return Err(ConfigError::UnsupportedSlices(self.slices));
        }
        Ok(())
    }
}

impl FromStr for CacheGeometry {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "l1" | "L1" => Ok(CacheGeometry::L1),
            "llc" | "LLC" | "l3" | "L3" => Ok(CacheGeometry::LLC),
            _ => Err(ConfigError::UnknownValue {
                what: "cache level",
                value: s.into(),
            }),
        }
    }
}

/// Timing and geometry parameters of a channel.
///
/// All periods are in timestamp-counter cycles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Transmission technique
    pub kind: ChannelKind,
    /// Length of one bit period
    pub bit_period: u64,
    /// Prime+Probe: receiver prime phase
    pub prime_period: u64,
    /// Prime+Probe: window left to the sender; Flush+Reload: flush cadence
    pub access_period: u64,
    /// Prime+Probe: probe phase
    pub probe_period: u64,
    /// Accesses slower than this are misses
    pub miss_threshold: u64,
    /// Accesses at least this slow are discarded
    pub outlier_bound: u64,
    /// Target set index
    pub cache_region: usize,
    /// Target slice, defaults to slice 0 on sliced caches
    pub target_slice: Option<usize>,
    /// Targeted cache level
    pub geometry: CacheGeometry,
    /// Addressing contract for set/slice computation
    pub addressing: Addressing,
    /// Eviction set size as a multiple of the associativity
    pub set_multiplier: usize,
    /// Back the Prime+Probe region with huge pages
    pub hugepages: bool,
    /// Flush+Reload: file mapped read-only by both peers
    pub shared_path: Option<PathBuf>,
    /// Flush+Reload: byte offset of the shared line inside the file
    pub shared_offset: usize,
    /// Longest message the receiver accepts, in characters
    pub max_message_len: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: ChannelKind::PrimeProbe,
            bit_period: 2_000_000,
            prime_period: 800_000,
            access_period: 800_000,
            probe_period: 400_000,
            miss_threshold: 80,
            outlier_bound: 1_000,
            cache_region: 0,
            target_slice: None,
            geometry: CacheGeometry::L1,
            addressing: Addressing::Virtual,
            set_multiplier: 1,
            hugepages: false,
            shared_path: None,
            shared_offset: 0,
            max_message_len: MAX_MESSAGE_LEN,
        }
    }
}

impl ChannelConfig {
    /// Loads a configuration from a JSON file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_jsonfile<P: AsRef<Path>>(filepath: P) -> Result<ChannelConfig, ConfigError> {
        let file = File::open(filepath)?;
        let config = serde_json::from_reader(BufReader::new(file))?;
        Ok(config)
    }

    /// Checks the invariants both channel variants rely on.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bit_period == 0 {
            return Err(ConfigError::ZeroBitPeriod);
        }
        if self.miss_threshold >= self.outlier_bound {
            return Err(ConfigError::ThresholdOrder {
                miss: self.miss_threshold,
                outlier: self.outlier_bound,
            });
        }
        self.geometry.validate()?;
        if self.cache_region >= self.geometry.sets {
            return Err(ConfigError::TargetSetOutOfRange {
                set: self.cache_region,
                sets: self.geometry.sets,
            });
        }
        if let Some(slice) = self.target_slice {
            if slice >= self.geometry.slices {
                return Err(ConfigError::TargetSliceOutOfRange {
                    slice,
                    slices: self.geometry.slices,
                });
            }
        }
        match self.kind {
            ChannelKind::PrimeProbe => {
                let total = self
                    .prime_period
                    .checked_add(self.access_period)
                    .and_then(|t| t.checked_add(self.probe_period));
                if total.is_none_or(|t| t > self.bit_period) {
                    return Err(ConfigError::PeriodsExceedBitPeriod {
                        prime: self.prime_period,
                        access: self.access_period,
                        probe: self.probe_period,
                        bit_period: self.bit_period,
                    });
                }
                if self.set_multiplier == 0 {
                    return Err(ConfigError::ZeroMultiplier);
                }
            }
            ChannelKind::FlushReload => {
                if self.shared_path.is_none() {
                    return Err(ConfigError::MissingSharedPath);
                }
                if self.access_period == 0 || self.access_period > self.bit_period {
                    return Err(ConfigError::AccessPeriod {
                        access: self.access_period,
                        bit_period: self.bit_period,
                    });
                }
            }
        }
        Ok(())
    }

    /// Latency thresholds for the classifier.
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            miss: self.miss_threshold,
            outlier: self.outlier_bound,
        }
    }

    /// Offset of the Prime+Probe probe phase from the period start.
    pub fn probe_start(&self) -> u64 {
        self.prime_period + self.access_period
    }

    /// Slice targeted on sliced caches, `None` for unsliced ones.
    pub fn slice(&self) -> Option<usize> {
        (self.geometry.slices > 1).then(|| self.target_slice.unwrap_or(0))
    }
}

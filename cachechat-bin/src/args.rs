//! Channel arguments shared by all binaries.

use std::path::PathBuf;

use cachechat_core::config::{Addressing, CacheGeometry, ChannelConfig, ChannelKind, ConfigError};
use clap::Args;
use log::info;

/// Channel parameters. Both peers must be started with the same values.
///
/// Values given on the command line override those of `--config`.
#[derive(Debug, Args, Clone, Default)]
pub struct ChannelArgs {
    /// JSON channel configuration to start from.
    #[clap(long = "config")]
    pub config: Option<PathBuf>,
    /// Channel variant: `prime-probe` or `flush-reload`.
    #[clap(long = "kind", short = 'k')]
    pub kind: Option<ChannelKind>,
    /// Bit period in cycles.
    #[clap(long = "interval", short = 'i')]
    pub bit_period: Option<u64>,
    /// Prime phase in cycles.
    #[clap(long = "prime", short = 'p')]
    pub prime_period: Option<u64>,
    /// Access phase in cycles (Flush+Reload: flush cadence).
    #[clap(long = "access", short = 'a')]
    pub access_period: Option<u64>,
    /// Probe phase in cycles.
    #[clap(long = "probe")]
    pub probe_period: Option<u64>,
    /// Miss threshold in cycles.
    #[clap(long = "threshold", short = 't')]
    pub miss_threshold: Option<u64>,
    /// Latencies of at least this many cycles are discarded.
    #[clap(long = "outlier")]
    pub outlier_bound: Option<u64>,
    /// Target cache set.
    #[clap(long = "region", short = 'r')]
    pub cache_region: Option<usize>,
    /// Target slice of a sliced cache.
    #[clap(long = "slice")]
    pub target_slice: Option<usize>,
    /// Targeted cache level: `l1` or `llc`.
    #[clap(long = "cache")]
    pub geometry: Option<CacheGeometry>,
    /// Addressing contract: `virtual` or `physical` (root).
    #[clap(long = "addressing")]
    pub addressing: Option<Addressing>,
    /// Eviction set size as a multiple of the associativity.
    #[clap(long = "multiplier")]
    pub set_multiplier: Option<usize>,
    /// Back the Prime+Probe region with huge pages.
    #[clap(long = "hugepages")]
    pub hugepages: bool,
    /// File shared by both peers (Flush+Reload).
    #[clap(long = "shared")]
    pub shared_path: Option<PathBuf>,
    /// Byte offset of the shared line (Flush+Reload).
    #[clap(long = "shared-offset")]
    pub shared_offset: Option<usize>,
    /// Debug output.
    #[clap(long = "debug", short = 'd')]
    pub debug: bool,
    /// Benchmark mode: transmit seeded random bits instead of stdin.
    #[clap(long = "benchmark", short = 'b')]
    pub benchmark: bool,
    /// Number of payload bits in benchmark mode.
    #[clap(long = "bits", default_value = "10000")]
    pub bits: usize,
    /// Seed of the benchmark bits (random if not given).
    #[clap(long = "seed")]
    pub seed: Option<u64>,
}

impl ChannelArgs {
    /// Default log filter for these arguments.
    pub fn log_filter(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }

    /// The configuration file (or defaults) with all given flags applied.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration file cannot be loaded.
    pub fn load(&self) -> Result<ChannelConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading channel configuration from {}", path.display());
                ChannelConfig::from_jsonfile(path)?
            }
            None => ChannelConfig::default(),
        };
        macro_rules! apply {
            ($($field:ident),*) => {$(
                if let Some(value) = self.$field.clone() {
                    config.$field = value;
                }
            )*};
        }
        apply!(
            kind,
            bit_period,
            prime_period,
            access_period,
            probe_period,
            miss_threshold,
            outlier_bound,
            cache_region,
            geometry,
            addressing,
            set_multiplier,
            shared_offset
        );
        if self.target_slice.is_some() {
            config.target_slice = self.target_slice;
        }
        if self.shared_path.is_some() {
            config.shared_path = self.shared_path.clone();
        }
        config.hugepages |= self.hugepages;
        Ok(config)
    }

    /// Like [`load`](Self::load), and validated.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if loading fails or the result is inconsistent.
    pub fn to_config(&self) -> Result<ChannelConfig, ConfigError> {
        let config = self.load()?;
        config.validate()?;
        Ok(config)
    }
}

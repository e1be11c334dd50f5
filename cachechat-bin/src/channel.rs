//! Construction of the configured channel variant.
//!
//! The variant is chosen once, from [`ChannelConfig::kind`], and never changes
//! for the lifetime of the process.

use cachechat_core::channel::BitChannel;
use cachechat_core::config::{ChannelConfig, ChannelKind};
use cachechat_core::memory::construct_cache_timer;
use cachechat_flush_reload::FlushReload;
use cachechat_prime_probe::PrimeProbe;
use log::info;

/// Builds the channel described by `config` on the platform timer.
///
/// # Errors
///
/// Returns an error if no cycle-accurate timer is available or the channel
/// cannot be set up (invalid configuration, allocation failure, no eviction
/// set, unmappable shared file).
pub fn build_channel(config: &ChannelConfig) -> anyhow::Result<Box<dyn BitChannel>> {
    let timer = construct_cache_timer()?;
    info!("Setting up {} channel", config.kind);
    let channel: Box<dyn BitChannel> = match config.kind {
        ChannelKind::PrimeProbe => Box::new(PrimeProbe::new(config.clone(), timer)?),
        ChannelKind::FlushReload => Box::new(FlushReload::new(config.clone(), timer)?),
    };
    Ok(channel)
}

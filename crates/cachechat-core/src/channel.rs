//! The bit-level transmission abstraction shared by all channel variants.

use crate::classifier::BitSample;
use crate::config::ChannelConfig;
use crate::memory::CacheTimer;

/// A cache covert channel able to move one bit per period.
///
/// Both operations run against a period start `period_start` on the
/// [`timer`](BitChannel::timer) clock and return no earlier than
/// `period_start + bit_period`, so that two peers configured identically stay
/// period-aligned without a handshake.
pub trait BitChannel {
    /// The parameters this channel was built with.
    fn config(&self) -> &ChannelConfig;

    /// The clock and memory primitives used by this channel.
    fn timer(&self) -> &dyn CacheTimer;

    /// Transmits `bit` during the period starting at `period_start`.
    fn send_bit(&self, bit: bool, period_start: u64);

    /// Samples the channel during the period starting at `period_start`.
    fn detect_bit(&self, period_start: u64) -> BitSample;

    /// Turns a sample into a bit using the variant's standard rule.
    fn decide(&self, sample: &BitSample) -> bool;

    /// Turns a sample into a bit using the lenient rule applied while
    /// acquiring synchronization.
    fn decide_relaxed(&self, sample: &BitSample) -> bool {
        sample.relaxed()
    }
}

macro_rules! forward_bit_channel {
    ($($ty:ty),*) => {$(
        impl<C: BitChannel + ?Sized> BitChannel for $ty {
            fn config(&self) -> &ChannelConfig {
                (**self).config()
            }

            fn timer(&self) -> &dyn CacheTimer {
                (**self).timer()
            }

            fn send_bit(&self, bit: bool, period_start: u64) {
                (**self).send_bit(bit, period_start)
            }

            fn detect_bit(&self, period_start: u64) -> BitSample {
                (**self).detect_bit(period_start)
            }

            fn decide(&self, sample: &BitSample) -> bool {
                (**self).decide(sample)
            }

            fn decide_relaxed(&self, sample: &BitSample) -> bool {
                (**self).decide_relaxed(sample)
            }
        }
    )*};
}

forward_bit_channel!(&C, Box<C>);

/// Prime+Probe decision: 1 iff more than `ways/2 - 1` probed lines missed.
///
/// Exactly `ways/2 - 1` misses decode to 0. Configurations with fewer than
/// two ways are rejected by [`CacheGeometry::validate`](crate::config::CacheGeometry::validate).
pub fn probe_decision(miss_count: u64, ways: usize) -> bool {
    miss_count + 1 > (ways / 2) as u64
}

/// Fraction of a bit period the receiver waits after a relaxed decision
/// fired, pulling its period boundary toward the sender's.
///
/// `1 - miss/(valid/1.2)`, clamped at 0.
pub fn phase_correction(sample: &BitSample) -> f64 {
    if sample.valid_samples == 0 {
        return 0.0;
    }
    (1.0 - 1.2 * sample.miss_ratio()).max(0.0)
}

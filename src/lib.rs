//! # Cachechat
//!
//! Two processes chatting through the CPU cache. This crate bundles the
//! protocol engine of [`cachechat_core`] with the channel variants enabled as
//! features:
//!
//! - `prime-probe`: [`PrimeProbe`], contention on one cache set, no shared memory.
//! - `flush-reload`: [`FlushReload`], flushing one line of a shared read-only file.
//!
//! The `send`, `recv` and `analyze` executables live in the `cachechat-bin`
//! crate.

#![warn(missing_docs)]

pub use cachechat_core::*;

#[cfg(feature = "flush-reload")]
pub use cachechat_flush_reload::{FlushReload, SharedLine};
#[cfg(feature = "prime-probe")]
pub use cachechat_prime_probe::PrimeProbe;

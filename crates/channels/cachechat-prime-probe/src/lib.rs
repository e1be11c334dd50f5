//! Prime+Probe bit channel.
//!
//! The receiver fills one cache set with its own lines, leaves an access window
//! to the sender and then times its lines again. The sender transmits a 1 by
//! evicting the set throughout the period and a 0 by staying idle. No memory is
//! shared: both sides only agree on the set (and slice) index.
//!
//! Implements the [`cachechat_core::channel::BitChannel`] trait.
//!
//! # Platform Requirements
//!
//! - x86_64 with `rdtsc`
//! - Root privileges when using physical addressing
//! - Configured huge pages when `hugepages` is set

#![warn(missing_docs)]

mod prime_probe;

pub use prime_probe::{Error, PrimeProbe};

//! # Cachechat Core
//!
//! `cachechat-core` is the protocol engine of the cachechat covert channel. Two
//! cooperating processes exchange short ASCII messages by modulating the state
//! of one cache set (Prime+Probe) or one shared cache line (Flush+Reload).
//!
//! ## Architecture Overview
//!
//! - [`memory::CacheTimer`] - The platform boundary: timestamp reads, timed
//!   loads and line flushes. Everything above it can run against a mock clock.
//!
//! - [`classifier`] - Hit/miss classification of timed accesses and the
//!   per-period [`classifier::BitSample`] tally.
//!
//! - [`addressing::AddressSetBuilder`] - Selects the addresses of a region that
//!   alias onto a target cache set (and slice).
//!
//! - [`channel::BitChannel`] - One bit per period. The Prime+Probe and
//!   Flush+Reload variants live in their own crates.
//!
//! - [`frame::FrameSync`] - Header detection and payload demodulation on the
//!   receiving side, with [`frame::encode_message`] as its sending counterpart.
//!
//! - [`session`] - Period-aligned sender and receiver loops, including the
//!   benchmark mode whose logs [`benchmark`] analyzes.
//!
//! ## Configuration
//!
//! Both peers must be started with the same [`config::ChannelConfig`]; nothing
//! is negotiated over the channel.
//!
//! ## Platform Support
//!
//! Timing requires x86_64 (`rdtsc`, `clflush`). Physical addressing reads
//! `/proc/self/pagemap` and needs root.

#![warn(missing_docs)]

pub mod addressing;
pub mod benchmark;
pub mod channel;
pub mod classifier;
pub mod config;
pub mod frame;
pub mod memory;
pub mod session;
pub mod util;

pub use addressing::{AddressSetBuilder, AddressSetError, EvictionSet, SliceHash};
pub use channel::BitChannel;
pub use classifier::{AccessClass, BitSample, Thresholds};
pub use config::{Addressing, CacheGeometry, ChannelConfig, ChannelKind, ConfigError};
pub use frame::{FrameEvent, FrameSync, SyncPhase};
pub use session::{EXIT_MESSAGE, Receiver, SessionError, Transmitter};

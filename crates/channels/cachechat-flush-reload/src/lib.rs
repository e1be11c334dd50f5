//! Flush+Reload bit channel.
//!
//! Both peers map the same file read-only, so one of its cache lines is
//! physically shared. The sender transmits a 1 by flushing that line and a 0 by
//! leaving it alone; the receiver reloads the line for the whole period and
//! counts misses.
//!
//! Implements the [`cachechat_core::channel::BitChannel`] trait.

#![warn(missing_docs)]

mod flush_reload;
mod shared_line;

pub use flush_reload::{Error, FlushReload};
pub use shared_line::{SharedLine, SharedLineError};

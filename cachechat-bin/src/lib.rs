//! # Cachechat
//!
//! Command-line front end of the cachechat covert channel. Two binaries talk
//! through the CPU cache, a third evaluates benchmark runs:
//!
//! - `send` - reads lines from stdin and transmits each of them; `exit` ends
//!   both peers.
//! - `recv` - prints every decoded message until `exit` arrives.
//! - `analyze` - compares the sender and receiver benchmark logs and records
//!   capacity, bit error rate and bandwidth.
//!
//! Both peers must be started with identical channel arguments, typically
//! pinned to two cores sharing the targeted cache:
//!
//! ```sh
//! cargo build --release
//! taskset -c 0 target/release/recv --interval 2000000 --prime 800000 --access 800000
//! taskset -c 2 target/release/send --interval 2000000 --prime 800000 --access 800000
//!```
//!
//! With `--benchmark`, `send` transmits `--bits` seeded random bits after the
//! header and both sides log them to `data/senderSave` and `data/receiverSave`.
//!
//! ## Modules
//!
//! - `args`: Channel arguments shared by all binaries.
//! - `channel`: Construction of the configured channel variant.
pub mod args;
pub mod channel;

use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

/// Sets up `env_logger` behind a progress-bar aware log bridge.
///
/// `default_filter` applies unless `RUST_LOG` is set.
pub fn init_logging_with_progress(default_filter: &str) -> anyhow::Result<MultiProgress> {
    let logger = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter),
    )
    .build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}

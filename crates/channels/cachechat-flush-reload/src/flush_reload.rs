use cachechat_core::channel::BitChannel;
use cachechat_core::classifier::{BitSample, Thresholds};
use cachechat_core::config::{ChannelConfig, ConfigError};
use cachechat_core::memory::{CacheTimer, wait_until};
use log::{debug, info};
use thiserror::Error;

use crate::shared_line::{SharedLine, SharedLineError};

/// Errors that can occur while setting up a Flush+Reload channel.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The shared file could not be mapped
    #[error(transparent)]
    SharedLine(#[from] SharedLineError),
}

/// Flush+Reload channel on one line of a shared read-only mapping.
pub struct FlushReload {
    config: ChannelConfig,
    thresholds: Thresholds,
    timer: Box<dyn CacheTimer>,
    line: SharedLine,
}

impl FlushReload {
    /// Maps the shared file named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the configuration is invalid or the file cannot be
    /// mapped.
    pub fn new(config: ChannelConfig, timer: Box<dyn CacheTimer>) -> Result<Self, Error> {
        config.validate()?;
        let path = config
            .shared_path
            .as_ref()
            .ok_or(ConfigError::MissingSharedPath)?;
        let line = SharedLine::open(path, config.shared_offset)?;
        info!(
            "Flush+Reload on {} offset 0x{:x}",
            path.display(),
            line.offset()
        );
        Ok(FlushReload {
            thresholds: config.thresholds(),
            config,
            timer,
            line,
        })
    }

    /// The shared line.
    pub fn line(&self) -> &SharedLine {
        &self.line
    }
}

impl BitChannel for FlushReload {
    fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn timer(&self) -> &dyn CacheTimer {
        self.timer.as_ref()
    }

    /// Flushes once per access slot for a 1, stays idle for a 0.
    fn send_bit(&self, bit: bool, period_start: u64) {
        let end = period_start + self.config.bit_period;
        if bit {
            let mut slot = period_start;
            while slot < end {
                unsafe { self.timer.flush(self.line.ptr()) };
                slot += self.config.access_period;
                wait_until(self.timer.as_ref(), slot.min(end));
            }
        }
        wait_until(self.timer.as_ref(), end);
    }

    fn detect_bit(&self, period_start: u64) -> BitSample {
        let end = period_start + self.config.bit_period;
        let mut sample = BitSample::default();
        loop {
            sample.record(unsafe { self.thresholds.measure(self.timer.as_ref(), self.line.ptr()) });
            if self.timer.now() >= end {
                break;
            }
        }
        debug!(
            "Reload: {} misses, {} hits of {} samples",
            sample.miss_count, sample.hit_count, sample.valid_samples
        );
        sample
    }

    fn decide(&self, sample: &BitSample) -> bool {
        sample.majority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachechat_core::config::ChannelKind;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::rc::Rc;

    const STEP: u64 = 10;

    #[derive(Default)]
    struct Script {
        clock: Cell<u64>,
        latencies: RefCell<VecDeque<u64>>,
        flushes: RefCell<Vec<u64>>,
        timed: Cell<usize>,
    }

    struct ScriptedTimer(Rc<Script>);

    impl CacheTimer for ScriptedTimer {
        fn now(&self) -> u64 {
            let t = self.0.clock.get();
            self.0.clock.set(t + STEP);
            t
        }
        unsafe fn time_access(&self, _addr: *const u8) -> u64 {
            self.0.timed.set(self.0.timed.get() + 1);
            self.0.clock.set(self.0.clock.get() + STEP);
            self.0.latencies.borrow_mut().pop_front().unwrap_or(30)
        }
        unsafe fn access(&self, _addr: *const u8) {}
        unsafe fn flush(&self, _addr: *const u8) {
            self.0.flushes.borrow_mut().push(self.0.clock.get());
        }
    }

    struct SharedFile(PathBuf);

    impl SharedFile {
        fn new(name: &str) -> anyhow::Result<Self> {
            let path = std::env::temp_dir().join(format!(
                "cachechat-fr-{}-{}",
                std::process::id(),
                name
            ));
            std::fs::write(&path, vec![0u8; 8192])?;
            Ok(SharedFile(path))
        }
    }

    impl Drop for SharedFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn channel(file: &SharedFile, access_period: u64) -> anyhow::Result<(FlushReload, Rc<Script>)> {
        let script = Rc::new(Script::default());
        let config = ChannelConfig {
            kind: ChannelKind::FlushReload,
            bit_period: 1_000,
            access_period,
            shared_path: Some(file.0.clone()),
            shared_offset: 4096 + 70,
            ..Default::default()
        };
        let fr = FlushReload::new(config, Box::new(ScriptedTimer(script.clone())))?;
        Ok((fr, script))
    }

    #[test]
    fn test_single_flush_per_period() -> anyhow::Result<()> {
        let file = SharedFile::new("single")?;
        let (fr, script) = channel(&file, 1_000)?;
        assert_eq!(fr.line().offset(), 4096 + 64);
        fr.send_bit(true, 0);
        assert_eq!(*script.flushes.borrow(), vec![0]);
        assert!(script.clock.get() >= 1_000);
        fr.send_bit(false, 1_000);
        assert_eq!(script.flushes.borrow().len(), 1);
        assert!(script.clock.get() >= 2_000);
        Ok(())
    }

    #[test]
    fn test_flush_cadence() -> anyhow::Result<()> {
        let file = SharedFile::new("cadence")?;
        let (fr, script) = channel(&file, 250)?;
        fr.send_bit(true, 0);
        let flushes = script.flushes.borrow();
        assert_eq!(flushes.len(), 4);
        for (i, &t) in flushes.iter().enumerate() {
            assert!(t >= i as u64 * 250 && t < i as u64 * 250 + 250, "{:?}", flushes);
        }
        Ok(())
    }

    #[test]
    fn test_detect_majority() -> anyhow::Result<()> {
        let file = SharedFile::new("detect")?;
        let (fr, script) = channel(&file, 1_000)?;
        // two clock steps per sample until the clock passes 1000: 51 samples
        *script.latencies.borrow_mut() = std::iter::repeat_n(300, 26).collect();
        let sample = fr.detect_bit(0);
        assert_eq!(script.timed.get(), 51);
        assert_eq!(sample.valid_samples, 51);
        assert_eq!(sample.miss_count, 26);
        assert!(fr.decide(&sample));

        *script.latencies.borrow_mut() = std::iter::repeat_n(300, 25).collect();
        let sample = fr.detect_bit(1_000);
        assert_eq!(sample.miss_count, 25);
        assert!(!fr.decide(&sample));
        assert!(fr.decide_relaxed(&sample));
        Ok(())
    }

    #[test]
    fn test_outliers_excluded() -> anyhow::Result<()> {
        let file = SharedFile::new("outliers")?;
        let (fr, script) = channel(&file, 1_000)?;
        *script.latencies.borrow_mut() = std::iter::repeat_n(50_000, 40).collect();
        let sample = fr.detect_bit(0);
        assert_eq!(sample.valid_samples, 11);
        assert_eq!(sample.miss_count, 0);
        Ok(())
    }

    #[test]
    fn test_missing_shared_path() {
        let config = ChannelConfig {
            kind: ChannelKind::FlushReload,
            ..Default::default()
        };
        let res = FlushReload::new(config, Box::new(ScriptedTimer(Rc::new(Script::default()))));
        assert!(matches!(res, Err(Error::Config(ConfigError::MissingSharedPath))));
    }
}

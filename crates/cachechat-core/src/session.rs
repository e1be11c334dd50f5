//! Sender and receiver loops driving a [`BitChannel`] period by period.
//!
//! Both sides keep a period anchor on the channel's clock and advance it by
//! one bit period per bit. There is no handshake: alignment comes from the
//! shared period length and the receiver's phase correction at synchronization.

use std::path::Path;
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::benchmark::{BenchmarkError, write_bit_log};
use crate::channel::{BitChannel, phase_correction};
use crate::frame::{FrameEvent, FrameSync, HEADER, encode_message};
use crate::memory::CacheTimer;
use crate::util::NamedProgress;

/// Message that ends a session on both sides.
pub const EXIT_MESSAGE: &str = "exit";

/// Errors that can occur in a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Benchmark log could not be written
    #[error(transparent)]
    Benchmark(#[from] BenchmarkError),
}

/// Start of the period following the one anchored at `start`.
///
/// If the clock has already run more than one period past it, the anchor is
/// moved to the current time instead.
fn next_period(timer: &dyn CacheTimer, start: u64, length: u64, bit_period: u64) -> u64 {
    let next = start + length;
    let now = timer.now();
    if now > next + bit_period {
        warn!(
            "Overran period boundary by {} cycles, re-anchoring",
            now - next
        );
        now
    } else {
        next
    }
}

fn bit_progress(progress: Option<&MultiProgress>, name: &str, len: usize) -> Option<ProgressBar> {
    progress.map(|p| {
        let bar = p.add(ProgressBar::new(len as u64));
        bar.set_style(ProgressStyle::named_bar(name));
        bar
    })
}

/// Sending side of a session.
pub struct Transmitter<C> {
    channel: C,
    progress: Option<MultiProgress>,
}

impl<C: BitChannel> Transmitter<C> {
    /// A transmitter sending over `channel`.
    pub fn new(channel: C) -> Self {
        Transmitter {
            channel,
            progress: None,
        }
    }

    /// Report transmission progress of longer bit sequences.
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// The underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Frames and transmits one line of text and returns the text that was
    /// sent.
    ///
    /// A trailing newline is stripped. Text longer than `max_message_len`
    /// bytes would be discarded by the receiver, so it is cut at the last
    /// character boundary that fits.
    pub fn send_message<'a>(&self, text: &'a str) -> &'a str {
        let mut text = text.trim_end_matches(['\n', '\r']);
        let max_len = self.channel.config().max_message_len;
        if text.len() > max_len {
            let mut end = max_len;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            warn!(
                "Message of {} bytes exceeds the limit of {}, truncating",
                text.len(),
                max_len
            );
            text = &text[..end];
        }
        let bits = encode_message(text);
        info!("Sending {:?} ({} bits)", text, bits.len());
        self.send_bits(&bits);
        text
    }

    /// Transmits `bits` in consecutive periods starting now.
    pub fn send_bits(&self, bits: &[bool]) {
        let timer = self.channel.timer();
        let bit_period = self.channel.config().bit_period;
        let bar = bit_progress(self.progress.as_ref(), "Sending", bits.len());
        let mut start = timer.now();
        for (i, &bit) in bits.iter().enumerate() {
            self.channel.send_bit(bit, start);
            trace!("Sent bit {} = {}", i, bit as u8);
            start = next_period(timer, start, bit_period, bit_period);
            if let Some(bar) = &bar {
                bar.inc(1);
            }
        }
        if let Some(bar) = bar {
            bar.finish();
        }
    }

    /// Sends the header followed by `bits` and records `bits` to `log`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the log cannot be written.
    pub fn send_benchmark<P: AsRef<Path>>(&self, bits: &[bool], log: P) -> Result<(), SessionError> {
        write_bit_log(log, bits)?;
        let mut frame = HEADER.to_vec();
        frame.extend_from_slice(bits);
        info!("Sending {} benchmark bits", bits.len());
        self.send_bits(&frame);
        Ok(())
    }
}

/// Bits captured in benchmark mode.
#[derive(Clone, Debug)]
pub struct BenchmarkCapture {
    /// Decided bits after synchronization
    pub bits: Vec<bool>,
    /// Wall time from synchronization to the last bit
    pub elapsed: Duration,
}

/// Receiving side of a session.
pub struct Receiver<C> {
    channel: C,
    sync: FrameSync,
    progress: Option<MultiProgress>,
}

impl<C: BitChannel> Receiver<C> {
    /// A receiver listening on `channel`.
    pub fn new(channel: C) -> Self {
        let sync = FrameSync::new(channel.config().max_message_len);
        Receiver {
            channel,
            sync,
            progress: None,
        }
    }

    /// Report progress while capturing benchmark bits.
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// The underlying channel.
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Detects one bit in the period starting at `start`.
    ///
    /// Returns the bit and the extra delay before the next period. The bit
    /// that would confirm synchronization is decided with the relaxed rule; if
    /// that fires, the next period is pushed back to realign with the sender.
    fn detect(&self, start: u64) -> (bool, u64) {
        let sample = self.channel.detect_bit(start);
        if self.sync.awaiting_confirmation() && self.channel.decide_relaxed(&sample) {
            let ratio = phase_correction(&sample);
            let delay = (ratio * self.channel.config().bit_period as f64) as u64;
            debug!(
                "Relaxed sync bit ({}/{} misses), delaying next period by {} cycles",
                sample.miss_count, sample.valid_samples, delay
            );
            return (true, delay);
        }
        let bit = self.channel.decide(&sample);
        trace!(
            "Detected bit {} ({}/{} misses)",
            bit as u8, sample.miss_count, sample.valid_samples
        );
        (bit, 0)
    }

    /// Listens until a message is decoded and returns it.
    ///
    /// Blocks indefinitely while no header is seen.
    pub fn next_message(&mut self) -> String {
        let timer = self.channel.timer();
        let bit_period = self.channel.config().bit_period;
        let mut start = timer.now();
        loop {
            let (bit, delay) = self.detect(start);
            start = next_period(timer, start, bit_period + delay, bit_period);
            if let FrameEvent::Message(message) = self.sync.push(bit) {
                info!("Received {:?}", message);
                return message;
            }
        }
    }

    /// Passes every decoded message to `on_message` until [`EXIT_MESSAGE`]
    /// arrives (which is passed as well).
    pub fn run<F: FnMut(&str)>(&mut self, mut on_message: F) {
        loop {
            let message = self.next_message();
            on_message(&message);
            if message == EXIT_MESSAGE {
                info!("Exit requested by peer");
                return;
            }
        }
    }

    /// Waits for the header, then records the next `count` bits to `log`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the log cannot be written.
    pub fn receive_benchmark<P: AsRef<Path>>(
        &mut self,
        count: usize,
        log: P,
    ) -> Result<BenchmarkCapture, SessionError> {
        let timer = self.channel.timer();
        let bit_period = self.channel.config().bit_period;
        self.sync.reset();
        let mut start = timer.now();
        loop {
            let (bit, delay) = self.detect(start);
            start = next_period(timer, start, bit_period + delay, bit_period);
            if self.sync.push(bit) == FrameEvent::Synced {
                break;
            }
        }
        let bar = bit_progress(self.progress.as_ref(), "Receiving", count);
        let begin = Instant::now();
        let mut bits = Vec::with_capacity(count);
        for _ in 0..count {
            let sample = self.channel.detect_bit(start);
            bits.push(self.channel.decide(&sample));
            start = next_period(timer, start, bit_period, bit_period);
            if let Some(bar) = &bar {
                bar.inc(1);
            }
        }
        let elapsed = begin.elapsed();
        if let Some(bar) = bar {
            bar.finish();
        }
        self.sync.reset();
        write_bit_log(log, &bits)?;
        Ok(BenchmarkCapture { bits, elapsed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::BitSample;
    use crate::config::ChannelConfig;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// Clock that only moves when the channel busy-waits.
    struct ManualClock(Cell<u64>);

    impl CacheTimer for ManualClock {
        fn now(&self) -> u64 {
            self.0.get()
        }
        unsafe fn time_access(&self, _addr: *const u8) -> u64 {
            0
        }
        unsafe fn access(&self, _addr: *const u8) {}
        unsafe fn flush(&self, _addr: *const u8) {}
    }

    /// Channel where every sent bit is detected, in order, as a sample of
    /// `samples` misses (1) or hits (0). Idle periods read as 0.
    struct Loopback {
        config: ChannelConfig,
        clock: ManualClock,
        wire: RefCell<VecDeque<BitSample>>,
        starts: RefCell<Vec<u64>>,
    }

    impl Loopback {
        fn new() -> Self {
            Loopback {
                config: ChannelConfig {
                    bit_period: 200,
                    ..Default::default()
                },
                clock: ManualClock(Cell::new(1_000)),
                wire: RefCell::new(VecDeque::new()),
                starts: RefCell::new(vec![]),
            }
        }

        fn push_sample(&self, sample: BitSample) {
            self.wire.borrow_mut().push_back(sample);
        }
    }

    impl BitChannel for Loopback {
        fn config(&self) -> &ChannelConfig {
            &self.config
        }
        fn timer(&self) -> &dyn CacheTimer {
            &self.clock
        }
        fn send_bit(&self, bit: bool, period_start: u64) {
            self.starts.borrow_mut().push(period_start);
            let sample = if bit {
                BitSample::from_counts(10, 0)
            } else {
                BitSample::from_counts(0, 10)
            };
            self.push_sample(sample);
            self.clock.0.set(period_start + self.config.bit_period);
        }
        fn detect_bit(&self, period_start: u64) -> BitSample {
            self.starts.borrow_mut().push(period_start);
            self.clock.0.set(period_start + self.config.bit_period);
            self.wire
                .borrow_mut()
                .pop_front()
                .unwrap_or(BitSample::from_counts(0, 10))
        }
        fn decide(&self, sample: &BitSample) -> bool {
            sample.majority()
        }
    }

    fn loopback_send(text: &str) -> Loopback {
        let tx = Transmitter::new(Loopback::new());
        tx.send_message(text);
        let channel = tx.channel;
        channel.starts.borrow_mut().clear();
        channel
    }

    #[test]
    fn test_send_strips_newline() {
        let tx = Transmitter::new(Loopback::new());
        tx.send_message("hi\n");
        assert_eq!(tx.channel().wire.borrow().len(), encode_message("hi").len());
    }

    #[test]
    fn test_exit_must_match_exactly() {
        let channel = Loopback::new();
        let tx = Transmitter::new(&channel);
        assert_eq!(tx.send_message("exit\r\n"), EXIT_MESSAGE);
        assert_ne!(tx.send_message("exit "), EXIT_MESSAGE);
        let mut rx = Receiver::new(&channel);
        assert_eq!(rx.next_message(), EXIT_MESSAGE);
        assert_eq!(rx.next_message(), "exit ");
    }

    #[test]
    fn test_long_message_truncated() {
        let channel = Loopback::new();
        let max_len = channel.config.max_message_len;
        // 'é' is two bytes, so the limit falls inside a character
        let text = format!("a{}", "é".repeat(max_len));
        let sent = Transmitter::new(&channel).send_message(&text);
        assert_eq!(sent.len(), max_len - 1);
        assert_eq!(sent, format!("a{}", "é".repeat(max_len / 2 - 1)));
        let mut rx = Receiver::new(&channel);
        assert_eq!(rx.next_message(), sent);
    }

    #[test]
    fn test_periods_are_consecutive() {
        let tx = Transmitter::new(Loopback::new());
        tx.send_bits(&[true, false, true]);
        assert_eq!(*tx.channel().starts.borrow(), vec![1_000, 1_200, 1_400]);
    }

    #[test]
    fn test_next_message() {
        let mut rx = Receiver::new(loopback_send("hello"));
        assert_eq!(rx.next_message(), "hello");
        let starts = rx.channel().starts.borrow();
        assert!(starts.windows(2).all(|w| w[1] - w[0] == 200));
    }

    #[test]
    fn test_run_until_exit() {
        let channel = Loopback::new();
        for text in ["first", "second", "exit", "never"] {
            let tx = Transmitter::new(&channel);
            tx.send_message(text);
        }
        let mut rx = Receiver::new(&channel);
        let mut received = vec![];
        rx.run(|m| received.push(m.to_string()));
        assert_eq!(received, vec!["first", "second", "exit"]);
    }

    #[test]
    fn test_relaxed_confirmation_realigns() {
        let channel = Loopback::new();
        let one = BitSample::from_counts(10, 0);
        let zero = BitSample::from_counts(0, 10);
        for bit in &HEADER[..5] {
            channel.push_sample(if *bit { one } else { zero });
        }
        // partially overlapping 1: 2 of 12 samples missed
        channel.push_sample(BitSample::from_counts(2, 10));
        for bit in crate::frame::encode_payload("ok") {
            channel.push_sample(if bit { one } else { zero });
        }
        let mut rx = Receiver::new(&channel);
        assert_eq!(rx.next_message(), "ok");
        let starts = channel.starts.borrow();
        // 0.8 of a period inserted after the confirming bit
        let gap = starts[6] - starts[5];
        assert!((359..=360).contains(&gap), "{}", gap);
        assert_eq!(starts[7] - starts[6], 200);
    }

    #[test]
    fn test_weak_bit_outside_sync_uses_majority() {
        let channel = Loopback::new();
        let one = BitSample::from_counts(10, 0);
        let zero = BitSample::from_counts(0, 10);
        for bit in encode_message("A") {
            channel.push_sample(if bit { one } else { zero });
        }
        // a weak 1 inside the payload would flip 'A' to 'C'
        {
            let mut wire = channel.wire.borrow_mut();
            wire[HEADER.len() + 6] = BitSample::from_counts(2, 10);
        }
        let mut rx = Receiver::new(&channel);
        assert_eq!(rx.next_message(), "A");
    }

    #[test]
    fn test_drift_guard() {
        let channel = Loopback::new();
        channel.clock.0.set(10_000);
        assert_eq!(next_period(&channel.clock, 9_800, 200, 200), 10_000);
        assert_eq!(next_period(&channel.clock, 9_000, 200, 200), 10_000);
        assert_eq!(next_period(&channel.clock, 9_700, 200, 200), 9_900);
    }

    #[test]
    fn test_benchmark_round_trip() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("cachechat-session-{}", std::process::id()));
        let channel = Loopback::new();
        let bits = crate::util::Rng::from_seed(7).bits(64);
        // idle noise before the header
        channel.push_sample(BitSample::from_counts(0, 10));
        Transmitter::new(&channel).send_benchmark(&bits, dir.join("senderSave"))?;
        let capture = Receiver::new(&channel).receive_benchmark(bits.len(), dir.join("receiverSave"))?;
        assert_eq!(capture.bits, bits);
        assert_eq!(
            crate::benchmark::read_bit_log(dir.join("receiverSave"))?,
            crate::benchmark::read_bit_log(dir.join("senderSave"))?
        );
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }
}

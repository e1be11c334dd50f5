//! Message framing on top of a binary channel.
//!
//! A frame is the header `1,0,1,0,1,1`, the payload as 8-bit MSB-first
//! characters and a terminator of 8 zero bits ending on a byte boundary of the
//! payload. [`FrameSync`] recovers payloads from a stream of detected bits.

use log::{debug, info, trace, warn};

/// Synchronization header: an alternating preamble followed by two 1s.
pub const HEADER: [bool; 6] = [true, false, true, false, true, true];

/// Number of zero bits terminating a payload.
pub const TERMINATOR_LEN: usize = 8;

const FLIPS_TO_SYNC: u8 = 4;

/// Encodes `text` as 8 bits per byte, most significant bit first.
pub fn encode_payload(text: &str) -> Vec<bool> {
    text.bytes()
        .flat_map(|byte| (0..8).rev().map(move |i| (byte >> i) & 1 == 1))
        .collect()
}

/// Encodes a full frame: header, payload, terminator.
pub fn encode_message(text: &str) -> Vec<bool> {
    let mut bits = HEADER.to_vec();
    bits.extend(encode_payload(text));
    bits.extend([false; TERMINATOR_LEN]);
    bits
}

/// Groups bits into MSB-first bytes and decodes them. A trailing partial byte
/// is ignored.
pub fn decode_payload(bits: &[bool]) -> String {
    let bytes = bits
        .chunks_exact(8)
        .map(|chunk| chunk.iter().fold(0u8, |byte, &bit| (byte << 1) | bit as u8))
        .collect::<Vec<_>>();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Renders bits as a `0`/`1` string for logging.
pub fn bit_string(bits: &[bool]) -> String {
    bits.iter().map(|&b| if b { '1' } else { '0' }).collect()
}

/// Phase of the receiver state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPhase {
    /// Looking for the header
    Searching,
    /// Header seen, collecting payload bits
    Synced,
}

/// Outcome of feeding one bit to [`FrameSync`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameEvent {
    /// Nothing to report
    Pending,
    /// The header has just been recognized
    Synced,
    /// A complete payload was decoded; the machine is searching again
    Message(String),
    /// The payload grew beyond the maximum length and was discarded
    Overflow,
}

/// Receiver-side frame synchronizer and demodulator.
#[derive(Clone, Debug)]
pub struct FrameSync {
    phase: SyncPhase,
    flip_count: u8,
    previous_bit: bool,
    buffer: Vec<bool>,
    zero_run: usize,
    max_bits: usize,
}

impl FrameSync {
    /// A synchronizer accepting payloads of up to `max_message_len` characters.
    pub fn new(max_message_len: usize) -> Self {
        FrameSync {
            phase: SyncPhase::Searching,
            flip_count: FLIPS_TO_SYNC,
            previous_bit: false,
            buffer: Vec::new(),
            zero_run: 0,
            max_bits: max_message_len * 8 + TERMINATOR_LEN,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Whether a 1 as the next bit completes the header.
    pub fn awaiting_confirmation(&self) -> bool {
        self.phase == SyncPhase::Searching && self.flip_count == 0 && self.previous_bit
    }

    /// Payload bits collected so far.
    pub fn buffered(&self) -> &[bool] {
        &self.buffer
    }

    /// Drops any partial payload and starts searching again.
    pub fn reset(&mut self) {
        self.phase = SyncPhase::Searching;
        self.flip_count = FLIPS_TO_SYNC;
        self.previous_bit = false;
        self.buffer.clear();
        self.zero_run = 0;
    }

    /// Feeds the next detected bit.
    pub fn push(&mut self, bit: bool) -> FrameEvent {
        match self.phase {
            SyncPhase::Searching => self.search(bit),
            SyncPhase::Synced => self.collect(bit),
        }
    }

    fn search(&mut self, bit: bool) -> FrameEvent {
        if self.awaiting_confirmation() && bit {
            info!("Synchronized");
            self.phase = SyncPhase::Synced;
            self.buffer.clear();
            self.zero_run = 0;
            return FrameEvent::Synced;
        }
        if bit != self.previous_bit {
            self.flip_count = self.flip_count.saturating_sub(1);
        } else {
            self.flip_count = FLIPS_TO_SYNC;
        }
        self.previous_bit = bit;
        trace!("Searching: bit {} flips left {}", bit as u8, self.flip_count);
        FrameEvent::Pending
    }

    fn collect(&mut self, bit: bool) -> FrameEvent {
        self.buffer.push(bit);
        if bit {
            self.zero_run = 0;
        } else {
            self.zero_run += 1;
        }
        if self.zero_run >= TERMINATOR_LEN && self.buffer.len() % 8 == 0 {
            self.buffer.truncate(self.buffer.len() - TERMINATOR_LEN);
            debug!("Payload bits {}", bit_string(&self.buffer));
            let message = decode_payload(&self.buffer);
            self.reset();
            return FrameEvent::Message(message);
        }
        if self.buffer.len() > self.max_bits {
            warn!(
                "Discarding {} payload bits without terminator",
                self.buffer.len()
            );
            self.reset();
            return FrameEvent::Overflow;
        }
        FrameEvent::Pending
    }
}

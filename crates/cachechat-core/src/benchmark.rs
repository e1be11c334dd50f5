//! Benchmark bit logs and channel-capacity analysis.
//!
//! In benchmark mode both peers record the payload bits as `index bit` lines.
//! [`TransitionMatrix`] compares the two logs; its [`capacity`] is the
//! Shannon capacity of the resulting binary channel.
//!
//! [`capacity`]: TransitionMatrix::capacity

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ChannelConfig;

const CAPACITY_MAX_ITERATIONS: usize = 10_000;

/// Errors that can occur while writing or analyzing benchmark data.
#[derive(Debug, Error)]
pub enum BenchmarkError {
    /// A log or results file could not be read or written
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A log line is not of the form `index bit`
    #[error("malformed bit log line {line}: {content:?}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// Offending line
        content: String,
    },
    /// Sender and receiver logs differ in length
    #[error("data length mismatch: sent {sent} bits, received {received}")]
    LengthMismatch {
        /// Bits in the sender log
        sent: usize,
        /// Bits in the receiver log
        received: usize,
    },
    /// Both logs are empty
    #[error("no benchmark data")]
    Empty,
    /// The results file could not be encoded
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Writes `bits` as `index bit` lines to `path`, creating parent directories.
///
/// # Errors
///
/// Returns [`BenchmarkError::Io`] if the file cannot be written.
pub fn write_bit_log<P: AsRef<Path>>(path: P, bits: &[bool]) -> Result<(), BenchmarkError> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let mut out = BufWriter::new(File::create(path)?);
    for (i, &bit) in bits.iter().enumerate() {
        writeln!(out, "{} {}", i, bit as u8)?;
    }
    out.flush()?;
    info!("Wrote {} bits to {}", bits.len(), path.display());
    Ok(())
}

/// Reads a log written by [`write_bit_log`]. Only the bit column is used.
///
/// # Errors
///
/// Returns [`BenchmarkError::Io`] if the file cannot be read and
/// [`BenchmarkError::Parse`] on malformed lines.
pub fn read_bit_log<P: AsRef<Path>>(path: P) -> Result<Vec<bool>, BenchmarkError> {
    let file = BufReader::new(File::open(path)?);
    let mut bits = vec![];
    for (i, line) in file.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let bit = match line.split_whitespace().nth(1) {
            Some("0") => false,
            Some("1") => true,
            _ => {
                return Err(BenchmarkError::Parse {
                    line: i + 1,
                    content: line,
                });
            }
        };
        bits.push(bit);
    }
    Ok(bits)
}

/// Counts of sent→received bit transitions, indexed `[sent][received]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionMatrix {
    counts: [[u64; 2]; 2],
}

impl TransitionMatrix {
    /// Compares two equally long bit sequences.
    ///
    /// # Errors
    ///
    /// Returns [`BenchmarkError::LengthMismatch`] or [`BenchmarkError::Empty`].
    pub fn from_bits(sent: &[bool], received: &[bool]) -> Result<Self, BenchmarkError> {
        if sent.len() != received.len() {
            return Err(BenchmarkError::LengthMismatch {
                sent: sent.len(),
                received: received.len(),
            });
        }
        if sent.is_empty() {
            return Err(BenchmarkError::Empty);
        }
        let mut counts = [[0; 2]; 2];
        for (&s, &r) in sent.iter().zip(received) {
            counts[s as usize][r as usize] += 1;
        }
        Ok(TransitionMatrix { counts })
    }

    /// A matrix from raw counts.
    pub fn from_counts(counts: [[u64; 2]; 2]) -> Self {
        TransitionMatrix { counts }
    }

    /// Raw counts.
    pub fn counts(&self) -> [[u64; 2]; 2] {
        self.counts
    }

    /// Number of compared bits.
    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    /// Fraction of bits received wrong.
    pub fn bit_error_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.counts[0][1] + self.counts[1][0]) as f64 / total as f64
    }

    /// Capacity in bits per channel use, computed with the Blahut–Arimoto
    /// algorithm.
    ///
    /// Returns 0 if a symbol was never sent or never received.
    pub fn capacity(&self) -> f64 {
        const M: usize = 2;
        for j in 0..M {
            if self.counts.iter().all(|row| row[j] == 0) {
                warn!("Transition matrix has a zero column");
                return 0.0;
            }
        }
        let mut p = [[0.0f64; M]; M];
        for (i, row) in self.counts.iter().enumerate() {
            let sum: u64 = row.iter().sum();
            if sum == 0 {
                warn!("Transition matrix has a zero row");
                return 0.0;
            }
            for j in 0..M {
                p[i][j] = row[j] as f64 / sum as f64;
            }
        }

        let tolerance = 1e-5 / M as f64;
        let mut r = [1.0 / M as f64; M];
        let mut q = [[0.0f64; M]; M];
        for _ in 0..CAPACITY_MAX_ITERATIONS {
            for j in 0..M {
                let column: f64 = (0..M).map(|i| r[i] * p[i][j]).sum();
                for i in 0..M {
                    q[i][j] = r[i] * p[i][j] / column;
                }
            }
            let mut next = [0.0f64; M];
            for i in 0..M {
                next[i] = (0..M).map(|j| q[i][j].powf(p[i][j])).product();
            }
            let norm: f64 = next.iter().sum();
            next.iter_mut().for_each(|x| *x /= norm);
            let delta = next
                .iter()
                .zip(&r)
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                .sqrt();
            if delta < tolerance {
                break;
            }
            r = next;
        }

        let mut cap = 0.0;
        for i in 0..M {
            for j in 0..M {
                if r[i] > 0.0 && q[i][j] > 0.0 {
                    cap += r[i] * p[i][j] * (q[i][j] / r[i]).log2();
                }
            }
        }
        cap
    }
}

/// Achieved raw bit rate.
pub fn bits_per_second(bits: usize, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        return 0.0;
    }
    bits as f64 / elapsed.as_secs_f64()
}

/// Result of one benchmark run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    /// RFC 3339 timestamp of the analysis
    pub date: String,
    /// Compared bits
    pub bits: u64,
    /// Transition counts
    pub transitions: TransitionMatrix,
    /// Capacity in bits per channel use
    pub capacity: f64,
    /// Fraction of wrong bits
    pub bit_error_rate: f64,
    /// Raw bit rate
    pub bits_per_second: f64,
    /// Capacity times raw bit rate
    pub bandwidth: f64,
}

impl BenchmarkRecord {
    /// Analyzes a run.
    pub fn new(transitions: TransitionMatrix, bits_per_second: f64) -> Self {
        let capacity = transitions.capacity();
        BenchmarkRecord {
            date: chrono::Local::now().to_rfc3339(),
            bits: transitions.total(),
            transitions,
            capacity,
            bit_error_rate: transitions.bit_error_rate(),
            bits_per_second,
            bandwidth: capacity * bits_per_second,
        }
    }
}

/// Key under which runs with the same timing parameters are grouped.
pub fn results_key(config: &ChannelConfig) -> String {
    serde_json::json!([
        config.bit_period,
        config.prime_period,
        config.access_period
    ])
    .to_string()
}

/// Appends `record` under `key` to the JSON results file at `path` and returns
/// all records stored under that key.
///
/// A corrupted results file is replaced.
///
/// # Errors
///
/// Returns [`BenchmarkError`] if the file cannot be written.
pub fn append_result<P: AsRef<Path>>(
    path: P,
    key: &str,
    record: BenchmarkRecord,
) -> Result<Vec<BenchmarkRecord>, BenchmarkError> {
    let path = path.as_ref();
    let mut contents: BTreeMap<String, Vec<BenchmarkRecord>> = match File::open(path) {
        Ok(file) => serde_json::from_reader(BufReader::new(file)).unwrap_or_else(|e| {
            warn!("Corrupted results file {}: {}", path.display(), e);
            BTreeMap::new()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
        Err(e) => return Err(e.into()),
    };
    let runs = contents.entry(key.to_string()).or_default();
    runs.push(record);
    let runs = runs.clone();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, &contents)?;
    out.flush()?;
    Ok(runs)
}

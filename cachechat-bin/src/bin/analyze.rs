use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use cachechat_bin::args::ChannelArgs;
use cachechat_bin::init_logging_with_progress;
use cachechat_core::benchmark::{
    BenchmarkRecord, TransitionMatrix, append_result, bits_per_second, read_bit_log, results_key,
};
use cachechat_core::util::{RECEIVER_LOG, SENDER_LOG};
use clap::Parser;
use log::info;

/// CLI arguments for the `analyze` binary.
///
/// The channel arguments must match those of the benchmark run; they key the
/// results file.
#[derive(Debug, Parser)]
struct CliArgs {
    #[command(flatten)]
    channel: ChannelArgs,
    /// Sender bit log.
    #[clap(long = "sender-log", default_value = SENDER_LOG)]
    sender_log: PathBuf,
    /// Receiver bit log.
    #[clap(long = "receiver-log", default_value = RECEIVER_LOG)]
    receiver_log: PathBuf,
    /// Results file the run is appended to.
    #[clap(long = "results", default_value = "results/cachechat.json")]
    results: PathBuf,
    /// Duration reported by `recv` ("received N bits in T ns").
    #[clap(long = "nanos")]
    nanos: Option<u64>,
    /// Timestamp counter frequency used to estimate the bit rate without `--nanos`.
    #[clap(long = "tsc-hz", default_value = "2300000000")]
    tsc_hz: f64,
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging_with_progress(args.channel.log_filter())?;
    let config = args.channel.load()?;

    let sent = read_bit_log(&args.sender_log)?;
    let received = read_bit_log(&args.receiver_log)?;
    let transitions = TransitionMatrix::from_bits(&sent, &received)?;
    let rate = match args.nanos {
        Some(nanos) => bits_per_second(received.len(), Duration::from_nanos(nanos)),
        None => args.tsc_hz / config.bit_period as f64,
    };
    let record = BenchmarkRecord::new(transitions, rate);

    let [[zz, zo], [oz, oo]] = transitions.counts();
    println!("Bit transition matrix:");
    println!("[[0 -> 0, 0 -> 1],\n [1 -> 0, 1 -> 1]]");
    println!("[[{}, {}],\n [{}, {}]]", zz, zo, oz, oo);
    println!("  Bit error rate: {:.6}", record.bit_error_rate);
    println!("  Capacity: {:.6} bits/use", record.capacity);
    println!("  Bandwidth: {:.1} bits/s", record.bandwidth);

    let key = results_key(&config);
    let runs = append_result(&args.results, &key, record)?;
    let best = runs.iter().map(|r| r.capacity).fold(0.0, f64::max);
    info!(
        "{} run(s) for {} in {}, best capacity {:.6}",
        runs.len(),
        key,
        args.results.display(),
        best
    );
    Ok(())
}

use std::io::{BufRead, stdin};
use std::path::PathBuf;

use anyhow::Result;
use cachechat_bin::args::ChannelArgs;
use cachechat_bin::channel::build_channel;
use cachechat_bin::init_logging_with_progress;
use cachechat_core::session::{EXIT_MESSAGE, Transmitter};
use cachechat_core::util::{Rng, SENDER_LOG};
use clap::Parser;
use log::info;

/// CLI arguments for the `send` binary.
#[derive(Debug, Parser)]
struct CliArgs {
    #[command(flatten)]
    channel: ChannelArgs,
    /// Where benchmark bits are recorded.
    #[clap(long = "log", default_value = SENDER_LOG)]
    log: PathBuf,
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    let progress = init_logging_with_progress(args.channel.log_filter())?;
    let config = args.channel.to_config()?;
    let transmitter = Transmitter::new(build_channel(&config)?).with_progress(progress);

    if args.channel.benchmark {
        let seed = args.channel.seed.unwrap_or_else(rand::random);
        info!("Benchmark seed: {}", seed);
        let bits = Rng::from_seed(seed).bits(args.channel.bits);
        transmitter.send_benchmark(&bits, &args.log)?;
        return Ok(());
    }

    println!("Please type a message (\"{}\" to quit).", EXIT_MESSAGE);
    for line in stdin().lock().lines() {
        let line = line?;
        if transmitter.send_message(&line) == EXIT_MESSAGE {
            break;
        }
    }
    info!("Sender finished");
    Ok(())
}

use std::path::PathBuf;

use anyhow::Result;
use cachechat_bin::args::ChannelArgs;
use cachechat_bin::channel::build_channel;
use cachechat_bin::init_logging_with_progress;
use cachechat_core::session::Receiver;
use cachechat_core::util::RECEIVER_LOG;
use clap::Parser;
use log::info;

/// CLI arguments for the `recv` binary.
#[derive(Debug, Parser)]
struct CliArgs {
    #[command(flatten)]
    channel: ChannelArgs,
    /// Where benchmark bits are recorded.
    #[clap(long = "log", default_value = RECEIVER_LOG)]
    log: PathBuf,
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    let progress = init_logging_with_progress(args.channel.log_filter())?;
    let config = args.channel.to_config()?;
    let mut receiver = Receiver::new(build_channel(&config)?).with_progress(progress);

    if args.channel.benchmark {
        let capture = receiver.receive_benchmark(args.channel.bits, &args.log)?;
        println!(
            "received {} bits in {} ns",
            capture.bits.len(),
            capture.elapsed.as_nanos()
        );
        return Ok(());
    }

    println!("Listening...");
    receiver.run(|message| println!("{}", message));
    info!("Receiver finished");
    Ok(())
}

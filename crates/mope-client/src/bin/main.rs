//! Index client CLI

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use mope_client::{connect, dataset, repl, ClientArgs, Command, Key, NavigationDriver};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = ClientArgs::parse();

    if let Command::GenDataset { path, count, length } = args.command() {
        dataset::write_dataset(&path, count, length)?;
        return Ok(());
    }

    let key = Key::load_or_generate(&args.key_file)?;
    let scheme = args.scheme(&key)?;
    let transport = connect(&args.server).await?;
    tracing::info!(server = %args.server, cipher = ?args.cipher, "Session opened");

    let mut driver = NavigationDriver::new(transport, scheme);

    match args.command() {
        Command::Repl => {
            let stdin = BufReader::new(tokio::io::stdin());
            repl::run(&mut driver, stdin, tokio::io::stdout()).await?;
        }
        Command::InsertFile { path, limit } => {
            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] [{bar:40}] {pos}/{len} ({per_sec})")?,
            );
            let summary = driver.insert_file(&path, limit, &pb).await?;
            println!(
                "inserted {} lines ({} duplicates, {} round trips) in {:.2?}",
                summary.lines, summary.duplicates, summary.round_trips, summary.elapsed
            );
        }
        Command::GenDataset { .. } => {}
    }

    tracing::info!(
        round_trips = driver.round_trips(),
        cached = driver.cache().len(),
        "Session closed"
    );
    Ok(())
}

mod cli;
mod config;
mod error;
mod output;

use crate::{cli::Args, config::AppConfig, error::Result, output::OutputManager};
use clap::Parser;
#[cfg(feature = "colored-output")]
use colored::*;
use danmaku::DanmakuClient;
use std::{
    io::{self, IsTerminal, Write},
    process,
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Events buffered between the client and stdout.
const EVENT_QUEUE_SIZE: usize = 1024;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        #[cfg(feature = "colored-output")]
        {
            eprintln!("{} {}", "Error:".red().bold(), e);
        }
        #[cfg(not(feature = "colored-output"))]
        {
            eprintln!("Error: {}", e);
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref())?.merge_args(&args)?;
    debug!("Loaded config: {:?}", config);

    let colored = !args.no_color && io::stdout().is_terminal();
    let output = OutputManager::new(args.format, colored)
        .with_types(config.type_filter()?)
        .with_raw(config.output.show_raw);

    let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_SIZE);
    let client = Arc::new(DanmakuClient::with_config(&args.room, config.client, tx)?);
    info!("Watching room {}", client.room());

    let runner = client.clone();
    let mut task = tokio::spawn(async move { runner.start().await });

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    let mut stdout = io::stdout().lock();
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                if !output.accepts(&event) {
                    continue;
                }
                let line = output.format_event(&event)?;
                if let Err(e) = writeln!(stdout, "{}", line) {
                    if e.kind() == io::ErrorKind::BrokenPipe {
                        debug!("stdout closed, stopping");
                        break;
                    }
                    return Err(e.into());
                }
            }
            _ = &mut interrupt => {
                info!("Interrupted, stopping");
                break;
            }
            result = &mut task => {
                if let Ok(Err(e)) = result {
                    return Err(e.into());
                }
                break;
            }
        }
    }

    client.stop().await;
    drop(rx);
    if !task.is_finished() {
        match task.await {
            Ok(Err(e)) => warn!("Client ended with error: {}", e),
            Err(e) => warn!("Client task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }

    if args.stats {
        eprintln!("{}", output.format_stats(&client.stats())?);
    }
    Ok(())
}

/// Logs go to stderr so stdout carries only events.
fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .init();
}

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dmc", version, about = "Print live chat from a Bilibili live room")]
pub struct Args {
    /// Room id or live room URL (e.g. https://live.bilibili.com/6)
    pub room: String,

    /// Configuration file (TOML)
    #[arg(short, long, env = "DMC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,

    /// Heartbeat interval in seconds
    #[arg(long)]
    pub heartbeat: Option<u64>,

    /// Delay before and after reconnecting, in milliseconds
    #[arg(long)]
    pub reconnect_delay: Option<u64>,

    /// Only print these message types (repeatable)
    #[arg(short = 't', long = "type", value_name = "TYPE")]
    pub types: Vec<String>,

    /// Print session statistics on exit
    #[arg(long)]
    pub stats: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable lines
    Pretty,
    /// One JSON object per line
    Json,
}

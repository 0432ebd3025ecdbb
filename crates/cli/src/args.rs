use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vmsctl")]
#[command(version = "0.1.0")]
#[command(about = "Fan out administrative operations across video management servers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Collect statistics from many recorders concurrently on a local worker pool
    Stats(StatsArgs),
    /// Start hardware scans on the server and poll them until they finish
    Scan(ScanArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    /// Number of recorders to query
    #[arg(short, long, default_value = "8")]
    pub recorders: usize,

    /// Max concurrent queries (defaults to VMSCTL_POOL_CAPACITY or the CPU count)
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Simulated latency of one statistics query in milliseconds
    #[arg(long, default_value = "150")]
    pub delay_ms: u64,

    /// Make every Nth recorder fail (0 = never)
    #[arg(long, default_value = "0")]
    pub fail_every: usize,

    /// How often finished jobs are collected, in milliseconds
    #[arg(long, default_value = "100")]
    pub poll_interval_ms: u64,

    /// Output format: text, json, csv
    #[arg(short, long, default_value = "text")]
    pub output_format: String,
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Number of hardware devices to scan
    #[arg(long, default_value = "5")]
    pub hardware: usize,

    /// Upper bound of status polls a simulated scan needs before finishing
    #[arg(long, default_value = "4")]
    pub max_polls: u32,

    /// Make every Nth scan end in the Error state (0 = never)
    #[arg(long, default_value = "0")]
    pub fail_every: usize,

    /// Drop the connection for this many status queries in a row, once
    #[arg(long, default_value = "0")]
    pub transient_failures: u32,

    /// Remove finished scan tasks from the server
    #[arg(long)]
    pub cleanup: bool,

    /// Polling preset: fast, default, patient
    #[arg(long, default_value = "fast", value_parser = ["fast", "default", "patient"])]
    pub preset: String,

    /// Override the preset's poll interval, in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Output format: text, json, csv
    #[arg(short, long, default_value = "text")]
    pub output_format: String,
}

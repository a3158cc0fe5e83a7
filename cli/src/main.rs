//! PortWatch CLI - Watch UDP ports used during test runs
//!
//! A watchdog for CI: samples bound UDP sockets, flags ports outside the
//! allowed range, and either kills the test runner or logs diagnostics.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use portwatch_core::{
    KillReaction, LogReaction, Sampler, SsSampler, TestRunner, WatchConfig, Watchdog,
};

#[derive(Parser)]
#[command(name = "portwatch")]
#[command(author, version, about = "Watchdog for disallowed UDP ports during test runs")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Lower bound of the allowed port range (inclusive)
    #[arg(long, global = true)]
    min_port: Option<u16>,

    /// Upper bound of the allowed port range (inclusive)
    #[arg(long, global = true)]
    max_port: Option<u16>,

    /// Replace the default static ignore list (repeatable)
    #[arg(long = "ignore", global = true, value_name = "PORT")]
    ignore: Vec<u16>,

    /// JSON configuration file; command-line flags win over file values
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll continuously and kill the test runner on any violation
    Kill {
        /// Executable name passed to killall
        #[arg(long, default_value = "cargo-nextest")]
        target: String,
    },

    /// Run the test command each iteration and log diagnostics on violations
    Log {
        /// Seconds between iterations
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,

        /// Wall-clock bound on one test run, in seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Directory for diagnostic log files
        #[arg(long, default_value = ".", value_name = "DIR")]
        output_dir: PathBuf,

        /// Test command to run, after `--` (default: cargo nextest run
        /// --test-threads 1 --no-capture)
        #[arg(last = true, value_name = "CMD")]
        test_cmd: Vec<String>,
    },

    /// Sample bound UDP ports once and print them
    #[command(alias = "ls")]
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn default_test_cmd() -> Vec<String> {
    ["cargo", "nextest", "run", "--test-threads", "1", "--no-capture"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

async fn resolve_config(cli: &Cli) -> anyhow::Result<WatchConfig> {
    let mut config = match &cli.config {
        Some(path) => WatchConfig::load(path).await?,
        None => WatchConfig::default(),
    };

    if let Some(min) = cli.min_port {
        config.min_port = min;
    }
    if let Some(max) = cli.max_port {
        config.max_port = max;
    }
    if !cli.ignore.is_empty() {
        config.ignore_ports = cli.ignore.iter().copied().collect();
    }

    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = resolve_config(&cli).await?;

    match cli.command {
        Commands::Kill { target } => {
            // The basic variant polls back to back, no delay
            config.poll_interval_secs = 0;
            let mut watchdog =
                Watchdog::new(config, SsSampler::new(), KillReaction::new(target))
                    .halt_on_sample_error(true);

            if let Err(e) = watchdog.run().await {
                eprintln!("Error running ss: {}", e);
                std::process::exit(2);
            }
        }
        Commands::Log {
            interval,
            timeout,
            output_dir,
            test_cmd,
        } => {
            if let Some(secs) = interval {
                config.poll_interval_secs = secs;
            }
            if let Some(secs) = timeout {
                config.test_timeout_secs = secs;
            }
            let command = if test_cmd.is_empty() {
                default_test_cmd()
            } else {
                test_cmd
            };
            let runner =
                TestRunner::new(command, Duration::from_secs(config.test_timeout_secs));

            let mut watchdog =
                Watchdog::new(config, SsSampler::new(), LogReaction::new(output_dir))
                    .with_runner(runner);

            watchdog.run().await?;
        }
        Commands::List { json } => {
            let ports = SsSampler::new().sample().await?;
            if json {
                println!("{}", serde_json::to_string(&ports)?);
            } else if ports.is_empty() {
                println!("No bound UDP ports observed");
            } else {
                for port in ports {
                    println!("{}", port);
                }
            }
        }
    }

    Ok(())
}

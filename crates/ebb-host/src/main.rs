//! # EBB Host Console
//!
//! The entry point of the plotter motion controller's host process. It
//! stands in for the board's serial front-end: command lines come in on
//! stdin (or from a file in batch mode), responses go out on stdout, and
//! the motion core runs under a tick clock.
//!
//! ## Modes
//!
//! * `run` — interactive console with a real-time tick thread, for
//!   driving the controller by hand.
//! * `batch` — processes a command file under virtual time, printing the
//!   responses; useful for scripted checks and traces.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use ebb_host::{ClockMode, ControllerConfig, Dispatcher, Machine};

/// Host console for the EBB-class plotter motion controller.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the controller configuration file.
    #[arg(short, long, default_value = "controller.cfg")]
    config_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the interactive command console with a real-time tick clock.
    Run,
    /// Process a command file under virtual time and print the responses.
    Batch(BatchArgs),
}

/// Arguments for the `batch` command.
#[derive(Parser, Debug)]
struct BatchArgs {
    /// Path to the command file, one command per line.
    file: PathBuf,
}

fn main() -> Result<()> {
    // Initialize the logging subscriber.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let config = if cli.config_path.exists() {
        info!(path = ?cli.config_path, "loading configuration");
        ControllerConfig::load(&cli.config_path)?
    } else {
        info!(path = ?cli.config_path, "no configuration file, using defaults");
        ControllerConfig::default()
    };

    match cli.command {
        Commands::Run => run_console(&config),
        Commands::Batch(args) => run_batch(&config, &args.file),
    }
}

/// Reads command lines from stdin and writes responses to stdout until
/// the input closes.
fn run_console(config: &ControllerConfig) -> Result<()> {
    info!("controller console running");
    let machine = Machine::new(ClockMode::Realtime, config.steppers.servo_poweroff_ms);
    let mut dispatcher = Dispatcher::new(machine, config);

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = dispatcher.handle_line(&line);
        stdout.write_all(response.as_bytes())?;
        stdout.flush()?;
    }
    info!("input closed, shutting down");
    Ok(())
}

/// Processes a command file under virtual time and prints the combined
/// responses once the motion has drained.
fn run_batch(config: &ControllerConfig, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read command file {file:?}"))?;

    let machine = Machine::new(ClockMode::Virtual, config.steppers.servo_poweroff_ms);
    let mut dispatcher = Dispatcher::new(machine, config);

    let mut responses = String::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        responses.push_str(&dispatcher.handle_line(line));
    }
    dispatcher.machine().wait_for_idle();

    print!("{responses}");
    Ok(())
}

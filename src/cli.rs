//! Command-line interface for omnivoice
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Realtime voice conversations from the terminal
#[derive(Parser, Debug)]
#[command(
    name = "omnivoice",
    version,
    about = "Realtime voice conversations from the terminal"
)]
pub struct Cli {
    /// Subcommand to execute (default: talk)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress the status line and all logging except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug logs, -vv: trace logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Microphone device name (see `omnivoice devices`)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Speaker device name (see `omnivoice devices`)
    #[arg(long, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Live model identifier (e.g., gemini-2.0-flash-exp)
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Prebuilt voice for model replies (e.g., Puck, Kore)
    #[arg(long, value_name = "VOICE")]
    pub voice: Option<String>,

    /// Stream a WAV file instead of the microphone
    #[arg(long, value_name = "FILE")]
    pub input_wav: Option<PathBuf>,

    /// End the session after this long. Examples: 30s, 5m, 1h30m
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub max_duration: Option<Duration>,
}

/// Parse a duration string.
///
/// Bare numbers are seconds; anything else goes through `humantime`
/// (`30s`, `5m`, `1h30m`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a voice session (default)
    Talk,

    /// List available audio input and output devices
    Devices,

    /// View and create configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (file + environment)
    Show,
    /// Print the default configuration file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

//! Command-line interface for callscribe
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Live dual-channel call transcription
#[derive(Parser, Debug)]
#[command(
    name = "callscribe",
    version,
    about = "Live dual-channel call transcription"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v: partials and levels, -vv: full diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List capture devices for both roles
    Devices,

    /// Capture and transcribe both channels
    Run {
        /// Microphone device id override
        #[arg(long, value_name = "DEVICE")]
        mic: Option<String>,

        /// Loopback device id override
        #[arg(long, value_name = "DEVICE")]
        loopback: Option<String>,

        /// Whisper model file override
        #[arg(long, value_name = "PATH")]
        model: Option<PathBuf>,

        /// Language code (default: auto-detect). Examples: auto, en, de
        #[arg(long, value_name = "LANG")]
        language: Option<String>,

        /// Stop after this many seconds (0 = run until interrupted)
        #[arg(long, short = 'd', value_name = "SECONDS", default_value = "0")]
        duration: u64,

        /// Emit events as JSON lines instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_with_overrides() {
        let cli = Cli::parse_from([
            "callscribe",
            "run",
            "--mic",
            "hw:1",
            "--language",
            "en",
            "--duration",
            "30",
        ]);
        match cli.command {
            Commands::Run {
                mic,
                language,
                duration,
                ..
            } => {
                assert_eq!(mic.as_deref(), Some("hw:1"));
                assert_eq!(language.as_deref(), Some("en"));
                assert_eq!(duration, 30);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn cli_parses_devices() {
        let cli = Cli::parse_from(["callscribe", "devices", "-v"]);
        assert!(matches!(cli.command, Commands::Devices));
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn cli_debug_assert() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

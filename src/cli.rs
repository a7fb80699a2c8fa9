// Command-line interface definitions for avcast
//
// Kept separate from main.rs so the argument surface is easy to scan
// and test in one place.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "avcast")]
#[command(author, version, about = "Live audio/video capture and streaming pipeline")]
#[command(long_about = "
Avcast captures live audio and video through synthetic peripherals and
streams them as progressively playable WAV and MJPEG bytes.

USAGE:
  Run `avcast` for the interactive console (type `help` once inside),
  or `avcast stream audio --duration 5000 > out.wav` for a one-shot
  bounded capture on stdout.
")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Override JPEG quality for transcoded frames (1-100)
    #[arg(long, value_name = "QUALITY")]
    pub jpeg_quality: Option<u8>,

    /// Override audio sample rate in Hz
    #[arg(long, value_name = "RATE")]
    pub sample_rate: Option<u32>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the interactive control console (default if no command specified)
    Console,

    /// Capture one bounded stream and write it to a file or stdout
    Stream {
        /// Stream to capture: "audio" or "video"
        target: String,

        /// Capture length in milliseconds (0 streams until interrupted)
        #[arg(long, default_value_t = 5000)]
        duration: u64,

        /// Output file (stdout when omitted)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Write exactly one raw unit (a JPEG still for video) and exit
        #[arg(long)]
        snapshot: bool,
    },

    /// Show current configuration
    Config,

    /// Inspect or apply sensor settings
    Sensor {
        #[command(subcommand)]
        action: SensorAction,
    },
}

#[derive(Subcommand)]
pub enum SensorAction {
    /// Print the attribute table
    Dump {
        /// Emit machine-readable JSON instead of aligned text
        #[arg(long)]
        json: bool,
    },

    /// Apply a flat JSON settings document (inline or @file)
    Load {
        /// JSON document, or @path to read it from a file
        document: String,
    },
}

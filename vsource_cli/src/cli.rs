//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "vsource", version, about = "Virtual source reference model")]
pub struct Cli {
    /// Preset catalog TOML layered over the builtin presets
    #[arg(long, value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// Calibration TOML; the analytic front-end model is used when absent
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Print results and errors as JSON, log as JSON lines
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Also write logs to this file
    #[arg(long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the resolved source, its harvester and both kernel parameter blocks
    Resolve {
        #[arg(long)]
        source: String,
        /// Override the source's sample rate
        #[arg(long, value_name = "SPS")]
        samplerate: Option<f64>,
        /// Samples per IV curve of the replayed input (0: operating points)
        #[arg(long, value_name = "N", default_value_t = 0)]
        window_samples: u32,
    },
    /// Replay a trace through one source
    Simulate {
        #[arg(long)]
        source: String,
        /// CSV with voltage_uV,current_nA,current_out_nA
        #[arg(long, value_name = "CSV")]
        input: PathBuf,
        /// CSV receiving one record per sample
        #[arg(long, value_name = "CSV")]
        output: PathBuf,
        /// Samples per IV curve of the input (0: operating points)
        #[arg(long, value_name = "N", default_value_t = 0)]
        window_samples: u32,
    },
    /// Replay one trace through several sources in parallel
    Sweep {
        /// Source preset, repeat for more
        #[arg(long = "source", required = true)]
        sources: Vec<String>,
        #[arg(long, value_name = "CSV")]
        input: PathBuf,
        #[arg(long, value_name = "N", default_value_t = 0)]
        window_samples: u32,
    },
    /// Fit a calibration from bench measurements
    FitCalibration {
        /// CSV with component,channel,reference_si,raw
        #[arg(long, value_name = "CSV")]
        measurements: PathBuf,
        /// Calibration TOML to write
        #[arg(long, value_name = "FILE")]
        output: PathBuf,
    },
    /// Print the active calibration
    Calibration {
        /// Print the integer block of the real-time core instead
        #[arg(long, action = ArgAction::SetTrue)]
        kernel: bool,
    },
}

//! CLI argument definitions.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::{RunConfig, WriteMode};

/// Top-level CLI parser for `niix2bids`.
#[derive(Debug, Parser)]
#[command(
    name = "niix2bids",
    version,
    about = "Create BIDS architecture from nifti files (and .json sidecars)"
)]
pub struct Cli {
    /// Directories to parse, usually the output of dcm2niix. Searched recursively.
    #[arg(required = true, num_args = 1..)]
    pub in_dirs: Vec<PathBuf>,

    /// Output directory, receiving the BIDS architecture.
    #[arg(short = 'o', long = "out-dir")]
    pub out_dir: PathBuf,

    /// Increase output verbosity: -v / -vv.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Write a log file in the output directory (default).
    #[arg(long, overrides_with = "no_logfile")]
    pub logfile: bool,

    /// Do not write a log file.
    #[arg(long = "no-logfile", overrides_with = "logfile")]
    pub no_logfile: bool,

    /// Copy files instead of creating symlinks.
    #[arg(long)]
    pub copyfile: bool,

    /// TOML routing table replacing the built-in Siemens one.
    #[arg(long, value_name = "FILE")]
    pub routing: Option<PathBuf>,
}

impl Cli {
    /// Unresolved run configuration; call [`RunConfig::resolve`] before use.
    pub fn to_config(&self) -> RunConfig {
        RunConfig {
            in_dirs: self.in_dirs.clone(),
            out_dir: self.out_dir.clone(),
            write_mode: if self.copyfile {
                WriteMode::Copy
            } else {
                WriteMode::Symlink
            },
            logfile: !self.no_logfile,
            routing: self.routing.clone(),
        }
    }
}

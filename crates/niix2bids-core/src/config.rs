//! Run configuration assembled by the CLI.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::classify::routing::RoutingTable;
use crate::errors::{NiixError, NiixResult};

/// How volumes and side files reach the output tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WriteMode {
    #[default]
    Symlink,
    Copy,
}

impl WriteMode {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteMode::Symlink => "symlink",
            WriteMode::Copy => "copyfile",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one conversion run needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    pub in_dirs: Vec<PathBuf>,
    pub out_dir: PathBuf,
    pub write_mode: WriteMode,
    /// Also write the log to `<out_dir>/log_<timestamp>.txt`.
    pub logfile: bool,
    /// TOML routing table replacing the built-in Siemens one.
    pub routing: Option<PathBuf>,
}

impl RunConfig {
    pub fn new(in_dirs: Vec<PathBuf>, out_dir: PathBuf) -> Self {
        Self {
            in_dirs,
            out_dir,
            write_mode: WriteMode::default(),
            logfile: true,
            routing: None,
        }
    }

    /// Make every path absolute; input directories must exist.
    pub fn resolve(mut self) -> NiixResult<Self> {
        if self.in_dirs.is_empty() {
            return Err(NiixError::Config("at least one input directory is required".to_string()));
        }
        for dir in &mut self.in_dirs {
            if !dir.is_dir() {
                return Err(NiixError::Config(format!(
                    "in_dir does not exist : {}",
                    dir.display()
                )));
            }
            *dir = std::path::absolute(&*dir)?;
        }
        self.out_dir = std::path::absolute(&self.out_dir)?;
        if let Some(routing) = self.routing.take() {
            self.routing = Some(std::path::absolute(routing)?);
        }
        Ok(self)
    }

    /// The routing table from `routing`, or the Siemens default.
    pub fn routing_table(&self) -> NiixResult<RoutingTable> {
        match &self.routing {
            Some(path) => RoutingTable::load(path),
            None => Ok(RoutingTable::siemens_default()),
        }
    }

    pub fn log_file_path(&self, now: DateTime<Local>) -> PathBuf {
        log_file_path(&self.out_dir, now)
    }
}

/// `<out_dir>/log_YYYY-mm-dd_HHhMMmSS.txt`
pub fn log_file_path(out_dir: &Path, now: DateTime<Local>) -> PathBuf {
    out_dir.join(format!("log_{}.txt", now.format("%Y-%m-%d_%Hh%Mm%S")))
}

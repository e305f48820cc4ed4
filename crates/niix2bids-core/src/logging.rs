//! Tracing subscriber setup and timed stage logging.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{NiixError, NiixResult};

/// Default level for a `-v` count: 0 -> info, 1 -> debug, 2+ -> trace.
pub fn level_for_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// `RUST_LOG` when set, otherwise the level derived from `verbose`.
pub fn build_filter(verbose: u8) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(verbose)))
}

/// Install the global subscriber: console, plus a plain-text copy in
/// `log_file` when given (parent directories are created).
pub fn init_logging(verbose: u8, log_file: Option<&Path>) -> NiixResult<()> {
    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = File::create(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(build_filter(verbose))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(|e| NiixError::Config(format!("cannot install logger: {e}")))
}

/// A pipeline stage logged as `<message> # start` / `<message> # done in <s>s`.
pub struct Stage {
    message: String,
    started: Instant,
}

impl Stage {
    pub fn start(message: impl Into<String>) -> Self {
        let message = message.into();
        info!("{message} # start");
        Self {
            message,
            started: Instant::now(),
        }
    }

    pub fn done(self) -> Duration {
        let elapsed = self.started.elapsed();
        info!("{} # done in {:.3}s", self.message, elapsed.as_secs_f64());
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for_verbosity(0), "info");
        assert_eq!(level_for_verbosity(1), "debug");
        assert_eq!(level_for_verbosity(2), "trace");
        assert_eq!(level_for_verbosity(9), "trace");
    }

    #[test]
    fn test_stage_reports_elapsed_time() {
        let stage = Stage::start("Read all .json files");
        assert!(stage.done() < Duration::from_secs(60));
    }
}

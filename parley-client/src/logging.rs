//! Tracing subscriber setup.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{ChatError, Result};

const LOG_FILE_PREFIX: &str = "parley.log";

/// Install the global subscriber.
///
/// Console output honours `RUST_LOG` (default `info`). With `log_dir` set,
/// a daily-rolling file is written as well; keep the returned guard alive
/// or buffered lines are lost on exit.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(true);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                ChatError::Config(format!("cannot create log dir {}: {}", dir.display(), e))
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file)
                .try_init()
                .map_err(|e| ChatError::Config(e.to_string()))?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .try_init()
                .map_err(|e| ChatError::Config(e.to_string()))?;
            Ok(None)
        }
    }
}

/*!
 * Log setup for pipeline runs
 *
 * A run emits either a compact operator view on stdout or a JSON run
 * log on disk. The run log opens in append mode: one recovery
 * iteration spans several invocations (partition, filter, chunk,
 * attack, analyze) and all of them belong to the same file. Transport
 * internals are capped at warn unless `RUST_LOG` says otherwise.
 */

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::PipelineConfig;
use crate::error::{Result, SluiceError};

/// Initialize structured logging for one orchestrator invocation
pub fn init_logging(config: &PipelineConfig) -> Result<()> {
    let directives = filter_directives(effective_level(config));
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .map_err(|e| {
            SluiceError::Config(format!("log filter '{}' does not parse: {}", directives, e))
        })?;

    match config.log_file {
        Some(ref path) => {
            let layer = fmt::layer()
                .with_writer(Arc::new(open_run_log(path)?))
                .with_target(true)
                .with_ansi(false)
                .json();
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        None => {
            let layer = fmt::layer().with_target(true).compact();
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
    Ok(())
}

/// `--verbose` wins over the configured level
fn effective_level(config: &PipelineConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

/// Default filter: the pipeline at the chosen level, the ssh layer
/// capped at warn so poll-loop chatter does not drown the run log
fn filter_directives(level: Level) -> String {
    format!("sluice={},ssh2=warn", level)
}

/// Open the run log for appending, creating parent directories. A
/// truncating open would erase the earlier stages of the same run.
fn open_run_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SluiceError::WriteIo {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SluiceError::WriteIo {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Initialize logging with custom format for testing
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter_directives(Level::DEBUG)));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer().with_target(false).compact())
            .try_init()
            .ok(); // Ignore error if already initialized
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_verbose_wins_over_configured_level() {
        let quiet = PipelineConfig {
            log_level: LogLevel::Error,
            verbose: false,
            ..Default::default()
        };
        assert_eq!(effective_level(&quiet), Level::ERROR);

        // An operator debugging a stuck attack pass wants debug output
        // without editing sluice.toml first
        let verbose = PipelineConfig {
            log_level: LogLevel::Error,
            verbose: true,
            ..Default::default()
        };
        assert_eq!(effective_level(&verbose), Level::DEBUG);
    }

    #[test]
    fn test_directives_cap_transport_noise() {
        let directives = filter_directives(Level::TRACE);
        assert!(directives.starts_with("sluice=TRACE"));
        assert!(directives.contains("ssh2=warn"));
        // The string must be a valid filter or init_logging fails
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_run_log_appends_across_stage_invocations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("run.log");

        {
            let mut file = open_run_log(&path).unwrap();
            writeln!(file, "partitioned 4 batches").unwrap();
        }
        {
            let mut file = open_run_log(&path).unwrap();
            writeln!(file, "filtered 4 batches").unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("partitioned 4 batches"));
        assert!(content.contains("filtered 4 batches"));
    }

    #[test]
    fn test_default_config_logs_at_info() {
        let config = PipelineConfig::default();
        assert_eq!(effective_level(&config), Level::INFO);
        assert!(config.log_file.is_none());
    }
}

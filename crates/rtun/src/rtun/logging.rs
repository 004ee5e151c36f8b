use std::{io, path::Path};

use anyhow::Context;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::rtun::config::LoggingConfig;

/// Keeps the non-blocking writer flushing until the process exits.
#[derive(Debug)]
pub struct LoggingRuntime {
    _guard: WorkerGuard,
}

/// `RUST_LOG` wins; otherwise the configured level, falling back to info.
fn directive(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

pub fn init(logging: &LoggingConfig) -> anyhow::Result<LoggingRuntime> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive(&logging.level)))
        .context("logging: init filter")?;

    let (writer, guard) = make_writer(logging.output.trim())?;
    let json = logging.format.trim().eq_ignore_ascii_case("json");

    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(!json && logging.output.trim() == "stderr")
        .with_target(false)
        .with_file(logging.add_source)
        .with_line_number(logging.add_source);

    let fmt = if json { fmt.json().boxed() } else { fmt.boxed() };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt)
        .try_init()
        .context("logging: install subscriber")?;

    Ok(LoggingRuntime { _guard: guard })
}

fn make_writer(output: &str) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    match output {
        "" | "stderr" => Ok(tracing_appender::non_blocking(io::stderr())),
        "stdout" => Ok(tracing_appender::non_blocking(io::stdout())),
        "discard" => Ok(tracing_appender::non_blocking(io::sink())),
        other => {
            let p = Path::new(other);
            if let Some(parent) = p.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("logging: mkdir {}", parent.display()))?;
                }
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(p)
                .with_context(|| format!("logging: open {}", p.display()))?;
            Ok(tracing_appender::non_blocking(file))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_levels_fall_back_to_info() {
        assert_eq!(directive("DEBUG"), "debug");
        assert_eq!(directive(" warn "), "warn");
        assert_eq!(directive("verbose"), "info");
        assert_eq!(directive(""), "info");
    }

    #[test]
    fn file_output_creates_parent_dirs() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("rtun_log_test_{}", std::process::id()));
        let path = dir.join("nested").join("rtun.log");

        let (_writer, _guard) = make_writer(path.to_str().unwrap()).expect("writer");
        assert!(path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}

//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Shared primitives and utilities for the service runtime."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "REGISTRAR_LOG";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Stdout formats for the daemon. The rolling file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Install the daemon subscriber: stdout in the configured format plus, unless
/// `config.file` is off, a daily rolling JSON file under `config.directory`.
///
/// The filter comes from `REGISTRAR_LOG`, then `RUST_LOG`, then
/// `config.level`. Enrollment events carry `course_code`, `student_number` and
/// `action` fields, so `registrar_core=debug` is enough to follow rejections.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = STDOUT_GUARD.set(stdout_guard);

    let file_layer = if config.file {
        std::fs::create_dir_all(&config.directory)?;
        let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
        let (file_writer, file_guard) =
            tracing_appender::non_blocking(daily(&config.directory, format!("{prefix}.log")));
        let _ = FILE_GUARD.set(file_guard);
        Some(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .json()
                .with_writer(file_writer),
        )
    } else {
        None
    };

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let filter = resolve_filter(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        &config.level,
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        level = %config.level,
        log_dir = %config.directory.display(),
        file = config.file,
        format = ?config.format,
        "tracing initialised"
    );
    Ok(())
}

/// Stdout-only subscriber writing through the test harness capture, so log
/// lines show up next to the failing test. Safe to call from every test.
pub fn init_test_tracing() {
    let filter = resolve_filter(std::env::var(LOG_ENV).ok(), None, "warn");
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_test_writer())
        .try_init();
}

/// Check that `directive` is a usable filter, e.g. `info,registrar_core=debug`.
pub fn parse_level(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|err| anyhow!("invalid log level directive {directive:?}: {err}"))
}

/// First parseable directive wins; `level` is the last resort.
fn resolve_filter(
    registrar_log: Option<String>,
    rust_log: Option<String>,
    level: &str,
) -> EnvFilter {
    for (source, directive) in [(LOG_ENV, registrar_log), (EnvFilter::DEFAULT_ENV, rust_log)] {
        let Some(directive) = directive else {
            continue;
        };
        match parse_level(&directive) {
            Ok(filter) => return filter,
            Err(err) => eprintln!("ignoring {source}: {err}"),
        }
    }
    parse_level(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

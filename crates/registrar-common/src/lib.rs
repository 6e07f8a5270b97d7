//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Shared primitives and utilities for the service runtime."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
//! Shared primitives for the Registrar workspace: configuration loading and
//! tracing bootstrap consumed by the daemon and the integration tests.

pub mod config;
pub mod logging;

pub use config::{
    ApiConfig, AppConfig, EnrollmentConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
    NotificationConfig, StoreConfig, DEFAULT_CREDIT_LIMIT,
};
pub use logging::{init_test_tracing, init_tracing, parse_level, LogFormat};

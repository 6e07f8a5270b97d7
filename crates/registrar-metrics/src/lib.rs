//! ---
//! reg_section: "03-persistence-logging"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Metrics collection and export utilities."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub async fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    let addr = listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Render the registry in the Prometheus text exposition format.
pub fn render(registry: &Registry) -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .context("failed to encode metrics")
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    match render(&registry) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    starts_total: IntCounter,
    config_load_seconds: Histogram,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "registrard_starts_total",
            "Total number of times the Registrar daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "registrard_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        Ok(Self {
            starts_total,
            config_load_seconds,
        })
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }
}

/// Enrollment orchestration metrics.
#[derive(Clone, Debug)]
pub struct EnrollmentMetrics {
    registry: SharedRegistry,
    transitions: IntCounterVec,
    rejections: IntCounterVec,
    partial_failures: IntCounter,
    duration: HistogramVec,
    listeners: IntGauge,
}

impl EnrollmentMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let transitions = IntCounterVec::new(
            Opts::new(
                "registrar_enrollments_total",
                "Committed enrollment transitions by action",
            ),
            &["action"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        let rejections = IntCounterVec::new(
            Opts::new(
                "registrar_enrollment_rejections_total",
                "Enrollment requests refused, by error kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(rejections.clone()))?;

        let partial_failures = IntCounter::with_opts(Opts::new(
            "registrar_partial_failures_total",
            "Two-entity writes that left one side unwritten",
        ))?;
        registry.register(Box::new(partial_failures.clone()))?;

        let duration = HistogramVec::new(
            HistogramOpts::new(
                "registrar_enrollment_duration_seconds",
                "Wall time of enroll/drop requests including store round trips",
            )
            .buckets(prometheus::exponential_buckets(0.0005, 2.0, 14)?),
            &["action"],
        )?;
        registry.register(Box::new(duration.clone()))?;

        let listeners = IntGauge::with_opts(Opts::new(
            "registrar_notification_listeners",
            "Currently connected notification listeners",
        ))?;
        registry.register(Box::new(listeners.clone()))?;

        Ok(Self {
            registry,
            transitions,
            rejections,
            partial_failures,
            duration,
            listeners,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_transition(&self, action: &str) {
        self.transitions.with_label_values(&[action]).inc();
    }

    pub fn record_rejection(&self, kind: &str) {
        self.rejections.with_label_values(&[kind]).inc();
    }

    pub fn record_partial_failure(&self) {
        self.partial_failures.inc();
    }

    pub fn observe_duration(&self, action: &str, seconds: f64) {
        self.duration.with_label_values(&[action]).observe(seconds);
    }

    pub fn listener_connected(&self) {
        self.listeners.inc();
    }

    pub fn listener_disconnected(&self) {
        self.listeners.dec();
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_value(registry: &Registry, name: &str, label: Option<&str>) -> f64 {
        registry
            .gather()
            .iter()
            .find(|family| family.get_name() == name)
            .and_then(|family| {
                family.get_metric().iter().find(|metric| match label {
                    Some(value) => metric.get_label().iter().any(|l| l.get_value() == value),
                    None => true,
                })
            })
            .map(|metric| metric.get_counter().get_value())
            .unwrap_or_default()
    }

    #[test]
    fn enrollment_metrics_track_transitions_and_rejections() {
        let registry = new_registry();
        let metrics = EnrollmentMetrics::new(registry.clone()).unwrap();

        metrics.record_transition("enrolled");
        metrics.record_transition("enrolled");
        metrics.record_transition("dropped");
        metrics.record_rejection("course_full");
        metrics.record_partial_failure();
        metrics.observe_duration("enrolled", 0.002);

        assert_eq!(
            counter_value(&registry, "registrar_enrollments_total", Some("enrolled")),
            2.0
        );
        assert_eq!(
            counter_value(&registry, "registrar_enrollments_total", Some("dropped")),
            1.0
        );
        assert_eq!(
            counter_value(
                &registry,
                "registrar_enrollment_rejections_total",
                Some("course_full")
            ),
            1.0
        );
        assert_eq!(
            counter_value(&registry, "registrar_partial_failures_total", None),
            1.0
        );
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let registry = new_registry();
        EnrollmentMetrics::new(registry.clone()).unwrap();
        assert!(EnrollmentMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn exporter_serves_registered_metrics() {
        let registry = new_registry();
        let daemon = DaemonMetrics::new(registry.clone()).unwrap();
        daemon.inc_start();

        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let body = reqwest::get(format!("http://{}/metrics", server.addr()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("registrard_starts_total 1"));
        server.shutdown().await.unwrap();
    }
}

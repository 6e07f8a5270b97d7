//! ---
//! reg_section: "03-persistence-logging"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Persistence abstractions and storage bindings."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::sync::Arc;

use prometheus::{IntCounter, Opts, Registry};

use crate::Result;

/// Metrics published by the persistence subsystem.
#[derive(Clone, Debug)]
pub struct PersistenceMetrics {
    snapshots_saved: IntCounter,
    snapshots_failed: IntCounter,
    journal_bytes: IntCounter,
}

impl PersistenceMetrics {
    /// Register all persistence metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let snapshots_saved = IntCounter::with_opts(Opts::new(
            "registrar_snapshots_saved_total",
            "Total number of catalog snapshots successfully persisted",
        ))?;
        registry.register(Box::new(snapshots_saved.clone()))?;

        let snapshots_failed = IntCounter::with_opts(Opts::new(
            "registrar_snapshots_failed_total",
            "Total number of catalog snapshot writes that failed",
        ))?;
        registry.register(Box::new(snapshots_failed.clone()))?;

        let journal_bytes = IntCounter::with_opts(Opts::new(
            "registrar_journal_bytes_total",
            "Total bytes appended to the enrollment journal",
        ))?;
        registry.register(Box::new(journal_bytes.clone()))?;

        Ok(Self {
            snapshots_saved,
            snapshots_failed,
            journal_bytes,
        })
    }

    /// Record a successful catalog snapshot.
    pub fn record_snapshot_saved(&self) {
        self.snapshots_saved.inc();
    }

    /// Record a failed catalog snapshot.
    pub fn record_snapshot_failed(&self) {
        self.snapshots_failed.inc();
    }

    /// Record bytes appended to the journal.
    pub fn record_journal_bytes(&self, bytes: usize) {
        self.journal_bytes.inc_by(bytes as u64);
    }
}

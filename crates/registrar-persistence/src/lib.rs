//! ---
//! reg_section: "03-persistence-logging"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Persistence abstractions and storage bindings."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Durable state for the entity store: whole-catalog snapshots guarded by a
//! content hash, and the append-only journal that brackets every two-entity
//! enrollment write.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing persistence files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// Reported when a snapshot fails integrity verification.
    #[error("snapshot hash mismatch")]
    HashMismatch,
    /// Snapshot written by an incompatible format revision.
    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version recorded in the file.
        found: u16,
        /// Version this build understands.
        expected: u16,
    },
    /// Wrapper for Prometheus metrics registration failures.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub mod journal;
pub mod metrics;
pub mod snapshot;

pub use journal::{EnrollmentJournal, JournalAction, JournalEntry, JournalPhase, PendingIntent};
pub use metrics::PersistenceMetrics;
pub use snapshot::{load_snapshot, save_snapshot, verify_snapshot, SNAPSHOT_VERSION};

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

use prometheus::Registry;
use registrar_persistence::{
    load_snapshot, save_snapshot, EnrollmentJournal, JournalAction, JournalPhase,
    PersistenceMetrics,
};
use serde_json::json;
use tempfile::tempdir;

#[test]
fn snapshot_roundtrip_preserves_catalog_document() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("catalog.json");
    let catalog = json!({
        "courses": [{"courseCode": "COMP308", "capacity": 2}],
        "students": [{"studentNumber": "300100200", "gpa": 3.7}],
    });

    save_snapshot(&catalog, &path).unwrap();
    let restored: serde_json::Value = load_snapshot(&path).unwrap();
    assert_eq!(restored, catalog);
}

#[test]
fn compensated_and_abandoned_entries_close_intents() {
    let dir = tempdir().unwrap();
    let journal = EnrollmentJournal::open(&dir.path().join("journal.log"), None).unwrap();

    let compensated = journal
        .record_intent(JournalAction::Enroll, "COMP308", "A")
        .unwrap();
    let abandoned = journal
        .record_intent(JournalAction::Drop, "COMP229", "B")
        .unwrap();
    journal
        .resolve(
            compensated,
            JournalPhase::Compensated,
            JournalAction::Enroll,
            "COMP308",
            "A",
            Some("student write failed".into()),
        )
        .unwrap();
    journal
        .resolve(
            abandoned,
            JournalPhase::Abandoned,
            JournalAction::Drop,
            "COMP229",
            "B",
            Some("rollback failed".into()),
        )
        .unwrap();

    assert!(journal.pending().unwrap().is_empty());
    let entries = journal.entries().unwrap();
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[2].detail.as_deref(), Some("student write failed"));
}

#[test]
fn journal_metrics_count_appended_bytes() {
    let registry = Arc::new(Registry::new());
    let metrics = Arc::new(PersistenceMetrics::new(registry.clone()).unwrap());
    let dir = tempdir().unwrap();
    let journal =
        EnrollmentJournal::open(&dir.path().join("journal.log"), Some(metrics.clone())).unwrap();

    journal
        .record_intent(JournalAction::Enroll, "COMP308", "A")
        .unwrap();
    metrics.record_snapshot_saved();

    let families = registry.gather();
    let bytes = families
        .iter()
        .find(|family| family.get_name() == "registrar_journal_bytes_total")
        .and_then(|family| family.get_metric().first())
        .map(|metric| metric.get_counter().get_value())
        .unwrap_or_default();
    assert!(bytes > 0.0);
}

//! ---
//! reg_section: "03-persistence-logging"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Persistence abstractions and storage bindings."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::metrics::PersistenceMetrics;
use crate::snapshot::{staging_path, SNAPSHOT_VERSION};
use crate::Result;

/// Journal file header stored as the first line.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalHeader {
    version: u16,
    created_at: DateTime<Utc>,
}

/// Which side of the enrollment relationship an intent changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalAction {
    /// Student is being added to a course.
    Enroll,
    /// Student is being removed from a course.
    Drop,
}

/// Lifecycle marker of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalPhase {
    /// Recorded before either entity is written.
    Intent,
    /// Both entities were written.
    Committed,
    /// The first write failed; neither entity changed.
    Aborted,
    /// One write failed and the other was rolled back.
    Compensated,
    /// One write failed and the rollback failed as well; needs an operator.
    Abandoned,
}

impl JournalPhase {
    fn is_terminal(self) -> bool {
        !matches!(self, JournalPhase::Intent)
    }
}

/// One line of the enrollment journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Sequential identifier assigned when appending.
    pub sequence: u64,
    /// Timestamp when the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Identifier shared by the intent and its terminal entry.
    pub intent_id: Uuid,
    /// Lifecycle marker.
    pub phase: JournalPhase,
    /// Enroll or drop.
    pub action: JournalAction,
    /// Course business key.
    pub course_code: String,
    /// Student business key.
    pub student_number: String,
    /// Free-form failure detail for non-committed terminals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Intent that never reached a terminal phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingIntent {
    /// Identifier of the open intent.
    pub intent_id: Uuid,
    /// Enroll or drop.
    pub action: JournalAction,
    /// Course business key.
    pub course_code: String,
    /// Student business key.
    pub student_number: String,
    /// When the intent was recorded.
    pub recorded_at: DateTime<Utc>,
}

struct JournalWriter {
    writer: BufWriter<File>,
    next_sequence: u64,
}

/// Append-only JSON-lines log bracketing two-entity enrollment writes.
///
/// Every write is recorded as an `intent` line before the store is touched and
/// closed by a terminal line (`committed`, `aborted`, `compensated` or
/// `abandoned`) afterwards. Any intent still open at startup marks a write that
/// may have left the two sides of the relationship out of step.
pub struct EnrollmentJournal {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
    metrics: Option<Arc<PersistenceMetrics>>,
}

impl std::fmt::Debug for EnrollmentJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentJournal")
            .field("path", &self.path)
            .finish()
    }
}

impl EnrollmentJournal {
    /// Open a journal for appending, writing a header if the file is new.
    pub fn open(path: &Path, metrics: Option<Arc<PersistenceMetrics>>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let fresh = !path.exists() || fs::metadata(path)?.len() == 0;
        let next_sequence = if fresh { 0 } else { last_sequence(path)? };
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);

        if fresh {
            write_header(&mut writer)?;
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(JournalWriter {
                writer,
                next_sequence,
            }),
            metrics,
        })
    }

    /// Record an intent and return its identifier.
    pub fn record_intent(
        &self,
        action: JournalAction,
        course_code: &str,
        student_number: &str,
    ) -> Result<Uuid> {
        let intent_id = Uuid::new_v4();
        self.append(JournalEntry {
            sequence: 0,
            timestamp: Utc::now(),
            intent_id,
            phase: JournalPhase::Intent,
            action,
            course_code: course_code.to_owned(),
            student_number: student_number.to_owned(),
            detail: None,
        })?;
        Ok(intent_id)
    }

    /// Close an intent with a terminal phase.
    pub fn resolve(
        &self,
        intent_id: Uuid,
        phase: JournalPhase,
        action: JournalAction,
        course_code: &str,
        student_number: &str,
        detail: Option<String>,
    ) -> Result<()> {
        debug_assert!(phase.is_terminal());
        self.append(JournalEntry {
            sequence: 0,
            timestamp: Utc::now(),
            intent_id,
            phase,
            action,
            course_code: course_code.to_owned(),
            student_number: student_number.to_owned(),
            detail,
        })
        .map(|_| ())
    }

    fn append(&self, mut entry: JournalEntry) -> Result<u64> {
        let mut guard = self.writer.lock();
        guard.next_sequence += 1;
        entry.sequence = guard.next_sequence;
        let line = serde_json::to_string(&entry)?;
        guard.writer.write_all(line.as_bytes())?;
        guard.writer.write_all(b"\n")?;
        guard.writer.flush()?;
        guard.writer.get_ref().sync_data()?;
        if let Some(metrics) = &self.metrics {
            metrics.record_journal_bytes(line.len() + 1);
        }
        debug!(
            sequence = entry.sequence,
            intent = %entry.intent_id,
            phase = ?entry.phase,
            "journal entry appended"
        );
        Ok(entry.sequence)
    }

    /// Path of the journal on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry in append order.
    pub fn entries(&self) -> Result<Vec<JournalEntry>> {
        read_entries(&self.path)
    }

    /// Rewrite the journal keeping only the intent lines that are still open.
    ///
    /// Sequence numbers keep counting from where they were. Returns the
    /// number of lines dropped.
    pub fn compact(&self) -> Result<usize> {
        let mut guard = self.writer.lock();
        guard.writer.flush()?;

        let entries = read_entries(&self.path)?;
        let total = entries.len();
        let open: BTreeSet<Uuid> = open_intents(entries.clone())
            .into_iter()
            .map(|intent| intent.intent_id)
            .collect();

        let staging = staging_path(&self.path);
        let mut kept = 0usize;
        {
            let mut writer = BufWriter::new(File::create(&staging)?);
            write_header(&mut writer)?;
            for entry in entries
                .iter()
                .filter(|entry| !entry.phase.is_terminal() && open.contains(&entry.intent_id))
            {
                serde_json::to_writer(&mut writer, entry)?;
                writer.write_all(b"\n")?;
                kept += 1;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&staging, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        guard.writer = BufWriter::new(file);
        let removed = total - kept;
        debug!(kept, removed, path = %self.path.display(), "journal compacted");
        Ok(removed)
    }

    /// Intents without a terminal entry, oldest first.
    pub fn pending(&self) -> Result<Vec<PendingIntent>> {
        Ok(open_intents(read_entries(&self.path)?))
    }
}

fn open_intents(entries: Vec<JournalEntry>) -> Vec<PendingIntent> {
    let mut open: BTreeMap<u64, PendingIntent> = BTreeMap::new();
    let mut by_id: BTreeMap<Uuid, u64> = BTreeMap::new();
    for entry in entries {
        if entry.phase.is_terminal() {
            if let Some(sequence) = by_id.remove(&entry.intent_id) {
                open.remove(&sequence);
            }
            continue;
        }
        by_id.insert(entry.intent_id, entry.sequence);
        open.insert(
            entry.sequence,
            PendingIntent {
                intent_id: entry.intent_id,
                action: entry.action,
                course_code: entry.course_code,
                student_number: entry.student_number,
                recorded_at: entry.timestamp,
            },
        );
    }
    open.into_values().collect()
}

fn write_header(writer: &mut impl Write) -> Result<()> {
    let header = JournalHeader {
        version: SNAPSHOT_VERSION,
        created_at: Utc::now(),
    };
    serde_json::to_writer(&mut *writer, &header)?;
    writer.write_all(b"\n")?;
    Ok(())
}

fn read_entries(path: &Path) -> Result<Vec<JournalEntry>> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}

fn last_sequence(path: &Path) -> Result<u64> {
    let reader = BufReader::new(File::open(path)?);
    let mut last = 0u64;
    for line in reader.lines().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<JournalEntry>(&line) {
            last = entry.sequence;
        }
    }
    Ok(last)
}

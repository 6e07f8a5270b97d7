//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Per-key async serialisation of enrollment writes."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::model::{CourseCode, StudentNumber};

type Slot = Arc<AsyncMutex<()>>;
type Table = Arc<Mutex<HashMap<String, Slot>>>;

/// Table of async mutexes addressed by string key.
///
/// Entries are created on first use and removed once no task holds or waits
/// on them.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    table: Table,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyGuard {
        let slot = {
            let mut table = self.table.lock();
            table.entry(key.to_owned()).or_default().clone()
        };
        let guard = slot.clone().lock_owned().await;
        KeyGuard {
            table: self.table.clone(),
            key: key.to_owned(),
            slot,
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited.
    pub fn active_keys(&self) -> usize {
        self.table.lock().len()
    }
}

/// Held lock on one key. Dropping it releases the key.
#[derive(Debug)]
pub struct KeyGuard {
    table: Table,
    key: String,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut table = self.table.lock();
        // One reference in the table, one in this guard: nobody else waits.
        if Arc::strong_count(&self.slot) == 2 {
            table.remove(&self.key);
        }
    }
}

/// Course and student lock tables shared by every writer of the relationship.
///
/// Writers always take course keys (in ascending order) before student keys
/// (in ascending order), which keeps multi-key acquisitions deadlock free.
#[derive(Debug, Default)]
pub struct EnrollmentLocks {
    courses: KeyedLocks,
    students: KeyedLocks,
}

impl EnrollmentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn course(&self, code: &CourseCode) -> KeyGuard {
        self.courses.lock(code.as_str()).await
    }

    pub async fn student(&self, number: &StudentNumber) -> KeyGuard {
        self.students.lock(number.as_str()).await
    }

    /// Lock several courses in ascending key order.
    pub async fn courses<'a, I>(&self, codes: I) -> Vec<KeyGuard>
    where
        I: IntoIterator<Item = &'a CourseCode>,
    {
        let mut codes: Vec<&CourseCode> = codes.into_iter().collect();
        codes.sort();
        codes.dedup();
        let mut guards = Vec::with_capacity(codes.len());
        for code in codes {
            guards.push(self.course(code).await);
        }
        guards
    }

    /// Lock several students in ascending key order.
    pub async fn students<'a, I>(&self, numbers: I) -> Vec<KeyGuard>
    where
        I: IntoIterator<Item = &'a StudentNumber>,
    {
        let mut numbers: Vec<&StudentNumber> = numbers.into_iter().collect();
        numbers.sort();
        numbers.dedup();
        let mut guards = Vec::with_capacity(numbers.len());
        for number in numbers {
            guards.push(self.student(number).await);
        }
        guards
    }

    pub fn active_keys(&self) -> usize {
        self.courses.active_keys() + self.students.active_keys()
    }
}

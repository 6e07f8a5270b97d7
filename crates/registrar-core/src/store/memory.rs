//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "In-memory entity store with optional snapshot durability."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use registrar_persistence::{load_snapshot, save_snapshot, PersistenceMetrics};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{EntityStore, StoreError, WriteFailure};
use crate::error::EntityKind;
use crate::model::{Course, CourseCode, Student, StudentNumber};

/// On-disk shape of the catalog snapshot.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogDocument {
    courses: Vec<Course>,
    students: Vec<Student>,
}

#[derive(Debug, Clone, Default)]
struct Catalog {
    courses: BTreeMap<CourseCode, Course>,
    students: BTreeMap<StudentNumber, Student>,
}

impl Catalog {
    fn document(&self) -> CatalogDocument {
        CatalogDocument {
            courses: self.courses.values().cloned().collect(),
            students: self.students.values().cloned().collect(),
        }
    }

    fn from_document(document: CatalogDocument) -> Self {
        Self {
            courses: document
                .courses
                .into_iter()
                .map(|course| (course.course_code.clone(), course))
                .collect(),
            students: document
                .students
                .into_iter()
                .map(|student| (student.student_number.clone(), student))
                .collect(),
        }
    }
}

/// Entity store backed by ordered maps behind a `parking_lot` lock.
///
/// With a snapshot path every mutation is applied to a copy, written to disk,
/// and only then made visible. A failed snapshot leaves the store unchanged.
#[derive(Debug, Default)]
pub struct MemoryStore {
    catalog: RwLock<Catalog>,
    snapshot_path: Option<PathBuf>,
    metrics: Option<Arc<PersistenceMetrics>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store persisted at `path`, loading the existing snapshot if any.
    pub fn open(
        path: impl Into<PathBuf>,
        metrics: Option<Arc<PersistenceMetrics>>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let catalog = if path.exists() {
            let document: CatalogDocument = load_snapshot(&path).map_err(|err| {
                StoreError::Backend(format!(
                    "failed to load catalog snapshot {}: {err}",
                    path.display()
                ))
            })?;
            let catalog = Catalog::from_document(document);
            info!(
                path = %path.display(),
                courses = catalog.courses.len(),
                students = catalog.students.len(),
                "catalog snapshot restored"
            );
            catalog
        } else {
            debug!(path = %path.display(), "no catalog snapshot yet");
            Catalog::default()
        };
        Ok(Self {
            catalog: RwLock::new(catalog),
            snapshot_path: Some(path),
            metrics,
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    pub fn course_count(&self) -> usize {
        self.catalog.read().courses.len()
    }

    pub fn student_count(&self) -> usize {
        self.catalog.read().students.len()
    }

    fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut Catalog) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut guard = self.catalog.write();
        let Some(path) = &self.snapshot_path else {
            return apply(&mut guard);
        };
        let mut next = guard.clone();
        let result = apply(&mut next)?;
        self.persist(&next, path)?;
        *guard = next;
        Ok(result)
    }

    fn persist(&self, catalog: &Catalog, path: &Path) -> Result<(), StoreError> {
        match save_snapshot(&catalog.document(), path) {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_snapshot_saved();
                }
                Ok(())
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_snapshot_failed();
                }
                warn!(path = %path.display(), error = %err, "catalog snapshot failed");
                Err(StoreError::Backend(format!(
                    "failed to persist catalog snapshot {}: {err}",
                    path.display()
                )))
            }
        }
    }
}

fn missing_course(code: &CourseCode) -> StoreError {
    StoreError::Missing {
        entity: EntityKind::Course,
        key: code.to_string(),
    }
}

fn missing_student(number: &StudentNumber) -> StoreError {
    StoreError::Missing {
        entity: EntityKind::Student,
        key: number.to_string(),
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn find_course(&self, code: &CourseCode) -> Result<Option<Course>, StoreError> {
        Ok(self.catalog.read().courses.get(code).cloned())
    }

    async fn find_student(&self, number: &StudentNumber) -> Result<Option<Student>, StoreError> {
        Ok(self.catalog.read().students.get(number).cloned())
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        Ok(self.catalog.read().courses.values().cloned().collect())
    }

    async fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        Ok(self.catalog.read().students.values().cloned().collect())
    }

    async fn insert_course(&self, course: Course) -> Result<Course, StoreError> {
        course.validate()?;
        self.mutate(|catalog| {
            if catalog.courses.contains_key(&course.course_code) {
                return Err(StoreError::Duplicate {
                    entity: EntityKind::Course,
                    key: course.course_code.to_string(),
                });
            }
            catalog
                .courses
                .insert(course.course_code.clone(), course.clone());
            Ok(course)
        })
    }

    async fn insert_student(&self, student: Student) -> Result<Student, StoreError> {
        student.validate()?;
        self.mutate(|catalog| {
            if catalog.students.contains_key(&student.student_number) {
                return Err(StoreError::Duplicate {
                    entity: EntityKind::Student,
                    key: student.student_number.to_string(),
                });
            }
            catalog
                .students
                .insert(student.student_number.clone(), student.clone());
            Ok(student)
        })
    }

    async fn update_course(&self, mut course: Course) -> Result<Course, StoreError> {
        course.validate()?;
        course.touch();
        self.mutate(|catalog| {
            let slot = catalog
                .courses
                .get_mut(&course.course_code)
                .ok_or_else(|| missing_course(&course.course_code))?;
            *slot = course.clone();
            Ok(course)
        })
    }

    async fn update_student(&self, mut student: Student) -> Result<Student, StoreError> {
        student.validate()?;
        student.touch();
        self.mutate(|catalog| {
            let slot = catalog
                .students
                .get_mut(&student.student_number)
                .ok_or_else(|| missing_student(&student.student_number))?;
            *slot = student.clone();
            Ok(student)
        })
    }

    async fn delete_course(&self, code: &CourseCode) -> Result<Option<Course>, StoreError> {
        self.mutate(|catalog| Ok(catalog.courses.remove(code)))
    }

    async fn delete_student(&self, number: &StudentNumber) -> Result<Option<Student>, StoreError> {
        self.mutate(|catalog| Ok(catalog.students.remove(number)))
    }

    async fn write_enrollment(&self, course: &Course, student: &Student) -> Result<(), WriteFailure> {
        let mut course = course.clone();
        let mut student = student.clone();
        course
            .validate()
            .map_err(|violation| WriteFailure::NotApplied(violation.into()))?;
        student
            .validate()
            .map_err(|violation| WriteFailure::NotApplied(violation.into()))?;
        course.touch();
        student.touch();

        self.mutate(|catalog| {
            if !catalog.courses.contains_key(&course.course_code) {
                return Err(missing_course(&course.course_code));
            }
            if !catalog.students.contains_key(&student.student_number) {
                return Err(missing_student(&student.student_number));
            }
            catalog.courses.insert(course.course_code.clone(), course);
            catalog
                .students
                .insert(student.student_number.clone(), student);
            Ok(())
        })
        .map_err(WriteFailure::NotApplied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewCourse, NewStudent};
    use crate::relation;
    use tempfile::tempdir;

    fn course(code: &str) -> Course {
        Course::new(NewCourse {
            course_code: code.into(),
            course_name: "Emerging Technologies".into(),
            description: None,
            instructor: "Dr. Smith".into(),
            credits: 3,
            capacity: 10,
            section: None,
            semester: None,
            schedule: None,
            active: None,
        })
        .unwrap()
    }

    fn student(number: &str) -> Student {
        Student::new(NewStudent {
            student_number: number.into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            address: None,
            city: None,
            phone: None,
            program: None,
            gpa: Some(3.9),
            academic_year: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn duplicate_keys_are_rejected() {
        let store = MemoryStore::new();
        store.insert_course(course("COMP308")).await.unwrap();
        let err = store.insert_course(course("comp308")).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Duplicate {
                entity: EntityKind::Course,
                key: "COMP308".into()
            }
        );
    }

    #[tokio::test]
    async fn update_rejects_invalid_documents() {
        let store = MemoryStore::new();
        let mut ada = store.insert_student(student("S1")).await.unwrap();
        ada.gpa = 7.0;
        let err = store.update_student(ada).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation { ref field, .. } if field == "gpa"));
        assert_eq!(
            store
                .find_student(&StudentNumber::parse("S1").unwrap())
                .await
                .unwrap()
                .unwrap()
                .gpa,
            3.9
        );
    }

    #[tokio::test]
    async fn update_of_unknown_entity_is_missing() {
        let store = MemoryStore::new();
        let err = store.update_course(course("COMP308")).await.unwrap_err();
        assert!(matches!(err, StoreError::Missing { .. }));
    }

    #[tokio::test]
    async fn write_enrollment_applies_both_sides() {
        let store = MemoryStore::new();
        let mut comp308 = store.insert_course(course("COMP308")).await.unwrap();
        let mut ada = store.insert_student(student("S1")).await.unwrap();
        relation::link(&mut comp308, &mut ada);

        store.write_enrollment(&comp308, &ada).await.unwrap();

        let stored_course = store.find_course(&comp308.course_code).await.unwrap().unwrap();
        let stored_student = store.find_student(&ada.student_number).await.unwrap().unwrap();
        assert!(stored_course.has_student(&ada.student_number));
        assert_eq!(stored_student.total_credits(), 3);
    }

    #[tokio::test]
    async fn write_enrollment_for_missing_student_changes_nothing() {
        let store = MemoryStore::new();
        let mut comp308 = store.insert_course(course("COMP308")).await.unwrap();
        let mut ghost = student("S404");
        relation::link(&mut comp308, &mut ghost);

        let err = store.write_enrollment(&comp308, &ghost).await.unwrap_err();
        assert!(matches!(
            err,
            WriteFailure::NotApplied(StoreError::Missing { .. })
        ));
        let stored = store.find_course(&comp308.course_code).await.unwrap().unwrap();
        assert_eq!(stored.enrollment_count(), 0);
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        {
            let store = MemoryStore::open(&path, None).unwrap();
            let mut comp308 = store.insert_course(course("COMP308")).await.unwrap();
            let mut ada = store.insert_student(student("S1")).await.unwrap();
            relation::link(&mut comp308, &mut ada);
            store.write_enrollment(&comp308, &ada).await.unwrap();
        }

        let reopened = MemoryStore::open(&path, None).unwrap();
        assert_eq!(reopened.course_count(), 1);
        let ada = reopened
            .find_student(&StudentNumber::parse("S1").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(ada.holds_course(&CourseCode::parse("COMP308").unwrap()));
    }

    #[tokio::test]
    async fn failed_snapshot_leaves_store_unchanged() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let store = MemoryStore::open(blocker.join("catalog.json"), None).unwrap();

        let err = store.insert_course(course("COMP308")).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(store.course_count(), 0);
    }
}

//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Entity store seam for students and courses."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use async_trait::async_trait;
use thiserror::Error;

use crate::error::{EntityKind, FieldViolation};
use crate::model::{Course, CourseCode, Student, StudentNumber};

mod memory;

pub use memory::MemoryStore;

/// Failures reported by an [`EntityStore`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("validation failed for {field}: {message}")]
    Validation { field: String, message: String },
    #[error("{entity} {key} already exists")]
    Duplicate { entity: EntityKind, key: String },
    #[error("{entity} {key} not found")]
    Missing { entity: EntityKind, key: String },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<FieldViolation> for StoreError {
    fn from(violation: FieldViolation) -> Self {
        StoreError::Validation {
            field: violation.field,
            message: violation.message,
        }
    }
}

/// Failure of a two-entity enrollment write.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WriteFailure {
    /// The first write failed; neither entity changed.
    #[error("enrollment write not applied: {0}")]
    NotApplied(StoreError),
    /// `written` was stored but the other side failed.
    #[error("{written} written but the other side failed: {source}")]
    Partial {
        written: EntityKind,
        source: StoreError,
    },
}

/// Persistence for students and courses, addressed by business key.
///
/// Inserts and updates validate field constraints. Updates bump
/// `updated_at` and return the stored entity.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    async fn find_course(&self, code: &CourseCode) -> Result<Option<Course>, StoreError>;

    async fn find_student(&self, number: &StudentNumber) -> Result<Option<Student>, StoreError>;

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError>;

    async fn list_students(&self) -> Result<Vec<Student>, StoreError>;

    async fn insert_course(&self, course: Course) -> Result<Course, StoreError>;

    async fn insert_student(&self, student: Student) -> Result<Student, StoreError>;

    async fn update_course(&self, course: Course) -> Result<Course, StoreError>;

    async fn update_student(&self, student: Student) -> Result<Student, StoreError>;

    /// Remove a course, returning it if it existed.
    async fn delete_course(&self, code: &CourseCode) -> Result<Option<Course>, StoreError>;

    /// Remove a student, returning it if it existed.
    async fn delete_student(&self, number: &StudentNumber) -> Result<Option<Student>, StoreError>;

    /// Persist both sides of an enrollment change.
    ///
    /// The default writes the course, then the student, and reports which
    /// side landed if the second write fails. Stores that can write both
    /// atomically should override it.
    async fn write_enrollment(&self, course: &Course, student: &Student) -> Result<(), WriteFailure> {
        self.update_course(course.clone())
            .await
            .map_err(WriteFailure::NotApplied)?;
        self.update_student(student.clone())
            .await
            .map_err(|source| WriteFailure::Partial {
                written: EntityKind::Course,
                source,
            })?;
        Ok(())
    }
}

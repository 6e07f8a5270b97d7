//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Enrollment error taxonomy and stable error kinds."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Which side of the enrollment relationship an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Course,
    Student,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Course => "course",
            EntityKind::Student => "student",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Messages read "Course COMP308 not found".
        match self {
            EntityKind::Course => f.write_str("Course"),
            EntityKind::Student => f.write_str("Student"),
        }
    }
}

/// A single field constraint violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Outcome of every failed enrollment operation.
///
/// Business-rule rejections (`CourseFull`, `AlreadyEnrolled`, ...) leave both
/// entities untouched. Only `PartialEnrollmentFailure` signals that a write
/// reached the store for one side but not the other.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnrollmentError {
    #[error("{entity} {key} not found")]
    NotFound { entity: EntityKind, key: String },

    #[error("Course {course_code} is full ({capacity} seats)")]
    CourseFull { course_code: String, capacity: u32 },

    #[error("Student {student_number} is already enrolled in {course_code}")]
    AlreadyEnrolled {
        course_code: String,
        student_number: String,
    },

    #[error("Student {student_number} is not enrolled in {course_code}")]
    NotEnrolled {
        course_code: String,
        student_number: String,
    },

    #[error(
        "Student cannot enroll. Would exceed maximum credits ({limit}): \
         {current} enrolled, course carries {requested}"
    )]
    CreditLimitExceeded {
        current: u32,
        requested: u32,
        limit: u32,
    },

    #[error("Course {course_code} is not accepting enrollments")]
    CourseInactive { course_code: String },

    #[error("Validation failed for {field}: {message}")]
    ValidationFailed { field: String, message: String },

    #[error("{entity} {key} already exists")]
    Conflict { entity: EntityKind, key: String },

    #[error(
        "Enrollment of {student_number} in {course_code} was only partially written \
         ({}): {reason}",
        rollback_label(.compensated)
    )]
    PartialEnrollmentFailure {
        course_code: String,
        student_number: String,
        reason: String,
        compensated: bool,
    },

    #[error("Store error: {0}")]
    Store(String),
}

fn rollback_label(compensated: &bool) -> &'static str {
    if *compensated {
        "rolled back"
    } else {
        "rollback failed"
    }
}

/// Stable, serialisable discriminant of [`EnrollmentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    CourseFull,
    AlreadyEnrolled,
    NotEnrolled,
    CreditLimitExceeded,
    CourseInactive,
    ValidationFailed,
    Conflict,
    PartialEnrollmentFailure,
    Store,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::CourseFull => "course_full",
            ErrorKind::AlreadyEnrolled => "already_enrolled",
            ErrorKind::NotEnrolled => "not_enrolled",
            ErrorKind::CreditLimitExceeded => "credit_limit_exceeded",
            ErrorKind::CourseInactive => "course_inactive",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PartialEnrollmentFailure => "partial_enrollment_failure",
            ErrorKind::Store => "store",
        }
    }

    /// Rejections produced by the rule engine, as opposed to lookup, input or
    /// infrastructure failures.
    pub fn is_rule_violation(self) -> bool {
        matches!(
            self,
            ErrorKind::CourseFull
                | ErrorKind::AlreadyEnrolled
                | ErrorKind::NotEnrolled
                | ErrorKind::CreditLimitExceeded
                | ErrorKind::CourseInactive
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EnrollmentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnrollmentError::NotFound { .. } => ErrorKind::NotFound,
            EnrollmentError::CourseFull { .. } => ErrorKind::CourseFull,
            EnrollmentError::AlreadyEnrolled { .. } => ErrorKind::AlreadyEnrolled,
            EnrollmentError::NotEnrolled { .. } => ErrorKind::NotEnrolled,
            EnrollmentError::CreditLimitExceeded { .. } => ErrorKind::CreditLimitExceeded,
            EnrollmentError::CourseInactive { .. } => ErrorKind::CourseInactive,
            EnrollmentError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            EnrollmentError::Conflict { .. } => ErrorKind::Conflict,
            EnrollmentError::PartialEnrollmentFailure { .. } => {
                ErrorKind::PartialEnrollmentFailure
            }
            EnrollmentError::Store(_) => ErrorKind::Store,
        }
    }

    pub fn course_not_found(code: impl fmt::Display) -> Self {
        EnrollmentError::NotFound {
            entity: EntityKind::Course,
            key: code.to_string(),
        }
    }

    pub fn student_not_found(number: impl fmt::Display) -> Self {
        EnrollmentError::NotFound {
            entity: EntityKind::Student,
            key: number.to_string(),
        }
    }
}

impl From<FieldViolation> for EnrollmentError {
    fn from(violation: FieldViolation) -> Self {
        EnrollmentError::ValidationFailed {
            field: violation.field,
            message: violation.message,
        }
    }
}

impl From<StoreError> for EnrollmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation { field, message } => {
                EnrollmentError::ValidationFailed { field, message }
            }
            StoreError::Duplicate { entity, key } => EnrollmentError::Conflict { entity, key },
            StoreError::Missing { entity, key } => EnrollmentError::NotFound { entity, key },
            other @ StoreError::Backend(_) => EnrollmentError::Store(other.to_string()),
        }
    }
}

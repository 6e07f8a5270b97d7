//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Enrollment event descriptor and notification naming."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Course, CourseCode, CourseStatus, Student};

/// Broadcast to every listener after each enrollment change.
pub const ENROLLMENT_CHANGED: &str = "enrollment-changed";
/// Published to the course room after each enrollment change.
pub const COURSE_UPDATED: &str = "course-updated";
/// Broadcast and published to the room when a course is removed.
pub const COURSE_DELETED: &str = "course-deleted";
/// Relayed to a room when a client reports a capacity change.
pub const CAPACITY_CHANGED: &str = "capacity-changed";

/// Notification topic for a single course.
pub fn course_room(code: &CourseCode) -> String {
    format!("course-{code}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentAction {
    Enrolled,
    Dropped,
}

impl EnrollmentAction {
    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentAction::Enrolled => "enrolled",
            EnrollmentAction::Dropped => "dropped",
        }
    }
}

impl fmt::Display for EnrollmentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a course's seat situation right after one student changed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentEvent {
    pub course_code: CourseCode,
    pub course_name: String,
    pub enrollment_count: u32,
    pub capacity: u32,
    pub available_seats: u32,
    pub enrollment_percentage: u32,
    pub status: CourseStatus,
    pub student_name: String,
    pub student_number: String,
    pub action: EnrollmentAction,
}

impl EnrollmentEvent {
    pub fn new(course: &Course, student: &Student, action: EnrollmentAction) -> Self {
        Self {
            course_code: course.course_code.clone(),
            course_name: course.course_name.clone(),
            enrollment_count: course.enrollment_count(),
            capacity: course.capacity,
            available_seats: course.available_seats(),
            enrollment_percentage: course.enrollment_percentage(),
            status: course.status(),
            student_name: student.full_name(),
            student_number: student.student_number.to_string(),
            action,
        }
    }

    pub fn room(&self) -> String {
        course_room(&self.course_code)
    }
}

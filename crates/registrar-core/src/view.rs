//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Serialisable read models with derived attributes."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Course, CourseCode, CourseStatus, Schedule, Student, StudentNumber};

/// A course with every derived attribute materialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseView {
    pub course_code: CourseCode,
    pub course_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub instructor: String,
    pub credits: u32,
    pub capacity: u32,
    pub section: String,
    pub semester: String,
    pub schedule: Schedule,
    pub active: bool,
    pub enrollment_count: u32,
    pub available_seats: u32,
    pub enrollment_percentage: u32,
    pub status: CourseStatus,
    pub enrolled_students: Vec<StudentNumber>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Course> for CourseView {
    fn from(course: &Course) -> Self {
        Self {
            course_code: course.course_code.clone(),
            course_name: course.course_name.clone(),
            description: course.description.clone(),
            instructor: course.instructor.clone(),
            credits: course.credits,
            capacity: course.capacity,
            section: course.section.clone(),
            semester: course.semester.clone(),
            schedule: course.schedule.clone(),
            active: course.active,
            enrollment_count: course.enrollment_count(),
            available_seats: course.available_seats(),
            enrollment_percentage: course.enrollment_percentage(),
            status: course.status(),
            enrolled_students: course.enrolled_students().iter().cloned().collect(),
            created_at: course.created_at,
            updated_at: course.updated_at,
        }
    }
}

/// A student with `fullName` and `totalCredits` materialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    pub student_number: StudentNumber,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    pub gpa: f64,
    pub academic_year: String,
    pub total_credits: u32,
    pub enrolled_courses: Vec<CourseCode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Student> for StudentView {
    fn from(student: &Student) -> Self {
        Self {
            student_number: student.student_number.clone(),
            first_name: student.first_name.clone(),
            last_name: student.last_name.clone(),
            full_name: student.full_name(),
            email: student.email.clone(),
            address: student.address.clone(),
            city: student.city.clone(),
            phone: student.phone.clone(),
            program: student.program.clone(),
            gpa: student.gpa,
            academic_year: student.academic_year.clone(),
            total_credits: student.total_credits(),
            enrolled_courses: student.enrolled_course_codes().cloned().collect(),
            created_at: student.created_at,
            updated_at: student.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub first_name: String,
    pub last_name: String,
    pub student_number: StudentNumber,
    pub email: String,
}

impl From<&Student> for StudentSummary {
    fn from(student: &Student) -> Self {
        Self {
            first_name: student.first_name.clone(),
            last_name: student.last_name.clone(),
            student_number: student.student_number.clone(),
            email: student.email.clone(),
        }
    }
}

/// Seat situation of one course and who holds the seats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStatusReport {
    pub course_code: CourseCode,
    pub course_name: String,
    pub enrollment_count: u32,
    pub capacity: u32,
    pub available_seats: u32,
    pub enrollment_percentage: u32,
    pub status: CourseStatus,
    pub enrolled_students: Vec<StudentSummary>,
    pub instructor: String,
    pub credits: u32,
    pub schedule: Schedule,
}

impl CourseStatusReport {
    pub fn new(course: &Course, enrolled_students: Vec<StudentSummary>) -> Self {
        Self {
            course_code: course.course_code.clone(),
            course_name: course.course_name.clone(),
            enrollment_count: course.enrollment_count(),
            capacity: course.capacity,
            available_seats: course.available_seats(),
            enrollment_percentage: course.enrollment_percentage(),
            status: course.status(),
            enrolled_students,
            instructor: course.instructor.clone(),
            credits: course.credits,
            schedule: course.schedule.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStanding {
    pub first_name: String,
    pub last_name: String,
    pub student_number: StudentNumber,
    pub total_credits: u32,
    pub academic_year: String,
    pub gpa: f64,
}

impl From<&Student> for StudentStanding {
    fn from(student: &Student) -> Self {
        Self {
            first_name: student.first_name.clone(),
            last_name: student.last_name.clone(),
            student_number: student.student_number.clone(),
            total_credits: student.total_credits(),
            academic_year: student.academic_year.clone(),
            gpa: student.gpa,
        }
    }
}

/// A student's standing and the courses they hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentCoursesReport {
    pub student: StudentStanding,
    pub enrolled_courses: Vec<CourseView>,
}

/// Catalog-wide seat totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentStats {
    pub total_courses: usize,
    pub total_capacity: u64,
    pub total_enrolled: u64,
    pub average_enrollment: f64,
}

impl EnrollmentStats {
    pub fn from_courses<'a>(courses: impl IntoIterator<Item = &'a Course>) -> Self {
        let mut stats = Self {
            total_courses: 0,
            total_capacity: 0,
            total_enrolled: 0,
            average_enrollment: 0.0,
        };
        for course in courses {
            stats.total_courses += 1;
            stats.total_capacity += u64::from(course.capacity);
            stats.total_enrolled += u64::from(course.enrollment_count());
        }
        if stats.total_courses > 0 {
            let average = stats.total_enrolled as f64 / stats.total_courses as f64;
            stats.average_enrollment = (average * 100.0).round() / 100.0;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewCourse, StudentNumber};

    fn course(code: &str, capacity: u32, enrolled: &[&str]) -> Course {
        let mut course = Course::new(NewCourse {
            course_code: code.into(),
            course_name: "Lecture".into(),
            description: None,
            instructor: "Dr. Smith".into(),
            credits: 3,
            capacity,
            section: None,
            semester: None,
            schedule: None,
            active: None,
        })
        .unwrap();
        for number in enrolled {
            course.attach_student(StudentNumber::parse(number).unwrap());
        }
        course
    }

    #[test]
    fn stats_are_zero_for_an_empty_catalog() {
        let stats = EnrollmentStats::from_courses(std::iter::empty());
        assert_eq!(stats.total_courses, 0);
        assert_eq!(stats.average_enrollment, 0.0);
    }

    #[test]
    fn average_is_rounded_to_two_places() {
        let courses = [
            course("A", 10, &["1"]),
            course("B", 10, &["1", "2"]),
            course("C", 10, &["1", "2"]),
        ];
        let stats = EnrollmentStats::from_courses(&courses);
        assert_eq!(stats.total_courses, 3);
        assert_eq!(stats.total_capacity, 30);
        assert_eq!(stats.total_enrolled, 5);
        assert_eq!(stats.average_enrollment, 1.67);
    }

    #[test]
    fn course_view_serialises_derived_fields() {
        let view = CourseView::from(&course("COMP308", 5, &["1", "2", "3", "4"]));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["enrollmentCount"], 4);
        assert_eq!(json["availableSeats"], 1);
        assert_eq!(json["enrollmentPercentage"], 80);
        assert_eq!(json["status"], "Almost Full");
    }
}

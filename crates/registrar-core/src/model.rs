//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Student and course entities, business keys and field constraints."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FieldViolation;

pub const MIN_CREDITS: u32 = 1;
pub const MAX_CREDITS: u32 = 4;
pub const MAX_GPA: f64 = 4.0;
pub const DEFAULT_SECTION: &str = "001";
pub const DEFAULT_SEMESTER: &str = "Fall 2024";
pub const DEFAULT_ACADEMIC_YEAR: &str = "2024-2025";

/// Business key of a course: trimmed, upper-cased, `[A-Z0-9-]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CourseCode(String);

impl CourseCode {
    pub fn parse(raw: &str) -> Result<Self, FieldViolation> {
        let code = raw.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(FieldViolation::new("courseCode", "is required"));
        }
        if !code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(FieldViolation::new(
                "courseCode",
                format!("`{code}` may only contain letters, digits and '-'"),
            ));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CourseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CourseCode {
    type Err = FieldViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CourseCode {
    type Error = FieldViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CourseCode> for String {
    fn from(code: CourseCode) -> Self {
        code.0
    }
}

/// Business key of a student: trimmed, non-empty, no inner whitespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StudentNumber(String);

impl StudentNumber {
    pub fn parse(raw: &str) -> Result<Self, FieldViolation> {
        let number = raw.trim();
        if number.is_empty() {
            return Err(FieldViolation::new("studentNumber", "is required"));
        }
        if number.chars().any(char::is_whitespace) {
            return Err(FieldViolation::new(
                "studentNumber",
                "must not contain whitespace",
            ));
        }
        Ok(Self(number.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StudentNumber {
    type Err = FieldViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StudentNumber {
    type Error = FieldViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StudentNumber> for String {
    fn from(number: StudentNumber) -> Self {
        number.0
    }
}

/// The pair of keys every enrollment operation is addressed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnrollmentKey {
    pub course_code: CourseCode,
    pub student_number: StudentNumber,
}

impl EnrollmentKey {
    pub fn new(course_code: CourseCode, student_number: StudentNumber) -> Self {
        Self {
            course_code,
            student_number,
        }
    }

    /// Parse raw request input; the course key is checked first.
    pub fn parse(course_code: &str, student_number: &str) -> Result<Self, FieldViolation> {
        Ok(Self {
            course_code: CourseCode::parse(course_code)?,
            student_number: StudentNumber::parse(student_number)?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

/// Seat availability bucket derived from enrollment count and capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CourseStatus {
    #[serde(rename = "Available")]
    Available,
    #[serde(rename = "Almost Full")]
    AlmostFull,
    #[serde(rename = "Full")]
    Full,
}

impl CourseStatus {
    pub fn evaluate(enrollment_count: u32, capacity: u32) -> Self {
        let count = u64::from(enrollment_count);
        let capacity = u64::from(capacity);
        if count >= capacity {
            CourseStatus::Full
        } else if count * 5 >= capacity * 4 {
            // count >= 0.8 * capacity without floating point.
            CourseStatus::AlmostFull
        } else {
            CourseStatus::Available
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CourseStatus::Available => "Available",
            CourseStatus::AlmostFull => "Almost Full",
            CourseStatus::Full => "Full",
        }
    }
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A course offering.
///
/// The enrolled-student set is private: it only changes through the
/// crate's link/unlink operations so both sides of the relationship move
/// together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub course_code: CourseCode,
    pub course_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub instructor: String,
    pub credits: u32,
    pub capacity: u32,
    pub section: String,
    pub semester: String,
    #[serde(default)]
    pub schedule: Schedule,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    enrolled_students: BTreeSet<StudentNumber>,
}

impl Course {
    /// Build a new course with defaults applied and constraints checked.
    pub fn new(input: NewCourse) -> Result<Self, FieldViolation> {
        let now = Utc::now();
        let course = Self {
            course_code: CourseCode::parse(&input.course_code)?,
            course_name: input.course_name.trim().to_owned(),
            description: input.description,
            instructor: input.instructor.trim().to_owned(),
            credits: input.credits,
            capacity: input.capacity,
            section: input
                .section
                .unwrap_or_else(|| DEFAULT_SECTION.to_owned()),
            semester: input
                .semester
                .unwrap_or_else(|| DEFAULT_SEMESTER.to_owned()),
            schedule: input.schedule.unwrap_or_default(),
            active: input.active.unwrap_or(true),
            created_at: now,
            updated_at: now,
            enrolled_students: BTreeSet::new(),
        };
        course.validate()?;
        Ok(course)
    }

    pub fn enrollment_count(&self) -> u32 {
        u32::try_from(self.enrolled_students.len()).unwrap_or(u32::MAX)
    }

    pub fn available_seats(&self) -> u32 {
        self.capacity.saturating_sub(self.enrollment_count())
    }

    pub fn enrollment_percentage(&self) -> u32 {
        if self.capacity == 0 {
            return 0;
        }
        (f64::from(self.enrollment_count()) * 100.0 / f64::from(self.capacity)).round() as u32
    }

    pub fn status(&self) -> CourseStatus {
        CourseStatus::evaluate(self.enrollment_count(), self.capacity)
    }

    pub fn is_full(&self) -> bool {
        self.enrollment_count() >= self.capacity
    }

    pub fn has_student(&self, number: &StudentNumber) -> bool {
        self.enrolled_students.contains(number)
    }

    pub fn enrolled_students(&self) -> &BTreeSet<StudentNumber> {
        &self.enrolled_students
    }

    /// Apply an administrative update. Credits are not updatable: they are
    /// captured on every enrolled student's reference.
    pub fn apply(&mut self, update: CourseUpdate) {
        if let Some(name) = update.course_name {
            self.course_name = name.trim().to_owned();
        }
        if let Some(instructor) = update.instructor {
            self.instructor = instructor.trim().to_owned();
        }
        if let Some(capacity) = update.capacity {
            self.capacity = capacity;
        }
        if let Some(description) = update.description {
            self.description = Some(description);
        }
        if let Some(section) = update.section {
            self.section = section;
        }
        if let Some(semester) = update.semester {
            self.semester = semester;
        }
        if let Some(schedule) = update.schedule {
            self.schedule = schedule;
        }
        if let Some(active) = update.active {
            self.active = active;
        }
    }

    pub fn validate(&self) -> Result<(), FieldViolation> {
        require("courseName", &self.course_name)?;
        require("instructor", &self.instructor)?;
        if !(MIN_CREDITS..=MAX_CREDITS).contains(&self.credits) {
            return Err(FieldViolation::new(
                "credits",
                format!("must be between {MIN_CREDITS} and {MAX_CREDITS}"),
            ));
        }
        if self.capacity < 1 {
            return Err(FieldViolation::new("capacity", "must be at least 1"));
        }
        if self.enrollment_count() > self.capacity {
            return Err(FieldViolation::new(
                "capacity",
                format!(
                    "cannot be lower than the current enrollment of {}",
                    self.enrollment_count()
                ),
            ));
        }
        Ok(())
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub(crate) fn attach_student(&mut self, number: StudentNumber) -> bool {
        self.enrolled_students.insert(number)
    }

    pub(crate) fn detach_student(&mut self, number: &StudentNumber) -> bool {
        self.enrolled_students.remove(number)
    }
}

/// A registered student.
///
/// `enrolled_courses` maps each held course to the credit weight captured
/// when the student enrolled; [`Student::total_credits`] is derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub student_number: StudentNumber,
    pub first_name: String,
    pub last_name: String,
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
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    enrolled_courses: BTreeMap<CourseCode, u32>,
}

impl Student {
    pub fn new(input: NewStudent) -> Result<Self, FieldViolation> {
        let now = Utc::now();
        let student = Self {
            student_number: StudentNumber::parse(&input.student_number)?,
            first_name: input.first_name.trim().to_owned(),
            last_name: input.last_name.trim().to_owned(),
            email: normalise_email(&input.email),
            address: input.address,
            city: input.city,
            phone: input.phone,
            program: input.program,
            gpa: input.gpa.unwrap_or(0.0),
            academic_year: input
                .academic_year
                .unwrap_or_else(|| DEFAULT_ACADEMIC_YEAR.to_owned()),
            created_at: now,
            updated_at: now,
            enrolled_courses: BTreeMap::new(),
        };
        student.validate()?;
        Ok(student)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn total_credits(&self) -> u32 {
        self.enrolled_courses.values().sum()
    }

    pub fn holds_course(&self, code: &CourseCode) -> bool {
        self.enrolled_courses.contains_key(code)
    }

    pub fn credits_for(&self, code: &CourseCode) -> Option<u32> {
        self.enrolled_courses.get(code).copied()
    }

    pub fn enrolled_course_codes(&self) -> impl Iterator<Item = &CourseCode> + '_ {
        self.enrolled_courses.keys()
    }

    pub fn enrolled_course_count(&self) -> usize {
        self.enrolled_courses.len()
    }

    pub fn apply(&mut self, update: StudentUpdate) {
        if let Some(first_name) = update.first_name {
            self.first_name = first_name.trim().to_owned();
        }
        if let Some(last_name) = update.last_name {
            self.last_name = last_name.trim().to_owned();
        }
        if let Some(email) = update.email {
            self.email = normalise_email(&email);
        }
        if let Some(address) = update.address {
            self.address = Some(address);
        }
        if let Some(city) = update.city {
            self.city = Some(city);
        }
        if let Some(phone) = update.phone {
            self.phone = Some(phone);
        }
        if let Some(program) = update.program {
            self.program = Some(program);
        }
        if let Some(gpa) = update.gpa {
            self.gpa = gpa;
        }
        if let Some(academic_year) = update.academic_year {
            self.academic_year = academic_year;
        }
    }

    pub fn validate(&self) -> Result<(), FieldViolation> {
        require("firstName", &self.first_name)?;
        require("lastName", &self.last_name)?;
        require("email", &self.email)?;
        if !is_valid_email(&self.email) {
            return Err(FieldViolation::new(
                "email",
                "Please enter a valid email",
            ));
        }
        if !(0.0..=MAX_GPA).contains(&self.gpa) {
            return Err(FieldViolation::new(
                "gpa",
                format!("must be between 0 and {MAX_GPA}"),
            ));
        }
        Ok(())
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub(crate) fn attach_course(&mut self, code: CourseCode, credits: u32) -> bool {
        self.enrolled_courses.insert(code, credits).is_none()
    }

    pub(crate) fn detach_course(&mut self, code: &CourseCode) -> bool {
        self.enrolled_courses.remove(code).is_some()
    }
}

/// Creation payload for a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCourse {
    pub course_code: String,
    pub course_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub instructor: String,
    pub credits: u32,
    pub capacity: u32,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub semester: Option<String>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// Partial update of a course; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseUpdate {
    #[serde(default)]
    pub course_name: Option<String>,
    #[serde(default)]
    pub instructor: Option<String>,
    #[serde(default)]
    pub capacity: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub semester: Option<String>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// Creation payload for a student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStudent {
    pub student_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub gpa: Option<f64>,
    #[serde(default)]
    pub academic_year: Option<String>,
}

/// Partial update of a student; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentUpdate {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub gpa: Option<f64>,
    #[serde(default)]
    pub academic_year: Option<String>,
}

fn require(field: &str, value: &str) -> Result<(), FieldViolation> {
    if value.trim().is_empty() {
        return Err(FieldViolation::new(field, "is required"));
    }
    Ok(())
}

fn normalise_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => {
            !host.is_empty()
                && (2..=3).contains(&tld.len())
                && tld.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn course(capacity: u32) -> Course {
        Course::new(NewCourse {
            course_code: " comp308 ".into(),
            course_name: "Emerging Technologies".into(),
            description: None,
            instructor: "Dr. Smith".into(),
            credits: 3,
            capacity,
            section: None,
            semester: None,
            schedule: None,
            active: None,
        })
        .unwrap()
    }

    fn number(raw: &str) -> StudentNumber {
        StudentNumber::parse(raw).unwrap()
    }

    #[test]
    fn course_code_is_normalised() {
        let code = CourseCode::parse("  comp-308 ").unwrap();
        assert_eq!(code.as_str(), "COMP-308");
        assert!(CourseCode::parse("   ").is_err());
        assert_eq!(
            CourseCode::parse("COMP 308").unwrap_err().field,
            "courseCode"
        );
    }

    #[test]
    fn new_course_applies_defaults() {
        let course = course(10);
        assert_eq!(course.course_code.as_str(), "COMP308");
        assert_eq!(course.section, DEFAULT_SECTION);
        assert_eq!(course.semester, DEFAULT_SEMESTER);
        assert!(course.active);
        assert_eq!(course.enrollment_count(), 0);
        assert_eq!(course.available_seats(), 10);
        assert_eq!(course.status(), CourseStatus::Available);
    }

    #[test]
    fn status_thresholds_are_inclusive() {
        assert_eq!(CourseStatus::evaluate(7, 10), CourseStatus::Available);
        assert_eq!(CourseStatus::evaluate(8, 10), CourseStatus::AlmostFull);
        assert_eq!(CourseStatus::evaluate(9, 10), CourseStatus::AlmostFull);
        assert_eq!(CourseStatus::evaluate(10, 10), CourseStatus::Full);
        assert_eq!(CourseStatus::evaluate(1, 1), CourseStatus::Full);
        assert_eq!(
            serde_json::to_string(&CourseStatus::AlmostFull).unwrap(),
            "\"Almost Full\""
        );
    }

    #[test]
    fn percentage_is_rounded() {
        let mut course = course(3);
        course.attach_student(number("A"));
        assert_eq!(course.enrollment_percentage(), 33);
        course.attach_student(number("B"));
        assert_eq!(course.enrollment_percentage(), 67);
    }

    #[test]
    fn capacity_below_enrollment_is_rejected() {
        let mut course = course(2);
        course.attach_student(number("A"));
        course.attach_student(number("B"));
        course.apply(CourseUpdate {
            capacity: Some(1),
            ..CourseUpdate::default()
        });
        assert_eq!(course.validate().unwrap_err().field, "capacity");
    }

    #[test]
    fn course_field_ranges_are_checked() {
        let mut input = NewCourse {
            course_code: "COMP308".into(),
            course_name: "Emerging Technologies".into(),
            description: None,
            instructor: "Dr. Smith".into(),
            credits: 5,
            capacity: 10,
            section: None,
            semester: None,
            schedule: None,
            active: None,
        };
        assert_eq!(Course::new(input.clone()).unwrap_err().field, "credits");
        input.credits = 3;
        input.capacity = 0;
        assert_eq!(Course::new(input.clone()).unwrap_err().field, "capacity");
        input.capacity = 10;
        input.instructor = " ".into();
        assert_eq!(Course::new(input).unwrap_err().field, "instructor");
    }

    #[test]
    fn student_credits_are_derived_from_references() {
        let mut student = Student::new(NewStudent {
            student_number: "300100200".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: " Ada@Example.COM ".into(),
            address: None,
            city: None,
            phone: None,
            program: None,
            gpa: None,
            academic_year: None,
        })
        .unwrap();
        assert_eq!(student.email, "ada@example.com");
        assert_eq!(student.full_name(), "Ada Lovelace");
        assert_eq!(student.academic_year, DEFAULT_ACADEMIC_YEAR);

        let comp308 = CourseCode::parse("COMP308").unwrap();
        let comp229 = CourseCode::parse("COMP229").unwrap();
        assert!(student.attach_course(comp308.clone(), 3));
        assert!(student.attach_course(comp229.clone(), 4));
        assert!(!student.attach_course(comp229.clone(), 4));
        assert_eq!(student.total_credits(), 7);
        assert!(student.detach_course(&comp308));
        assert_eq!(student.total_credits(), 4);
        assert!(!student.detach_course(&comp308));
    }

    #[test]
    fn student_email_and_gpa_are_validated() {
        let input = NewStudent {
            student_number: "1".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "not-an-email".into(),
            address: None,
            city: None,
            phone: None,
            program: None,
            gpa: None,
            academic_year: None,
        };
        assert_eq!(Student::new(input.clone()).unwrap_err().field, "email");

        let input = NewStudent {
            email: "ada@example.com".into(),
            gpa: Some(4.5),
            ..input
        };
        assert_eq!(Student::new(input).unwrap_err().field, "gpa");
    }

    #[test]
    fn entities_roundtrip_through_json() {
        let mut course = course(5);
        course.attach_student(number("300100200"));
        let json = serde_json::to_value(&course).unwrap();
        assert_eq!(json["courseCode"], "COMP308");
        assert_eq!(json["enrolledStudents"][0], "300100200");
        let back: Course = serde_json::from_value(json).unwrap();
        assert_eq!(back, course);
    }
}

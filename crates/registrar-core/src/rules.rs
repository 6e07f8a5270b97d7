//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Pure enrollment and drop rules."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use crate::error::EnrollmentError;
use crate::event::{EnrollmentAction, EnrollmentEvent};
use crate::model::{Course, EnrollmentKey, Student};
use crate::relation;

/// Default maximum credits a student may carry.
pub const DEFAULT_CREDIT_LIMIT: u32 = 18;

/// Result of a permitted transition: updated copies of both entities plus the
/// event describing the change. The inputs are never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub course: Course,
    pub student: Student,
    pub event: EnrollmentEvent,
}

/// Decides whether a student may enroll in or drop a course.
///
/// Preconditions are checked in a fixed order and the first failure wins:
/// existence (course before student), active flag, capacity, duplicate
/// enrollment, credit limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleEngine {
    credit_limit: Option<u32>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(Some(DEFAULT_CREDIT_LIMIT))
    }
}

impl RuleEngine {
    /// `None` disables the credit limit.
    pub fn new(credit_limit: Option<u32>) -> Self {
        Self { credit_limit }
    }

    pub fn credit_limit(&self) -> Option<u32> {
        self.credit_limit
    }

    pub fn enroll(
        &self,
        key: &EnrollmentKey,
        student: Option<&Student>,
        course: Option<&Course>,
    ) -> Result<Transition, EnrollmentError> {
        let (course, student) = resolve(key, student, course)?;

        if !course.active {
            return Err(EnrollmentError::CourseInactive {
                course_code: course.course_code.to_string(),
            });
        }
        if course.is_full() {
            return Err(EnrollmentError::CourseFull {
                course_code: course.course_code.to_string(),
                capacity: course.capacity,
            });
        }
        if student.holds_course(&course.course_code) || course.has_student(&student.student_number)
        {
            return Err(EnrollmentError::AlreadyEnrolled {
                course_code: course.course_code.to_string(),
                student_number: student.student_number.to_string(),
            });
        }
        if let Some(limit) = self.credit_limit {
            let current = student.total_credits();
            if current + course.credits > limit {
                return Err(EnrollmentError::CreditLimitExceeded {
                    current,
                    requested: course.credits,
                    limit,
                });
            }
        }

        let mut course = course.clone();
        let mut student = student.clone();
        relation::link(&mut course, &mut student);
        Ok(transition(course, student, EnrollmentAction::Enrolled))
    }

    /// A reference held by either side is enough to drop; both sides are
    /// cleared.
    pub fn drop(
        &self,
        key: &EnrollmentKey,
        student: Option<&Student>,
        course: Option<&Course>,
    ) -> Result<Transition, EnrollmentError> {
        let (course, student) = resolve(key, student, course)?;

        if !student.holds_course(&course.course_code) && !course.has_student(&student.student_number)
        {
            return Err(EnrollmentError::NotEnrolled {
                course_code: course.course_code.to_string(),
                student_number: student.student_number.to_string(),
            });
        }

        let mut course = course.clone();
        let mut student = student.clone();
        relation::unlink(&mut course, &mut student);
        Ok(transition(course, student, EnrollmentAction::Dropped))
    }
}

fn resolve<'a>(
    key: &EnrollmentKey,
    student: Option<&'a Student>,
    course: Option<&'a Course>,
) -> Result<(&'a Course, &'a Student), EnrollmentError> {
    let course = course.ok_or_else(|| EnrollmentError::course_not_found(&key.course_code))?;
    let student =
        student.ok_or_else(|| EnrollmentError::student_not_found(&key.student_number))?;
    Ok((course, student))
}

fn transition(course: Course, student: Student, action: EnrollmentAction) -> Transition {
    let event = EnrollmentEvent::new(&course, &student, action);
    Transition {
        course,
        student,
        event,
    }
}

//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "The only mutators of the student/course enrollment relationship."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use crate::model::{Course, CourseCode, Student, StudentNumber};

/// Add the reference on both sides. The student keeps the course's credit
/// weight at the moment of enrollment.
pub(crate) fn link(course: &mut Course, student: &mut Student) {
    course.attach_student(student.student_number.clone());
    student.attach_course(course.course_code.clone(), course.credits);
}

/// Remove the reference from both sides; either side may already be missing it.
pub(crate) fn unlink(course: &mut Course, student: &mut Student) {
    course.detach_student(&student.student_number);
    student.detach_course(&course.course_code);
}

/// Remove a course's reference to a student record that no longer exists.
pub(crate) fn forget_student(course: &mut Course, number: &StudentNumber) -> bool {
    course.detach_student(number)
}

/// Remove a student's reference to a course record that no longer exists.
pub(crate) fn forget_course(student: &mut Student, code: &CourseCode) -> bool {
    student.detach_course(code)
}

/// How a one-sided reference was brought back into agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    /// Both sides agreed already.
    Consistent,
    /// Only the course held the reference; it was removed.
    DetachedFromCourse,
    /// Only the student held the reference; it was removed.
    DetachedFromStudent,
}

/// Make both sides agree by removing a reference only one side holds.
pub(crate) fn repair(course: &mut Course, student: &mut Student) -> Repair {
    let on_course = course.has_student(&student.student_number);
    let on_student = student.holds_course(&course.course_code);
    match (on_course, on_student) {
        (true, false) => {
            course.detach_student(&student.student_number);
            Repair::DetachedFromCourse
        }
        (false, true) => {
            student.detach_course(&course.course_code);
            Repair::DetachedFromStudent
        }
        _ => Repair::Consistent,
    }
}

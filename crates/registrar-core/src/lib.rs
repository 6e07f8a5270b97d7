//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Enrollment core: model, rules, orchestration and store seams."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
//! Core of the Registrar service.
//!
//! A student holds a set of courses and a course holds a set of students; the
//! two sets must always mirror each other. [`rules::RuleEngine`] decides
//! whether a change is allowed, [`orchestrator::EnrollmentOrchestrator`]
//! serialises, persists and announces it, and [`catalog::CatalogService`]
//! covers administrative CRUD with cascading deletes.

pub mod catalog;
pub mod error;
pub mod event;
pub mod locks;
pub mod model;
pub mod notify;
pub mod orchestrator;
mod relation;
pub mod rules;
pub mod store;
pub mod view;

pub use catalog::CatalogService;
pub use error::{EnrollmentError, EntityKind, ErrorKind, FieldViolation};
pub use event::{course_room, EnrollmentAction, EnrollmentEvent};
pub use model::{
    Course, CourseCode, CourseStatus, CourseUpdate, EnrollmentKey, NewCourse, NewStudent,
    Schedule, Student, StudentNumber, StudentUpdate,
};
pub use notify::{Delivery, MemorySink, NotificationSink, NullSink};
pub use orchestrator::{
    BulkEnrollmentOutcome, EnrollmentOrchestrator, EnrollmentOutcome, EnrollmentSummary,
    RecoveryReport,
};
pub use relation::Repair;
pub use rules::{RuleEngine, Transition, DEFAULT_CREDIT_LIMIT};
pub use store::{EntityStore, MemoryStore, StoreError, WriteFailure};
pub use view::{
    CourseStatusReport, CourseView, EnrollmentStats, StudentCoursesReport, StudentView,
};

//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Enrollment orchestration: locking, rule evaluation, two-sided writes and notification."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use registrar_metrics::EnrollmentMetrics;
use registrar_persistence::{EnrollmentJournal, JournalAction, JournalPhase};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::CatalogService;
use crate::error::{EntityKind, EnrollmentError};
use crate::event::{EnrollmentAction, EnrollmentEvent};
use crate::locks::EnrollmentLocks;
use crate::model::{Course, CourseCode, CourseStatus, EnrollmentKey, Student, StudentNumber};
use crate::notify::{announce_enrollment, NotificationSink};
use crate::relation::{self, Repair};
use crate::rules::{RuleEngine, Transition};
use crate::store::{EntityStore, StoreError, WriteFailure};
use crate::view::{
    CourseStatusReport, CourseView, EnrollmentStats, StudentCoursesReport, StudentSummary,
    StudentView,
};

pub const ENROLLED_MESSAGE: &str = "Student enrolled successfully";
pub const DROPPED_MESSAGE: &str = "Student dropped successfully";

/// Successful enroll or drop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentOutcome {
    pub success: bool,
    pub message: String,
    pub course: CourseView,
    pub student: StudentView,
    pub enrollment_data: EnrollmentEvent,
}

/// Per-course line of a bulk enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentSummary {
    pub success: bool,
    pub message: String,
    pub course_code: CourseCode,
    pub course_name: String,
    pub enrollment_count: u32,
    pub capacity: u32,
    pub available_seats: u32,
    pub status: CourseStatus,
}

impl From<&EnrollmentOutcome> for EnrollmentSummary {
    fn from(outcome: &EnrollmentOutcome) -> Self {
        Self {
            success: outcome.success,
            message: outcome.message.clone(),
            course_code: outcome.course.course_code.clone(),
            course_name: outcome.course.course_name.clone(),
            enrollment_count: outcome.course.enrollment_count,
            capacity: outcome.course.capacity,
            available_seats: outcome.course.available_seats,
            status: outcome.course.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEnrollmentOutcome {
    pub student_number: StudentNumber,
    pub student_name: String,
    pub total_enrolled: usize,
    /// Credits added by this call, not the student's running total.
    pub total_credits: u32,
    pub results: Vec<EnrollmentSummary>,
    pub errors: Vec<String>,
}

/// How one open journal intent was closed at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredIntent {
    pub intent_id: Uuid,
    pub course_code: String,
    pub student_number: String,
    pub phase: JournalPhase,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    pub recovered: Vec<RecoveredIntent>,
    /// Intents that could not be closed and remain open.
    pub unresolved: usize,
}

impl RecoveryReport {
    pub fn repaired(&self) -> usize {
        self.recovered
            .iter()
            .filter(|intent| intent.phase == JournalPhase::Compensated)
            .count()
    }
}

/// Coordinates every change to the enrollment relationship.
///
/// Writers of the same course, or of the same student, are serialised through
/// [`EnrollmentLocks`]; the course key is always taken first.
pub struct EnrollmentOrchestrator {
    store: Arc<dyn EntityStore>,
    sink: Arc<dyn NotificationSink>,
    rules: RuleEngine,
    locks: Arc<EnrollmentLocks>,
    journal: Option<Arc<EnrollmentJournal>>,
    metrics: Option<EnrollmentMetrics>,
}

impl fmt::Debug for EnrollmentOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrollmentOrchestrator")
            .field("rules", &self.rules)
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}

/// Identity of one in-flight two-entity write.
struct WriteContext<'a> {
    action: EnrollmentAction,
    key: &'a EnrollmentKey,
    intent: Option<Uuid>,
}

impl EnrollmentOrchestrator {
    pub fn new(
        store: Arc<dyn EntityStore>,
        sink: Arc<dyn NotificationSink>,
        rules: RuleEngine,
    ) -> Self {
        Self {
            store,
            sink,
            rules,
            locks: Arc::new(EnrollmentLocks::new()),
            journal: None,
            metrics: None,
        }
    }

    pub fn with_journal(mut self, journal: Arc<EnrollmentJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_metrics(mut self, metrics: EnrollmentMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn store(&self) -> Arc<dyn EntityStore> {
        self.store.clone()
    }

    /// Administrative surface sharing this orchestrator's store, sink and
    /// lock table.
    pub fn catalog(&self) -> CatalogService {
        let catalog =
            CatalogService::new(self.store.clone(), self.sink.clone(), self.locks.clone());
        match &self.journal {
            Some(journal) => catalog.with_journal(journal.clone()),
            None => catalog,
        }
    }

    pub async fn request_enroll(
        &self,
        course_code: &CourseCode,
        student_number: &StudentNumber,
    ) -> Result<EnrollmentOutcome, EnrollmentError> {
        let key = EnrollmentKey::new(course_code.clone(), student_number.clone());
        self.transition(EnrollmentAction::Enrolled, &key).await
    }

    pub async fn request_drop(
        &self,
        course_code: &CourseCode,
        student_number: &StudentNumber,
    ) -> Result<EnrollmentOutcome, EnrollmentError> {
        let key = EnrollmentKey::new(course_code.clone(), student_number.clone());
        self.transition(EnrollmentAction::Dropped, &key).await
    }

    /// Enroll one student in several courses, in order. Individual failures
    /// are collected as messages; only a missing student fails the call.
    pub async fn request_bulk_enroll(
        &self,
        student_number: &StudentNumber,
        course_codes: &[String],
    ) -> Result<BulkEnrollmentOutcome, EnrollmentError> {
        let student = self
            .store
            .find_student(student_number)
            .await?
            .ok_or_else(|| EnrollmentError::student_not_found(student_number))?;

        let mut results = Vec::with_capacity(course_codes.len());
        let mut errors = Vec::new();
        let mut credits_added = 0;
        for raw in course_codes {
            let code = match CourseCode::parse(raw) {
                Ok(code) => code,
                Err(violation) => {
                    errors.push(format!(
                        "Error enrolling in {raw}: {}",
                        EnrollmentError::from(violation)
                    ));
                    continue;
                }
            };
            match self.request_enroll(&code, student_number).await {
                Ok(outcome) => {
                    credits_added += outcome.course.credits;
                    let mut summary = EnrollmentSummary::from(&outcome);
                    summary.message = bulk_success_message(&code);
                    results.push(summary);
                }
                Err(err) => errors.push(bulk_error_message(&code, &err)),
            }
        }

        info!(
            student_number = %student_number,
            requested = course_codes.len(),
            enrolled = results.len(),
            failed = errors.len(),
            "bulk enrollment finished"
        );
        Ok(BulkEnrollmentOutcome {
            student_number: student.student_number.clone(),
            student_name: student.full_name(),
            total_enrolled: results.len(),
            total_credits: credits_added,
            results,
            errors,
        })
    }

    pub async fn course_status(
        &self,
        course_code: &CourseCode,
    ) -> Result<CourseStatusReport, EnrollmentError> {
        let course = self
            .store
            .find_course(course_code)
            .await?
            .ok_or_else(|| EnrollmentError::course_not_found(course_code))?;
        let mut enrolled = Vec::with_capacity(course.enrolled_students().len());
        for number in course.enrolled_students() {
            match self.store.find_student(number).await? {
                Some(student) => enrolled.push(StudentSummary::from(&student)),
                None => warn!(
                    course_code = %course_code,
                    student_number = %number,
                    "course references a missing student"
                ),
            }
        }
        Ok(CourseStatusReport::new(&course, enrolled))
    }

    /// Every course with its derived seat attributes.
    pub async fn available_courses(&self) -> Result<Vec<CourseView>, EnrollmentError> {
        let courses = self.store.list_courses().await?;
        Ok(courses.iter().map(CourseView::from).collect())
    }

    pub async fn enrollment_stats(&self) -> Result<EnrollmentStats, EnrollmentError> {
        let courses = self.store.list_courses().await?;
        Ok(EnrollmentStats::from_courses(&courses))
    }

    pub async fn student_courses(
        &self,
        student_number: &StudentNumber,
    ) -> Result<StudentCoursesReport, EnrollmentError> {
        let student = self
            .store
            .find_student(student_number)
            .await?
            .ok_or_else(|| EnrollmentError::student_not_found(student_number))?;
        let mut courses = Vec::with_capacity(student.enrolled_course_count());
        for code in student.enrolled_course_codes() {
            match self.store.find_course(code).await? {
                Some(course) => courses.push(CourseView::from(&course)),
                None => warn!(
                    student_number = %student_number,
                    course_code = %code,
                    "student references a missing course"
                ),
            }
        }
        Ok(StudentCoursesReport {
            student: (&student).into(),
            enrolled_courses: courses,
        })
    }

    /// Close every journal intent left open by an earlier process, removing
    /// any reference only one side of the relationship holds. The journal is
    /// then compacted to the intents that are still open.
    pub async fn recover_pending(&self) -> Result<RecoveryReport, EnrollmentError> {
        let Some(journal) = &self.journal else {
            return Ok(RecoveryReport::default());
        };
        let pending = journal
            .pending()
            .map_err(|err| EnrollmentError::Store(format!("failed to read journal: {err}")))?;

        let mut report = RecoveryReport::default();
        for intent in pending {
            let action = match intent.action {
                JournalAction::Enroll => EnrollmentAction::Enrolled,
                JournalAction::Drop => EnrollmentAction::Dropped,
            };
            let key = match EnrollmentKey::parse(&intent.course_code, &intent.student_number) {
                Ok(key) => key,
                Err(violation) => {
                    warn!(intent = %intent.intent_id, error = %violation, "unreadable journal intent");
                    report.unresolved += 1;
                    continue;
                }
            };
            let ctx = WriteContext {
                action,
                key: &key,
                intent: Some(intent.intent_id),
            };
            match self.recover_intent(&ctx).await {
                Ok(phase) => {
                    warn!(
                        intent = %intent.intent_id,
                        course_code = %key.course_code,
                        student_number = %key.student_number,
                        action = %action,
                        phase = ?phase,
                        "recovered open enrollment intent"
                    );
                    report.recovered.push(RecoveredIntent {
                        intent_id: intent.intent_id,
                        course_code: intent.course_code,
                        student_number: intent.student_number,
                        phase,
                    });
                }
                Err(err) => {
                    error!(
                        intent = %intent.intent_id,
                        course_code = %key.course_code,
                        student_number = %key.student_number,
                        error = %err,
                        "failed to recover enrollment intent"
                    );
                    report.unresolved += 1;
                }
            }
        }
        match journal.compact() {
            Ok(removed) => debug!(removed, "journal compacted after recovery"),
            Err(err) => warn!(error = %err, "failed to compact journal"),
        }
        Ok(report)
    }

    async fn recover_intent(&self, ctx: &WriteContext<'_>) -> Result<JournalPhase, EnrollmentError> {
        let key = ctx.key;
        let _course_guard = self.locks.course(&key.course_code).await;
        let _student_guard = self.locks.student(&key.student_number).await;
        let (course, student) = tokio::join!(
            self.store.find_course(&key.course_code),
            self.store.find_student(&key.student_number)
        );

        let (phase, detail) = match (course?, student?) {
            (Some(mut course), Some(mut student)) => match relation::repair(&mut course, &mut student)
            {
                Repair::Consistent => {
                    let linked = course.has_student(&student.student_number);
                    let applied = match ctx.action {
                        EnrollmentAction::Enrolled => linked,
                        EnrollmentAction::Dropped => !linked,
                    };
                    if applied {
                        (JournalPhase::Committed, None)
                    } else {
                        (JournalPhase::Aborted, None)
                    }
                }
                repair => {
                    self.store
                        .write_enrollment(&course, &student)
                        .await
                        .map_err(|failure| EnrollmentError::Store(failure.to_string()))?;
                    (JournalPhase::Compensated, Some(format!("{repair:?}")))
                }
            },
            (Some(mut course), None) => {
                if relation::forget_student(&mut course, &key.student_number) {
                    self.store.update_course(course).await?;
                    (
                        JournalPhase::Compensated,
                        Some("dangling student reference removed".to_owned()),
                    )
                } else {
                    (JournalPhase::Aborted, None)
                }
            }
            (None, Some(mut student)) => {
                if relation::forget_course(&mut student, &key.course_code) {
                    self.store.update_student(student).await?;
                    (
                        JournalPhase::Compensated,
                        Some("dangling course reference removed".to_owned()),
                    )
                } else {
                    (JournalPhase::Aborted, None)
                }
            }
            (None, None) => (JournalPhase::Aborted, None),
        };
        self.resolve_intent(ctx, phase, detail);
        Ok(phase)
    }

    async fn transition(
        &self,
        action: EnrollmentAction,
        key: &EnrollmentKey,
    ) -> Result<EnrollmentOutcome, EnrollmentError> {
        let started = Instant::now();
        let result = self.apply_locked(action, key).await;

        if let Some(metrics) = &self.metrics {
            metrics.observe_duration(action.as_str(), started.elapsed().as_secs_f64());
            match &result {
                Ok(_) => metrics.record_transition(action.as_str()),
                Err(err) => metrics.record_rejection(err.kind().as_str()),
            }
        }
        match &result {
            Ok(outcome) => info!(
                course_code = %key.course_code,
                student_number = %key.student_number,
                action = %action,
                enrollment_count = outcome.enrollment_data.enrollment_count,
                capacity = outcome.enrollment_data.capacity,
                "enrollment transition applied"
            ),
            Err(err) => debug!(
                course_code = %key.course_code,
                student_number = %key.student_number,
                action = %action,
                kind = %err.kind(),
                reason = %err,
                "enrollment request rejected"
            ),
        }
        result
    }

    async fn apply_locked(
        &self,
        action: EnrollmentAction,
        key: &EnrollmentKey,
    ) -> Result<EnrollmentOutcome, EnrollmentError> {
        let _course_guard = self.locks.course(&key.course_code).await;
        let _student_guard = self.locks.student(&key.student_number).await;

        let (course, student) = tokio::join!(
            self.store.find_course(&key.course_code),
            self.store.find_student(&key.student_number)
        );
        let (course, student) = (course?, student?);

        let transition = match action {
            EnrollmentAction::Enrolled => self.rules.enroll(key, student.as_ref(), course.as_ref()),
            EnrollmentAction::Dropped => self.rules.drop(key, student.as_ref(), course.as_ref()),
        }?;
        let (Some(prior_course), Some(prior_student)) = (course, student) else {
            return Err(EnrollmentError::Store(
                "entities disappeared after rule evaluation".to_owned(),
            ));
        };

        let ctx = WriteContext {
            action,
            key,
            intent: self.record_intent(action, key)?,
        };
        match self
            .store
            .write_enrollment(&transition.course, &transition.student)
            .await
        {
            Ok(()) => self.resolve_intent(&ctx, JournalPhase::Committed, None),
            Err(WriteFailure::NotApplied(err)) => {
                warn!(
                    course_code = %key.course_code,
                    student_number = %key.student_number,
                    action = %action,
                    error = %err,
                    "enrollment write not applied"
                );
                self.resolve_intent(&ctx, JournalPhase::Aborted, Some(err.to_string()));
                return Err(err.into());
            }
            Err(WriteFailure::Partial { written, source }) => {
                return Err(self
                    .compensate(&ctx, written, source, prior_course, prior_student)
                    .await);
            }
        }

        let Transition {
            course: written_course,
            student: written_student,
            ..
        } = transition;
        let (course, student) = tokio::join!(
            self.store.find_course(&key.course_code),
            self.store.find_student(&key.student_number)
        );
        let course = reread(course, written_course, key);
        let student = reread(student, written_student, key);

        let event = EnrollmentEvent::new(&course, &student, action);
        announce_enrollment(self.sink.as_ref(), &event);

        Ok(EnrollmentOutcome {
            success: true,
            message: match action {
                EnrollmentAction::Enrolled => ENROLLED_MESSAGE,
                EnrollmentAction::Dropped => DROPPED_MESSAGE,
            }
            .to_owned(),
            course: CourseView::from(&course),
            student: StudentView::from(&student),
            enrollment_data: event,
        })
    }

    /// Restore the side that was written after the other side failed.
    async fn compensate(
        &self,
        ctx: &WriteContext<'_>,
        written: EntityKind,
        source: StoreError,
        prior_course: Course,
        prior_student: Student,
    ) -> EnrollmentError {
        let key = ctx.key;
        error!(
            course_code = %key.course_code,
            student_number = %key.student_number,
            action = %ctx.action,
            written = %written.as_str(),
            error = %source,
            "enrollment partially written, rolling back"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_partial_failure();
        }

        let rollback = match written {
            EntityKind::Course => self.store.update_course(prior_course).await.map(|_| ()),
            EntityKind::Student => self.store.update_student(prior_student).await.map(|_| ()),
        };
        let compensated = match rollback {
            Ok(()) => {
                self.resolve_intent(ctx, JournalPhase::Compensated, Some(source.to_string()));
                true
            }
            Err(rollback_err) => {
                error!(
                    course_code = %key.course_code,
                    student_number = %key.student_number,
                    error = %rollback_err,
                    "rollback failed, relationship left one-sided"
                );
                self.resolve_intent(
                    ctx,
                    JournalPhase::Abandoned,
                    Some(format!("{source}; rollback: {rollback_err}")),
                );
                false
            }
        };

        EnrollmentError::PartialEnrollmentFailure {
            course_code: key.course_code.to_string(),
            student_number: key.student_number.to_string(),
            reason: source.to_string(),
            compensated,
        }
    }

    fn record_intent(
        &self,
        action: EnrollmentAction,
        key: &EnrollmentKey,
    ) -> Result<Option<Uuid>, EnrollmentError> {
        let Some(journal) = &self.journal else {
            return Ok(None);
        };
        journal
            .record_intent(
                journal_action(action),
                key.course_code.as_str(),
                key.student_number.as_str(),
            )
            .map(Some)
            .map_err(|err| EnrollmentError::Store(format!("failed to journal intent: {err}")))
    }

    fn resolve_intent(&self, ctx: &WriteContext<'_>, phase: JournalPhase, detail: Option<String>) {
        let (Some(journal), Some(intent)) = (&self.journal, ctx.intent) else {
            return;
        };
        if let Err(err) = journal.resolve(
            intent,
            phase,
            journal_action(ctx.action),
            ctx.key.course_code.as_str(),
            ctx.key.student_number.as_str(),
            detail,
        ) {
            warn!(intent = %intent, phase = ?phase, error = %err, "failed to close journal intent");
        }
    }
}

fn journal_action(action: EnrollmentAction) -> JournalAction {
    match action {
        EnrollmentAction::Enrolled => JournalAction::Enroll,
        EnrollmentAction::Dropped => JournalAction::Drop,
    }
}

fn reread<T>(result: Result<Option<T>, StoreError>, written: T, key: &EnrollmentKey) -> T {
    match result {
        Ok(Some(entity)) => entity,
        Ok(None) => written,
        Err(err) => {
            warn!(
                course_code = %key.course_code,
                student_number = %key.student_number,
                error = %err,
                "re-read after enrollment write failed"
            );
            written
        }
    }
}

fn bulk_success_message(code: &CourseCode) -> String {
    format!("Successfully enrolled in {code}")
}

fn bulk_error_message(code: &CourseCode, err: &EnrollmentError) -> String {
    match err {
        EnrollmentError::NotFound {
            entity: EntityKind::Course,
            ..
        } => format!("Course {code} not found"),
        EnrollmentError::AlreadyEnrolled { .. } => format!("Already enrolled in {code}"),
        EnrollmentError::CourseFull { .. } => format!("Course {code} is full"),
        other => format!("Error enrolling in {code}: {other}"),
    }
}

//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Administrative CRUD over students and courses with cascading deletes."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use registrar_persistence::{EnrollmentJournal, JournalAction, JournalPhase};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{EnrollmentError, EntityKind};
use crate::event::{course_room, EnrollmentAction, EnrollmentEvent, COURSE_DELETED};
use crate::locks::EnrollmentLocks;
use crate::model::{
    Course, CourseCode, CourseUpdate, EnrollmentKey, NewCourse, NewStudent, Student,
    StudentNumber, StudentUpdate,
};
use crate::notify::{announce_enrollment, NotificationSink};
use crate::relation;
use crate::store::{EntityStore, StoreError};

const MAX_DELETE_ATTEMPTS: usize = 8;

/// Create, read, update and delete for both entity kinds.
///
/// Shares the orchestrator's lock table, so updates never interleave with an
/// enrollment of the same course or student.
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn EntityStore>,
    sink: Arc<dyn NotificationSink>,
    locks: Arc<EnrollmentLocks>,
    journal: Option<Arc<EnrollmentJournal>>,
}

/// Journaled drop of one link released by a cascading delete.
struct Intent {
    id: Uuid,
    link: EnrollmentKey,
}

/// Entity as it was before a cascade released it.
enum Restore {
    Student(Box<Student>),
    Course(Box<Course>),
}

impl fmt::Debug for CatalogService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogService")
            .field("locks", &self.locks)
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}

impl CatalogService {
    pub fn new(
        store: Arc<dyn EntityStore>,
        sink: Arc<dyn NotificationSink>,
        locks: Arc<EnrollmentLocks>,
    ) -> Self {
        Self {
            store,
            sink,
            locks,
            journal: None,
        }
    }

    /// Journal the links released by cascading deletes.
    pub fn with_journal(mut self, journal: Arc<EnrollmentJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub async fn create_course(&self, input: NewCourse) -> Result<Course, EnrollmentError> {
        let course = Course::new(input)?;
        let course = self.store.insert_course(course).await?;
        info!(
            course_code = %course.course_code,
            capacity = course.capacity,
            credits = course.credits,
            "course created"
        );
        Ok(course)
    }

    pub async fn get_course(&self, code: &CourseCode) -> Result<Course, EnrollmentError> {
        self.store
            .find_course(code)
            .await?
            .ok_or_else(|| EnrollmentError::course_not_found(code))
    }

    pub async fn list_courses(&self) -> Result<Vec<Course>, EnrollmentError> {
        Ok(self.store.list_courses().await?)
    }

    pub async fn update_course(
        &self,
        code: &CourseCode,
        update: CourseUpdate,
    ) -> Result<Course, EnrollmentError> {
        let _guard = self.locks.course(code).await;
        let mut course = self.get_course(code).await?;
        course.apply(update);
        let course = self.store.update_course(course).await?;
        info!(course_code = %code, capacity = course.capacity, active = course.active, "course updated");
        Ok(course)
    }

    /// Remove a course after unlinking it from every enrolled student.
    ///
    /// Each released link is journaled as a drop intent first. If a write
    /// fails, the students already released are written back and the course
    /// is kept.
    pub async fn delete_course(&self, code: &CourseCode) -> Result<Course, EnrollmentError> {
        let _course_guard = self.locks.course(code).await;
        let course = self.get_course(code).await?;
        let _student_guards = self.locks.students(course.enrolled_students()).await;

        let links: Vec<EnrollmentKey> = course
            .enrolled_students()
            .iter()
            .map(|number| EnrollmentKey::new(code.clone(), number.clone()))
            .collect();
        let intents = self.record_cascade(&links)?;

        let mut released: Vec<Student> = Vec::new();
        let deleted = match self.release_students(&links, &mut released).await {
            Ok(()) => self
                .store
                .delete_course(code)
                .await
                .and_then(|deleted| {
                    deleted.ok_or_else(|| StoreError::Missing {
                        entity: EntityKind::Course,
                        key: code.to_string(),
                    })
                })
                .map_err(|source| {
                    let link = released.last().map(|student| {
                        EnrollmentKey::new(code.clone(), student.student_number.clone())
                    });
                    (link, source)
                }),
            Err((link, source)) => Err((Some(link), source)),
        };

        let course = match deleted {
            Ok(course) => course,
            Err((link, source)) => {
                let restore = released
                    .into_iter()
                    .map(|student| Restore::Student(Box::new(student)))
                    .collect();
                return Err(self.undo_cascade(&intents, link, source, restore).await);
            }
        };
        self.close_cascade(&intents, JournalPhase::Committed, None);

        let released: Vec<String> = released
            .iter()
            .map(|student| student.student_number.to_string())
            .collect();
        let payload = json!({
            "courseCode": course.course_code,
            "courseName": course.course_name,
            "releasedStudents": released,
        });
        self.sink.broadcast(COURSE_DELETED, &payload);
        self.sink
            .publish(&course_room(&course.course_code), COURSE_DELETED, &payload);
        info!(
            course_code = %course.course_code,
            released = released.len(),
            "course deleted"
        );
        Ok(course)
    }

    /// Unlink the course named by each link from its student, stopping at the
    /// first failed write. `released` receives each student as it was.
    async fn release_students(
        &self,
        links: &[EnrollmentKey],
        released: &mut Vec<Student>,
    ) -> Result<(), (EnrollmentKey, StoreError)> {
        for link in links {
            let found = self
                .store
                .find_student(&link.student_number)
                .await
                .map_err(|err| (link.clone(), err))?;
            let Some(prior) = found else {
                continue;
            };
            let mut student = prior.clone();
            if relation::forget_course(&mut student, &link.course_code) {
                self.store
                    .update_student(student)
                    .await
                    .map_err(|err| (link.clone(), err))?;
                released.push(prior);
            }
        }
        Ok(())
    }

    pub async fn create_student(&self, input: NewStudent) -> Result<Student, EnrollmentError> {
        let student = Student::new(input)?;
        let student = self.store.insert_student(student).await?;
        info!(student_number = %student.student_number, "student created");
        Ok(student)
    }

    pub async fn get_student(&self, number: &StudentNumber) -> Result<Student, EnrollmentError> {
        self.store
            .find_student(number)
            .await?
            .ok_or_else(|| EnrollmentError::student_not_found(number))
    }

    pub async fn list_students(&self) -> Result<Vec<Student>, EnrollmentError> {
        Ok(self.store.list_students().await?)
    }

    pub async fn update_student(
        &self,
        number: &StudentNumber,
        update: StudentUpdate,
    ) -> Result<Student, EnrollmentError> {
        let _guard = self.locks.student(number).await;
        let mut student = self.get_student(number).await?;
        student.apply(update);
        let student = self.store.update_student(student).await?;
        info!(student_number = %number, "student updated");
        Ok(student)
    }

    /// Remove a student after dropping them from every course they hold.
    ///
    /// Every course whose enrollment changes gets the usual `dropped`
    /// notification pair once the student is gone. A failed write restores
    /// the courses already released, as for [`CatalogService::delete_course`].
    pub async fn delete_student(&self, number: &StudentNumber) -> Result<Student, EnrollmentError> {
        for _ in 0..MAX_DELETE_ATTEMPTS {
            let held = self.held_courses(number).await?;
            let _course_guards = self.locks.courses(&held).await;
            let _student_guard = self.locks.student(number).await;

            // An enrollment may have slipped in before the locks were taken.
            let student = self.get_student(number).await?;
            let current: BTreeSet<CourseCode> = student.enrolled_course_codes().cloned().collect();
            if current != held {
                continue;
            }

            let links: Vec<EnrollmentKey> = held
                .iter()
                .map(|code| EnrollmentKey::new(code.clone(), number.clone()))
                .collect();
            let intents = self.record_cascade(&links)?;

            let mut released: Vec<(Course, Course)> = Vec::new();
            let deleted = match self.release_courses(&links, &mut released).await {
                Ok(()) => self
                    .store
                    .delete_student(number)
                    .await
                    .and_then(|deleted| {
                        deleted.ok_or_else(|| StoreError::Missing {
                            entity: EntityKind::Student,
                            key: number.to_string(),
                        })
                    })
                    .map_err(|source| {
                        let link = released.last().map(|(prior, _)| {
                            EnrollmentKey::new(prior.course_code.clone(), number.clone())
                        });
                        (link, source)
                    }),
                Err((link, source)) => Err((Some(link), source)),
            };

            let deleted = match deleted {
                Ok(deleted) => deleted,
                Err((link, source)) => {
                    let restore = released
                        .into_iter()
                        .map(|(prior, _)| Restore::Course(Box::new(prior)))
                        .collect();
                    return Err(self.undo_cascade(&intents, link, source, restore).await);
                }
            };
            self.close_cascade(&intents, JournalPhase::Committed, None);

            for (_, course) in &released {
                let event = EnrollmentEvent::new(course, &student, EnrollmentAction::Dropped);
                announce_enrollment(self.sink.as_ref(), &event);
            }
            info!(
                student_number = %number,
                released = released.len(),
                "student deleted"
            );
            return Ok(deleted);
        }

        warn!(student_number = %number, "student enrollment kept changing during delete");
        Err(EnrollmentError::Store(format!(
            "student {number} changed during deletion; retry"
        )))
    }

    /// Unlink the student named by each link from its course, stopping at the
    /// first failed write. `released` receives each course before and after.
    async fn release_courses(
        &self,
        links: &[EnrollmentKey],
        released: &mut Vec<(Course, Course)>,
    ) -> Result<(), (EnrollmentKey, StoreError)> {
        for link in links {
            let found = self
                .store
                .find_course(&link.course_code)
                .await
                .map_err(|err| (link.clone(), err))?;
            let Some(prior) = found else {
                continue;
            };
            let mut course = prior.clone();
            if relation::forget_student(&mut course, &link.student_number) {
                let written = self
                    .store
                    .update_course(course)
                    .await
                    .map_err(|err| (link.clone(), err))?;
                released.push((prior, written));
            }
        }
        Ok(())
    }

    fn record_cascade(&self, links: &[EnrollmentKey]) -> Result<Vec<Intent>, EnrollmentError> {
        let Some(journal) = &self.journal else {
            return Ok(Vec::new());
        };
        links
            .iter()
            .map(|link| {
                journal
                    .record_intent(
                        JournalAction::Drop,
                        link.course_code.as_str(),
                        link.student_number.as_str(),
                    )
                    .map(|id| Intent {
                        id,
                        link: link.clone(),
                    })
                    .map_err(|err| {
                        EnrollmentError::Store(format!("failed to journal intent: {err}"))
                    })
            })
            .collect()
    }

    fn close_cascade(&self, intents: &[Intent], phase: JournalPhase, detail: Option<String>) {
        let Some(journal) = &self.journal else {
            return;
        };
        for intent in intents {
            if let Err(err) = journal.resolve(
                intent.id,
                phase,
                JournalAction::Drop,
                intent.link.course_code.as_str(),
                intent.link.student_number.as_str(),
                detail.clone(),
            ) {
                warn!(intent = %intent.id, phase = ?phase, error = %err, "failed to close journal intent");
            }
        }
    }

    /// Write back every entity a failed cascade already released.
    ///
    /// With nothing released the failure is a plain store error. If a write
    /// back fails the intents stay open for startup recovery.
    async fn undo_cascade(
        &self,
        intents: &[Intent],
        link: Option<EnrollmentKey>,
        source: StoreError,
        restore: Vec<Restore>,
    ) -> EnrollmentError {
        let Some(link) = link.filter(|_| !restore.is_empty()) else {
            self.close_cascade(intents, JournalPhase::Aborted, Some(source.to_string()));
            return source.into();
        };
        error!(
            course_code = %link.course_code,
            student_number = %link.student_number,
            released = restore.len(),
            error = %source,
            "cascading delete failed midway, restoring released links"
        );

        let mut compensated = true;
        for entity in restore.into_iter().rev() {
            let written = match entity {
                Restore::Student(student) => self.store.update_student(*student).await.map(|_| ()),
                Restore::Course(course) => self.store.update_course(*course).await.map(|_| ()),
            };
            if let Err(err) = written {
                error!(
                    course_code = %link.course_code,
                    student_number = %link.student_number,
                    error = %err,
                    "restoring a released link failed"
                );
                compensated = false;
            }
        }
        if compensated {
            self.close_cascade(intents, JournalPhase::Compensated, Some(source.to_string()));
        }

        EnrollmentError::PartialEnrollmentFailure {
            course_code: link.course_code.to_string(),
            student_number: link.student_number.to_string(),
            reason: source.to_string(),
            compensated,
        }
    }

    async fn held_courses(
        &self,
        number: &StudentNumber,
    ) -> Result<BTreeSet<CourseCode>, EnrollmentError> {
        let student = self.get_student(number).await?;
        Ok(student.enrolled_course_codes().cloned().collect())
    }
}

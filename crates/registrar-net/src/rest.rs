//! ---
//! reg_section: "05-networking-external-interfaces"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "HTTP surface for enrollment operations and catalog administration."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use registrar_core::{
    BulkEnrollmentOutcome, CatalogService, CourseCode, CourseStatusReport, CourseUpdate,
    CourseView, EnrollmentError, EnrollmentKey, EnrollmentOrchestrator, EnrollmentOutcome,
    EnrollmentStats, ErrorKind, NewCourse, NewStudent, StudentCoursesReport, StudentNumber,
    StudentUpdate, StudentView,
};
use registrar_metrics::SharedRegistry;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Body of `POST /api/enrollment/enroll` and `POST /api/enrollment/drop`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRequest {
    /// Course business key.
    pub course_code: String,
    /// Student business key.
    pub student_number: String,
}

/// Body of `POST /api/enrollment/bulk-enroll`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BulkEnrollmentRequest {
    /// Student business key.
    pub student_number: String,
    /// Courses to enroll in, attempted in order.
    pub course_codes: Vec<String>,
}

/// JSON body returned for every failed request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    /// Human readable reason.
    pub message: String,
    /// Stable discriminant clients can branch on.
    pub kind: ErrorKind,
}

/// Failure of a REST handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Raised by the orchestrator or the catalog.
    #[error(transparent)]
    Enrollment(#[from] EnrollmentError),
    /// The request body could not be decoded.
    #[error("invalid request body: {0}")]
    InvalidBody(String),
}

impl ApiError {
    /// Discriminant reported in the response body.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Enrollment(err) => err.kind(),
            ApiError::InvalidBody(_) => ErrorKind::ValidationFailed,
        }
    }

    /// HTTP status for this failure.
    pub fn status(&self) -> StatusCode {
        status_for(self.kind())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidBody(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        let body = ErrorBody {
            message: self.to_string(),
            kind: self.kind(),
        };
        (status, Json(body)).into_response()
    }
}

/// Map an error kind to its HTTP status.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::ValidationFailed => StatusCode::BAD_REQUEST,
        kind if kind.is_rule_violation() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type ApiResult<T> = Result<T, ApiError>;

struct RestState {
    orchestrator: Arc<EnrollmentOrchestrator>,
    catalog: CatalogService,
    metrics: Option<SharedRegistry>,
}

/// Builder used to configure and spawn the REST API server.
#[derive(Clone)]
pub struct RestApiBuilder {
    listen: SocketAddr,
    orchestrator: Arc<EnrollmentOrchestrator>,
    metrics: Option<SharedRegistry>,
}

impl RestApiBuilder {
    /// Serve `orchestrator` and the catalog sharing its lock table.
    pub fn new(listen: SocketAddr, orchestrator: Arc<EnrollmentOrchestrator>) -> Self {
        Self {
            listen,
            orchestrator,
            metrics: None,
        }
    }

    /// Attach a Prometheus registry exposed at `/metrics`.
    pub fn with_metrics_registry(mut self, registry: SharedRegistry) -> Self {
        self.metrics = Some(registry);
        self
    }

    /// Spawn the REST API server and return a handle that can be awaited for shutdown.
    pub async fn spawn(self) -> anyhow::Result<RestApiHandle> {
        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "rest api listening");

        let state = RestState {
            catalog: self.orchestrator.catalog(),
            orchestrator: self.orchestrator,
            metrics: self.metrics,
        };
        let router = routes()
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::new(state));

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "rest api server exited with error");
            }
        });

        Ok(RestApiHandle {
            address: local_addr,
            task,
            shutdown: shutdown_tx,
        })
    }
}

fn routes() -> Router<Arc<RestState>> {
    Router::new()
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .route("/api/enrollment/enroll", post(post_enroll))
        .route("/api/enrollment/drop", post(post_drop))
        .route("/api/enrollment/bulk-enroll", post(post_bulk_enroll))
        .route(
            "/api/enrollment/course-status/:course_code",
            get(get_course_status),
        )
        .route("/api/enrollment/available-courses", get(get_available_courses))
        .route("/api/enrollment/enrollment-stats", get(get_enrollment_stats))
        .route(
            "/api/enrollment/student-courses/:student_number",
            get(get_student_courses),
        )
        .route("/api/courses", get(list_courses).post(create_course))
        .route(
            "/api/courses/:course_code",
            get(get_course).put(update_course).delete(delete_course),
        )
        .route("/api/students", get(list_students).post(create_student))
        .route(
            "/api/students/:student_number",
            get(get_student).put(update_student).delete(delete_student),
        )
}

/// Handle returned from [`RestApiBuilder::spawn`] allowing the caller to await server completion.
pub struct RestApiHandle {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl RestApiHandle {
    /// Retrieve the socket address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Request graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(join) => Err(anyhow::anyhow!(join)),
        }
    }
}

fn course_code(raw: &str) -> ApiResult<CourseCode> {
    CourseCode::parse(raw).map_err(|violation| EnrollmentError::from(violation).into())
}

fn student_number(raw: &str) -> ApiResult<StudentNumber> {
    StudentNumber::parse(raw).map_err(|violation| EnrollmentError::from(violation).into())
}

async fn get_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_metrics(State(state): State<Arc<RestState>>) -> Response {
    let Some(registry) = &state.metrics else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics registry unavailable",
        )
            .into_response();
    };

    match registrar_metrics::render(registry) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn post_enroll(
    State(state): State<Arc<RestState>>,
    payload: Result<Json<EnrollmentRequest>, JsonRejection>,
) -> ApiResult<Json<EnrollmentOutcome>> {
    let Json(request) = payload?;
    let key = EnrollmentKey::parse(&request.course_code, &request.student_number)
        .map_err(EnrollmentError::from)?;
    let outcome = state
        .orchestrator
        .request_enroll(&key.course_code, &key.student_number)
        .await?;
    Ok(Json(outcome))
}

async fn post_drop(
    State(state): State<Arc<RestState>>,
    payload: Result<Json<EnrollmentRequest>, JsonRejection>,
) -> ApiResult<Json<EnrollmentOutcome>> {
    let Json(request) = payload?;
    let key = EnrollmentKey::parse(&request.course_code, &request.student_number)
        .map_err(EnrollmentError::from)?;
    let outcome = state
        .orchestrator
        .request_drop(&key.course_code, &key.student_number)
        .await?;
    Ok(Json(outcome))
}

async fn post_bulk_enroll(
    State(state): State<Arc<RestState>>,
    payload: Result<Json<BulkEnrollmentRequest>, JsonRejection>,
) -> ApiResult<Json<BulkEnrollmentOutcome>> {
    let Json(request) = payload?;
    let number = student_number(&request.student_number)?;
    let outcome = state
        .orchestrator
        .request_bulk_enroll(&number, &request.course_codes)
        .await?;
    Ok(Json(outcome))
}

async fn get_course_status(
    State(state): State<Arc<RestState>>,
    Path(raw): Path<String>,
) -> ApiResult<Json<CourseStatusReport>> {
    let code = course_code(&raw)?;
    Ok(Json(state.orchestrator.course_status(&code).await?))
}

async fn get_available_courses(
    State(state): State<Arc<RestState>>,
) -> ApiResult<Json<Vec<CourseView>>> {
    Ok(Json(state.orchestrator.available_courses().await?))
}

async fn get_enrollment_stats(
    State(state): State<Arc<RestState>>,
) -> ApiResult<Json<EnrollmentStats>> {
    Ok(Json(state.orchestrator.enrollment_stats().await?))
}

async fn get_student_courses(
    State(state): State<Arc<RestState>>,
    Path(raw): Path<String>,
) -> ApiResult<Json<StudentCoursesReport>> {
    let number = student_number(&raw)?;
    Ok(Json(state.orchestrator.student_courses(&number).await?))
}

async fn list_courses(State(state): State<Arc<RestState>>) -> ApiResult<Json<Vec<CourseView>>> {
    let courses = state.catalog.list_courses().await?;
    Ok(Json(courses.iter().map(CourseView::from).collect()))
}

async fn create_course(
    State(state): State<Arc<RestState>>,
    payload: Result<Json<NewCourse>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CourseView>)> {
    let Json(input) = payload?;
    let course = state.catalog.create_course(input).await?;
    Ok((StatusCode::CREATED, Json(CourseView::from(&course))))
}

async fn get_course(
    State(state): State<Arc<RestState>>,
    Path(raw): Path<String>,
) -> ApiResult<Json<CourseView>> {
    let code = course_code(&raw)?;
    let course = state.catalog.get_course(&code).await?;
    Ok(Json(CourseView::from(&course)))
}

async fn update_course(
    State(state): State<Arc<RestState>>,
    Path(raw): Path<String>,
    payload: Result<Json<CourseUpdate>, JsonRejection>,
) -> ApiResult<Json<CourseView>> {
    let code = course_code(&raw)?;
    let Json(update) = payload?;
    let course = state.catalog.update_course(&code, update).await?;
    Ok(Json(CourseView::from(&course)))
}

async fn delete_course(
    State(state): State<Arc<RestState>>,
    Path(raw): Path<String>,
) -> ApiResult<Json<CourseView>> {
    let code = course_code(&raw)?;
    let course = state.catalog.delete_course(&code).await?;
    Ok(Json(CourseView::from(&course)))
}

async fn list_students(State(state): State<Arc<RestState>>) -> ApiResult<Json<Vec<StudentView>>> {
    let students = state.catalog.list_students().await?;
    Ok(Json(students.iter().map(StudentView::from).collect()))
}

async fn create_student(
    State(state): State<Arc<RestState>>,
    payload: Result<Json<NewStudent>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<StudentView>)> {
    let Json(input) = payload?;
    let student = state.catalog.create_student(input).await?;
    Ok((StatusCode::CREATED, Json(StudentView::from(&student))))
}

async fn get_student(
    State(state): State<Arc<RestState>>,
    Path(raw): Path<String>,
) -> ApiResult<Json<StudentView>> {
    let number = student_number(&raw)?;
    let student = state.catalog.get_student(&number).await?;
    Ok(Json(StudentView::from(&student)))
}

async fn update_student(
    State(state): State<Arc<RestState>>,
    Path(raw): Path<String>,
    payload: Result<Json<StudentUpdate>, JsonRejection>,
) -> ApiResult<Json<StudentView>> {
    let number = student_number(&raw)?;
    let Json(update) = payload?;
    let student = state.catalog.update_student(&number, update).await?;
    Ok(Json(StudentView::from(&student)))
}

async fn delete_student(
    State(state): State<Arc<RestState>>,
    Path(raw): Path<String>,
) -> ApiResult<Json<StudentView>> {
    let number = student_number(&raw)?;
    let student = state.catalog.delete_student(&number).await?;
    Ok(Json(StudentView::from(&student)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use registrar_core::{MemorySink, MemoryStore, RuleEngine};
    use registrar_metrics::{new_registry, EnrollmentMetrics};
    use reqwest::Client;
    use serde_json::{json, Value};

    async fn spawn_api(with_metrics: bool) -> (RestApiHandle, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let mut orchestrator = EnrollmentOrchestrator::new(
            Arc::new(MemoryStore::new()),
            sink.clone(),
            RuleEngine::default(),
        );
        let mut builder_registry = None;
        if with_metrics {
            let registry = new_registry();
            orchestrator =
                orchestrator.with_metrics(EnrollmentMetrics::new(registry.clone()).unwrap());
            builder_registry = Some(registry);
        }
        let mut builder =
            RestApiBuilder::new("127.0.0.1:0".parse().unwrap(), Arc::new(orchestrator));
        if let Some(registry) = builder_registry {
            builder = builder.with_metrics_registry(registry);
        }
        (builder.spawn().await.unwrap(), sink)
    }

    async fn seed(client: &Client, base: &str, code: &str, capacity: u32, students: &[&str]) {
        let resp = client
            .post(format!("{base}/api/courses"))
            .json(&json!({
                "courseCode": code,
                "courseName": "Emerging Technologies",
                "instructor": "Dr. Smith",
                "credits": 3,
                "capacity": capacity,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);

        for number in students {
            let resp = client
                .post(format!("{base}/api/students"))
                .json(&json!({
                    "studentNumber": number,
                    "firstName": "Ada",
                    "lastName": "Lovelace",
                    "email": format!("{number}@example.com"),
                }))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
        }
    }

    #[tokio::test]
    async fn enroll_and_drop_round_trip_over_http() {
        let (handle, sink) = spawn_api(true).await;
        let client = Client::new();
        let base = format!("http://{}", handle.local_addr());
        seed(&client, &base, "COMP308", 2, &["300100200"]).await;

        let outcome: EnrollmentOutcome = client
            .post(format!("{base}/api/enrollment/enroll"))
            .json(&json!({"courseCode": "comp308", "studentNumber": "300100200"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.course.enrollment_count, 1);
        assert_eq!(outcome.student.total_credits, 3);
        assert_eq!(sink.deliveries().len(), 2);

        let status: Value = client
            .get(format!("{base}/api/enrollment/course-status/COMP308"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["enrollmentCount"], 1);
        assert_eq!(status["enrolledStudents"][0]["studentNumber"], "300100200");

        let dropped: EnrollmentOutcome = client
            .post(format!("{base}/api/enrollment/drop"))
            .json(&json!({"courseCode": "COMP308", "studentNumber": "300100200"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(dropped.course.enrollment_count, 0);

        let metrics = client
            .get(format!("{base}/metrics"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(metrics.contains("registrar_enrollments_total"));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn failures_map_to_status_and_kind() {
        let (handle, _sink) = spawn_api(false).await;
        let client = Client::new();
        let base = format!("http://{}", handle.local_addr());
        seed(&client, &base, "COMP308", 1, &["S1", "S2"]).await;

        let enroll = |number: &'static str, code: &'static str| {
            client
                .post(format!("{base}/api/enrollment/enroll"))
                .json(&json!({"courseCode": code, "studentNumber": number}))
                .send()
        };

        assert!(enroll("S1", "COMP308").await.unwrap().status().is_success());

        let full = enroll("S2", "COMP308").await.unwrap();
        assert_eq!(full.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: ErrorBody = full.json().await.unwrap();
        assert_eq!(body.kind, ErrorKind::CourseFull);
        assert!(body.message.contains("full"));

        let missing = enroll("S1", "NOPE101").await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let duplicate = client
            .post(format!("{base}/api/students"))
            .json(&json!({
                "studentNumber": "S1",
                "firstName": "Ada",
                "lastName": "Lovelace",
                "email": "ada@example.com",
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(duplicate.status(), reqwest::StatusCode::CONFLICT);

        let malformed = client
            .post(format!("{base}/api/enrollment/enroll"))
            .json(&json!({"courseCode": "COMP308"}))
            .send()
            .await
            .unwrap();
        assert_eq!(malformed.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: ErrorBody = malformed.json().await.unwrap();
        assert_eq!(body.kind, ErrorKind::ValidationFailed);

        let metrics = client.get(format!("{base}/metrics")).send().await.unwrap();
        assert_eq!(metrics.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn bulk_enroll_reports_per_course_errors() {
        let (handle, _sink) = spawn_api(false).await;
        let client = Client::new();
        let base = format!("http://{}", handle.local_addr());
        seed(&client, &base, "COMP308", 5, &["S1"]).await;

        let outcome: BulkEnrollmentOutcome = client
            .post(format!("{base}/api/enrollment/bulk-enroll"))
            .json(&json!({"studentNumber": "S1", "courseCodes": ["COMP308", "MISSING1"]}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(outcome.total_enrolled, 1);
        assert_eq!(outcome.total_credits, 3);
        assert_eq!(outcome.errors, vec!["Course MISSING1 not found".to_string()]);

        let unknown = client
            .post(format!("{base}/api/enrollment/bulk-enroll"))
            .json(&json!({"studentNumber": "S9", "courseCodes": ["COMP308"]}))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn catalog_routes_update_and_cascade() {
        let (handle, _sink) = spawn_api(false).await;
        let client = Client::new();
        let base = format!("http://{}", handle.local_addr());
        seed(&client, &base, "COMP308", 5, &["S1"]).await;
        client
            .post(format!("{base}/api/enrollment/enroll"))
            .json(&json!({"courseCode": "COMP308", "studentNumber": "S1"}))
            .send()
            .await
            .unwrap();

        let updated: CourseView = client
            .put(format!("{base}/api/courses/COMP308"))
            .json(&json!({"capacity": 10, "instructor": "Dr. Jones"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(updated.capacity, 10);
        assert_eq!(updated.enrollment_count, 1);

        let deleted = client
            .delete(format!("{base}/api/courses/COMP308"))
            .send()
            .await
            .unwrap();
        assert!(deleted.status().is_success());

        let student: StudentView = client
            .get(format!("{base}/api/students/S1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(student.enrolled_courses.is_empty());
        assert_eq!(student.total_credits, 0);

        let stats: EnrollmentStats = client
            .get(format!("{base}/api/enrollment/enrollment-stats"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats.total_courses, 0);

        handle.shutdown().await.unwrap();
    }

    #[test]
    fn rule_violations_are_client_errors() {
        assert_eq!(status_for(ErrorKind::CreditLimitExceeded), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::NotEnrolled), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ErrorKind::PartialEnrollmentFailure),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(status_for(ErrorKind::Store), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

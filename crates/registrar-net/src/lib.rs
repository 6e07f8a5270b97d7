//! ---
//! reg_section: "05-networking-external-interfaces"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "REST and WebSocket surfaces of the enrollment service."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Network surfaces of Registrar: a REST API over the orchestrator and the
//! catalog, and a WebSocket hub that delivers enrollment notifications.

pub mod rest;
pub mod websocket;

pub use rest::{
    status_for, ApiError, BulkEnrollmentRequest, EnrollmentRequest, ErrorBody, RestApiBuilder,
    RestApiHandle,
};
pub use websocket::{
    NotificationFrame, NotificationHub, WebSocketServerBuilder, WebSocketServerHandle,
};

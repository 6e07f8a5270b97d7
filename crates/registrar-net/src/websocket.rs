//! ---
//! reg_section: "05-networking-external-interfaces"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "WebSocket notification hub with per-course rooms."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use registrar_core::event::{CAPACITY_CHANGED, ENROLLMENT_CHANGED};
use registrar_core::{course_room, CourseCode, NotificationSink};
use registrar_metrics::EnrollmentMetrics;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Acknowledges a `join-course-room` command.
pub const JOINED_COURSE_ROOM: &str = "joined-course-room";
/// Acknowledges a `leave-course-room` command.
pub const LEFT_COURSE_ROOM: &str = "left-course-room";
/// Reply to a command the hub could not act on.
pub const COMMAND_ERROR: &str = "error";

/// Frame written to WebSocket clients.
///
/// Frames without a `topic` reach every connection; frames with one reach
/// only connections that joined that room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationFrame {
    /// Event name, e.g. `enrollment-changed`.
    pub event: String,
    /// Room the frame is scoped to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Event body encoded as JSON.
    pub payload: Value,
}

impl NotificationFrame {
    /// Convenience constructor.
    pub fn new(event: impl Into<String>, topic: Option<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            topic,
            payload,
        }
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    frame: NotificationFrame,
    /// Connection that relayed the frame; it is not echoed back.
    origin: Option<u64>,
}

/// Fans notifications out to connected clients.
///
/// Cheap to clone; every clone feeds the same channel. Sending with nobody
/// connected is not an error.
#[derive(Debug, Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<Envelope>,
    next_connection: Arc<AtomicU64>,
    metrics: Option<EnrollmentMetrics>,
}

impl NotificationHub {
    /// Create a hub buffering up to `capacity` frames per slow client.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            next_connection: Arc::new(AtomicU64::new(1)),
            metrics: None,
        }
    }

    /// Track connected listeners in `registrar_notification_listeners`.
    pub fn with_metrics(mut self, metrics: EnrollmentMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Queue a frame for every connection. Returns how many were reached.
    pub fn send(&self, frame: NotificationFrame) -> usize {
        self.dispatch(Envelope {
            frame,
            origin: None,
        })
    }

    /// Number of currently connected clients.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn dispatch(&self, envelope: Envelope) -> usize {
        match self.tx.send(envelope) {
            Ok(reached) => reached,
            Err(_) => 0,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    fn connection_id(&self) -> u64 {
        self.next_connection.fetch_add(1, Ordering::Relaxed)
    }
}

impl NotificationSink for NotificationHub {
    fn broadcast(&self, event: &str, payload: &Value) {
        let reached = self.send(NotificationFrame::new(event, None, payload.clone()));
        debug!(event, reached, "notification broadcast");
    }

    fn publish(&self, topic: &str, event: &str, payload: &Value) {
        let reached = self.send(NotificationFrame::new(
            event,
            Some(topic.to_owned()),
            payload.clone(),
        ));
        debug!(event, topic, reached, "notification published");
    }
}

struct WebSocketState {
    hub: NotificationHub,
}

/// Builder for the WebSocket server that streams enrollment notifications.
#[derive(Clone)]
pub struct WebSocketServerBuilder {
    listen: SocketAddr,
    hub: NotificationHub,
}

impl WebSocketServerBuilder {
    /// Create a builder bound to `listen` serving clients of `hub`.
    pub fn new(listen: SocketAddr, hub: NotificationHub) -> Self {
        Self { listen, hub }
    }

    /// Spawn the WebSocket server and return a shutdown handle.
    pub async fn spawn(self) -> anyhow::Result<WebSocketServerHandle> {
        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "websocket server listening");

        let state = Arc::new(WebSocketState { hub: self.hub });

        let app = Router::new()
            .route("/ws", get(upgrade_handler))
            .with_state(state);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = server.await {
                warn!(error = %err, "websocket server exited with error");
            }
        });

        Ok(WebSocketServerHandle {
            address: local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle for the running WebSocket server.
pub struct WebSocketServerHandle {
    address: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WebSocketServerHandle {
    /// Return the bound listening address.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Trigger graceful shutdown and await completion.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(err) => Err(anyhow::anyhow!(err)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
enum ClientCommand {
    JoinCourseRoom {
        #[serde(rename = "courseCode")]
        course_code: String,
    },
    LeaveCourseRoom {
        #[serde(rename = "courseCode")]
        course_code: String,
    },
    /// Relayed to the room named by `data.courseCode` as `enrollment-changed`.
    EnrollmentUpdate { data: Value },
    /// Relayed to the room named by `data.courseCode` as `capacity-changed`.
    CapacityUpdate { data: Value },
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WebSocketState>>,
) -> axum::response::Response {
    ws.on_upgrade(|socket| client_loop(socket, state))
}

async fn client_loop(mut socket: WebSocket, state: Arc<WebSocketState>) {
    let hub = &state.hub;
    let connection = hub.connection_id();
    let mut subscription = hub.subscribe();
    let mut rooms: HashSet<String> = HashSet::new();
    if let Some(metrics) = &hub.metrics {
        metrics.listener_connected();
    }
    debug!(connection, "notification listener connected");

    loop {
        tokio::select! {
            envelope = subscription.recv() => {
                let envelope = match envelope {
                    Ok(envelope) => envelope,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(connection, skipped, "websocket client lagged behind; dropping frames");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if envelope.origin == Some(connection) {
                    continue;
                }
                if let Some(topic) = &envelope.frame.topic {
                    if !rooms.contains(topic) {
                        continue;
                    }
                }

                if send_frame(&mut socket, &envelope.frame).await.is_err() {
                    break;
                }
            }
            message = socket.recv() => {
                let Some(Ok(message)) = message else {
                    break;
                };

                match message {
                    Message::Text(text) => {
                        let reply = match serde_json::from_str::<ClientCommand>(&text) {
                            Ok(cmd) => handle_command(cmd, connection, &mut rooms, hub),
                            Err(err) => {
                                warn!(connection, error = %err, "invalid websocket command payload");
                                Some(error_frame("invalid command"))
                            }
                        };
                        if let Some(reply) = reply {
                            if send_frame(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Binary(_) => {
                        if send_frame(&mut socket, &error_frame("binary unsupported")).await.is_err() {
                            break;
                        }
                    }
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                }
            }
        }
    }

    if let Some(metrics) = &hub.metrics {
        metrics.listener_disconnected();
    }
    debug!(connection, rooms = rooms.len(), "notification listener disconnected");
}

async fn send_frame(socket: &mut WebSocket, frame: &NotificationFrame) -> Result<(), axum::Error> {
    let Ok(text) = serde_json::to_string(frame) else {
        warn!(event = %frame.event, "failed to serialise notification frame");
        return Ok(());
    };
    socket.send(Message::Text(text)).await
}

fn error_frame(message: &str) -> NotificationFrame {
    NotificationFrame::new(COMMAND_ERROR, None, json!({ "message": message }))
}

fn room_of(raw: &str) -> Result<(CourseCode, String), NotificationFrame> {
    let code = CourseCode::parse(raw).map_err(|violation| error_frame(&violation.to_string()))?;
    let room = course_room(&code);
    Ok((code, room))
}

/// Apply one client command; returns the reply for the sender, if any.
fn handle_command(
    cmd: ClientCommand,
    connection: u64,
    rooms: &mut HashSet<String>,
    hub: &NotificationHub,
) -> Option<NotificationFrame> {
    match cmd {
        ClientCommand::JoinCourseRoom { course_code } => {
            let (code, room) = match room_of(&course_code) {
                Ok(pair) => pair,
                Err(reply) => return Some(reply),
            };
            rooms.insert(room.clone());
            debug!(connection, room = %room, "joined course room");
            Some(NotificationFrame::new(
                JOINED_COURSE_ROOM,
                None,
                json!({ "courseCode": code, "room": room }),
            ))
        }
        ClientCommand::LeaveCourseRoom { course_code } => {
            let (code, room) = match room_of(&course_code) {
                Ok(pair) => pair,
                Err(reply) => return Some(reply),
            };
            rooms.remove(&room);
            Some(NotificationFrame::new(
                LEFT_COURSE_ROOM,
                None,
                json!({ "courseCode": code, "room": room }),
            ))
        }
        ClientCommand::EnrollmentUpdate { data } => relay(ENROLLMENT_CHANGED, data, connection, hub),
        ClientCommand::CapacityUpdate { data } => relay(CAPACITY_CHANGED, data, connection, hub),
    }
}

/// Re-publish a client payload to the room named by its `courseCode`,
/// skipping the sender.
fn relay(
    event: &str,
    data: Value,
    connection: u64,
    hub: &NotificationHub,
) -> Option<NotificationFrame> {
    let Some(raw) = data.get("courseCode").and_then(Value::as_str) else {
        return Some(error_frame("courseCode is required"));
    };
    let (_, room) = match room_of(raw) {
        Ok(pair) => pair,
        Err(reply) => return Some(reply),
    };
    let reached = hub.dispatch(Envelope {
        frame: NotificationFrame::new(event, Some(room.clone()), data),
        origin: Some(connection),
    });
    debug!(connection, event, room = %room, reached, "client update relayed");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio::time::{timeout, Duration};
    use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn connect(handle: &WebSocketServerHandle) -> Client {
        let url = format!("ws://{}/ws", handle.local_addr());
        let (socket, _response) = connect_async(&url).await.unwrap();
        socket
    }

    async fn next_frame(socket: &mut Client) -> NotificationFrame {
        let received = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("frame within timeout")
            .unwrap()
            .unwrap();
        match received {
            WsMessage::Text(payload) => serde_json::from_str(&payload).unwrap(),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    async fn command(socket: &mut Client, body: Value) {
        socket.send(WsMessage::Text(body.to_string())).await.unwrap();
    }

    async fn join(socket: &mut Client, code: &str) {
        command(socket, json!({"action": "join-course-room", "courseCode": code})).await;
        let ack = next_frame(socket).await;
        assert_eq!(ack.event, JOINED_COURSE_ROOM);
    }

    async fn assert_silent(socket: &mut Client) {
        assert!(timeout(Duration::from_millis(100), socket.next())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn room_frames_reach_only_members() {
        let hub = NotificationHub::new(16);
        let handle = WebSocketServerBuilder::new("127.0.0.1:0".parse().unwrap(), hub.clone())
            .spawn()
            .await
            .unwrap();

        let mut member = connect(&handle).await;
        let mut outsider = connect(&handle).await;
        join(&mut member, "comp308").await;
        join(&mut outsider, "COMP229").await;

        hub.publish("course-COMP308", "course-updated", &json!({"enrollmentCount": 1}));
        let frame = next_frame(&mut member).await;
        assert_eq!(frame.event, "course-updated");
        assert_eq!(frame.topic.as_deref(), Some("course-COMP308"));
        assert_eq!(frame.payload["enrollmentCount"], 1);
        assert_silent(&mut outsider).await;

        hub.broadcast("enrollment-changed", &json!({"courseCode": "COMP308"}));
        assert_eq!(next_frame(&mut member).await.event, "enrollment-changed");
        assert_eq!(next_frame(&mut outsider).await.event, "enrollment-changed");

        command(&mut member, json!({"action": "leave-course-room", "courseCode": "COMP308"})).await;
        assert_eq!(next_frame(&mut member).await.event, LEFT_COURSE_ROOM);
        hub.publish("course-COMP308", "course-updated", &json!({}));
        assert_silent(&mut member).await;

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn client_updates_are_relayed_to_the_room_except_sender() {
        let hub = NotificationHub::new(16);
        let handle = WebSocketServerBuilder::new("127.0.0.1:0".parse().unwrap(), hub.clone())
            .spawn()
            .await
            .unwrap();

        let mut sender = connect(&handle).await;
        let mut peer = connect(&handle).await;
        join(&mut sender, "COMP308").await;
        join(&mut peer, "COMP308").await;

        command(
            &mut sender,
            json!({"action": "capacity-update", "data": {"courseCode": "COMP308", "capacity": 40}}),
        )
        .await;
        let frame = next_frame(&mut peer).await;
        assert_eq!(frame.event, CAPACITY_CHANGED);
        assert_eq!(frame.payload["capacity"], 40);
        assert_silent(&mut sender).await;

        command(&mut sender, json!({"action": "enrollment-update", "data": {}})).await;
        let reply = next_frame(&mut sender).await;
        assert_eq!(reply.event, COMMAND_ERROR);

        command(&mut sender, json!({"action": "dance"})).await;
        let reply = next_frame(&mut sender).await;
        assert_eq!(reply.payload["message"], "invalid command");

        handle.shutdown().await.unwrap();
    }

    #[test]
    fn sending_without_listeners_is_not_an_error() {
        let hub = NotificationHub::new(4);
        assert_eq!(hub.listener_count(), 0);
        assert_eq!(hub.send(NotificationFrame::new("noop", None, Value::Null)), 0);
        hub.broadcast("noop", &Value::Null);
    }
}

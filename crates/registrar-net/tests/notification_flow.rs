//! ---
//! reg_section: "05-networking-external-interfaces"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "REST writes observed by WebSocket listeners."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use registrar_core::{EnrollmentOrchestrator, MemoryStore, RuleEngine};
use registrar_net::{NotificationFrame, NotificationHub, RestApiBuilder, WebSocketServerBuilder};
use reqwest::Client;
use serde_json::json;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};

type Socket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_frame(socket: &mut Socket) -> NotificationFrame {
    let message = timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("frame within timeout")
        .unwrap()
        .unwrap();
    match message {
        WsMessage::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn enrollment_over_rest_reaches_room_listeners() {
    let hub = NotificationHub::new(32);
    let orchestrator = Arc::new(EnrollmentOrchestrator::new(
        Arc::new(MemoryStore::new()),
        Arc::new(hub.clone()),
        RuleEngine::default(),
    ));
    let api = RestApiBuilder::new("127.0.0.1:0".parse().unwrap(), orchestrator)
        .spawn()
        .await
        .unwrap();
    let ws = WebSocketServerBuilder::new("127.0.0.1:0".parse().unwrap(), hub)
        .spawn()
        .await
        .unwrap();

    let client = Client::new();
    let base = format!("http://{}", api.local_addr());
    client
        .post(format!("{base}/api/courses"))
        .json(&json!({
            "courseCode": "COMP308",
            "courseName": "Emerging Technologies",
            "instructor": "Dr. Smith",
            "credits": 3,
            "capacity": 30,
        }))
        .send()
        .await
        .unwrap();
    client
        .post(format!("{base}/api/students"))
        .json(&json!({
            "studentNumber": "300100200",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "email": "ada@example.com",
        }))
        .send()
        .await
        .unwrap();

    let (mut socket, _) = connect_async(format!("ws://{}/ws", ws.local_addr()))
        .await
        .unwrap();
    socket
        .send(WsMessage::Text(
            json!({"action": "join-course-room", "courseCode": "COMP308"}).to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(next_frame(&mut socket).await.event, "joined-course-room");

    let resp = client
        .post(format!("{base}/api/enrollment/enroll"))
        .json(&json!({"courseCode": "COMP308", "studentNumber": "300100200"}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let broadcast = next_frame(&mut socket).await;
    assert_eq!(broadcast.event, "enrollment-changed");
    assert_eq!(broadcast.topic, None);
    assert_eq!(broadcast.payload["action"], "enrolled");

    let room = next_frame(&mut socket).await;
    assert_eq!(room.event, "course-updated");
    assert_eq!(room.topic.as_deref(), Some("course-COMP308"));
    assert_eq!(room.payload["enrollmentCount"], 1);
    assert_eq!(room.payload["availableSeats"], 29);
    assert_eq!(room.payload["studentName"], "Ada Lovelace");

    api.shutdown().await.unwrap();
    ws.shutdown().await.unwrap();
}

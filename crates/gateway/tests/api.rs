//! Router tests for the operator API and the bridge webhook.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use time::macros::{date, datetime};
use tokio::sync::mpsc;
use tower::ServiceExt;

use antrian_gateway::config::{Config, TransportKind};
use antrian_gateway::conversation::{ConversationEngine, InputClassifier, Questionnaire};
use antrian_gateway::lifecycle::{ConnectionLifecycleManager, LifecycleConfig};
use antrian_gateway::store::{MemoryRecordStore, RecordStore};
use antrian_gateway::transport::{
    sign_payload, BridgeTransportConfig, HttpBridgeTransport, LoopbackTransport, SentMessage,
    TransportAdapter, TransportEvent, SIGNATURE_HEADER,
};
use antrian_gateway::{create_router, AppState};
use antrian_shared::{Answers, NewQueueRecord, QueueStatus, RecordId};

const TOKEN: &str = "test-operator-token-at-least-32-characters";
const WEBHOOK_SECRET: &str = "test-webhook-secret-at-least-32-characters";

fn config(transport: TransportKind) -> Config {
    Config {
        bind_address: "127.0.0.1:0".to_string(),
        database_url: "postgres://unused".to_string(),
        database_max_connections: 1,
        operator_token: TOKEN.to_string(),
        operator_secret: "rahasia".to_string(),
        transport,
        bridge_url: "http://127.0.0.1:9".to_string(),
        bridge_api_key: None,
        bridge_webhook_secret: WEBHOOK_SECRET.to_string(),
        auto_start_transport: false,
        clinic_name: "PUSKESMAS".to_string(),
        clinic_utc_offset_hours: 7,
        restart_keywords: vec!["MULAI".to_string()],
        skip_tokens: vec!["TIDAK".to_string()],
        conversation_ttl_minutes: 30,
        watchdog_interval_secs: 30,
        liveness_timeout_secs: 10,
        store_timeout_secs: 10,
        delivery_timeout_secs: 30,
    }
}

struct TestApp {
    router: Router,
    store: Arc<MemoryRecordStore>,
    loopback: Arc<LoopbackTransport>,
    bridge: Option<Arc<HttpBridgeTransport>>,
}

fn app_with(kind: TransportKind) -> TestApp {
    let store = Arc::new(MemoryRecordStore::new());
    let loopback = Arc::new(LoopbackTransport::new());
    let bridge = match kind {
        TransportKind::Bridge => Some(Arc::new(
            HttpBridgeTransport::new(BridgeTransportConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                api_key: None,
                webhook_secret: WEBHOOK_SECRET.to_string(),
                request_timeout: Duration::from_secs(1),
            })
            .unwrap(),
        )),
        TransportKind::Loopback => None,
    };
    let transport: Arc<dyn TransportAdapter> = match &bridge {
        Some(bridge) => bridge.clone(),
        None => loopback.clone(),
    };

    let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel();
    let lifecycle = ConnectionLifecycleManager::new(
        transport.clone(),
        store.clone(),
        inbound_tx,
        LifecycleConfig::default(),
    );
    let engine = Arc::new(ConversationEngine::new(
        Arc::new(Questionnaire::patient_registration().unwrap()),
        InputClassifier::default(),
        None,
    ));
    let state = AppState::new(
        config(kind),
        store.clone(),
        lifecycle,
        engine,
        transport,
        bridge.clone(),
    );

    TestApp {
        router: create_router(state),
        store,
        loopback,
        bridge,
    }
}

fn app() -> TestApp {
    app_with(TransportKind::Loopback)
}

fn authed(method: &str, uri: &str, body: Option<&str>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", TOKEN));
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

// =============================================================================
// Health and auth
// =============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let app = app();

    let (status, _) = send(&app.router, Request::get("/health/live").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app.router, Request::get("/health/ready").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app.router, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["transport"], "DISCONNECTED");
    assert_eq!(body["active_conversations"], 0);
}

#[tokio::test]
async fn test_operator_routes_require_token() {
    let app = app();

    let (status, body) = send(
        &app.router,
        Request::get("/api/v1/session/status").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let req = Request::get("/api/v1/session/status")
        .header("authorization", "Bearer wrong-token")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app.router, authed("GET", "/api/v1/session/status", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "DISCONNECTED");
}

#[tokio::test]
async fn test_verify_secret() {
    let app = app();

    let req = Request::post("/api/v1/operator/verify")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"secret":"rahasia"}"#))
        .unwrap();
    let (status, body) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_valid"], true);

    let req = Request::post("/api/v1/operator/verify")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"secret":"salah"}"#))
        .unwrap();
    let (_, body) = send(&app.router, req).await;
    assert_eq!(body["is_valid"], false);

    let req = Request::post("/api/v1/operator/verify")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (_, body) = send(&app.router, req).await;
    assert_eq!(body["is_valid"], false);
}

// =============================================================================
// Session and messages
// =============================================================================

#[tokio::test]
async fn test_credential_absent_until_scan_requested() {
    let app = app();

    let (status, body) = send(&app.router, authed("GET", "/api/v1/session/credential", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["payload"].is_null());
    assert!(body.get("qr_data_url").is_none());
}

#[tokio::test]
async fn test_start_session_reports_credential() {
    let app = app();

    let (status, body) = send(&app.router, authed("POST", "/api/v1/session/start", None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);

    // Start runs in the background
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while app.loopback.subscriber_count() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "transport never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    app.loopback
        .emit(TransportEvent::CredentialChallenge("2@kode-qr".to_string()));

    let mut body = Value::Null;
    while body["payload"].is_null() {
        assert!(tokio::time::Instant::now() < deadline, "credential never published");
        tokio::time::sleep(Duration::from_millis(10)).await;
        body = send(&app.router, authed("GET", "/api/v1/session/credential", None)).await.1;
    }
    assert_eq!(body["payload"], "2@kode-qr");
    assert!(body["qr_data_url"]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));

    let (_, status) = send(&app.router, authed("GET", "/api/v1/session/status", None)).await;
    assert_eq!(status["status"], "AWAITING_SCAN");
}

#[tokio::test]
async fn test_send_message() {
    let app = app();

    let (status, body) = send(
        &app.router,
        authed("POST", "/api/v1/messages", Some(r#"{"to":"628123"}"#)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, body) = send(
        &app.router,
        authed(
            "POST",
            "/api/v1/messages",
            Some(r#"{"to":"628123","message":"Halo dari petugas"}"#),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["id"], "loopback-1");
    assert_eq!(
        app.loopback.sent(),
        vec![SentMessage::Text {
            to: "628123".to_string(),
            text: "Halo dari petugas".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_send_message_before_bridge_start_is_unavailable() {
    let app = app_with(TransportKind::Bridge);

    let (status, body) = send(
        &app.router,
        authed(
            "POST",
            "/api/v1/messages",
            Some(r#"{"to":"628123","message":"Halo dari petugas"}"#),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "TRANSPORT_UNAVAILABLE");
}

#[tokio::test]
async fn test_status_shows_auth_failure_reason() {
    let app = app();
    send(&app.router, authed("POST", "/api/v1/session/start", None)).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while app.loopback.subscriber_count() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "transport never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    app.loopback
        .emit(TransportEvent::AuthFailed("sesi ditolak".to_string()));

    let mut body = Value::Null;
    while body["status"] != "ERROR" {
        assert!(tokio::time::Instant::now() < deadline, "error never published");
        tokio::time::sleep(Duration::from_millis(10)).await;
        body = send(&app.router, authed("GET", "/api/v1/session/status", None)).await.1;
    }
    assert_eq!(body["detail"], "Autentikasi gagal: sesi ditolak");

    // The stored document keeps the bare reason
    let stored = app.store.load_status().await.unwrap().unwrap();
    assert_eq!(stored.detail.as_deref(), Some("sesi ditolak"));
}

// =============================================================================
// Queue listing
// =============================================================================

#[tokio::test]
async fn test_queue_lists_one_day_in_ticket_order() {
    let app = app();
    let day = date!(2024 - 03 - 09);

    for (n, at) in [
        (2, datetime!(2024-03-09 03:00 UTC)),
        (1, datetime!(2024-03-09 02:00 UTC)),
    ] {
        let record = NewQueueRecord::from_chat(n, day, at, "628123", Answers::new())
            .into_record(RecordId::new());
        app.store.seed(day, record).await;
    }
    let mut served = NewQueueRecord::from_chat(
        3,
        day,
        datetime!(2024-03-09 04:00 UTC),
        "628124",
        Answers::new(),
    )
    .into_record(RecordId::new());
    served.status = QueueStatus::Done;
    app.store.seed(day, served).await;

    // Local day starts at 17:00 UTC the evening before
    let other_day = NewQueueRecord::from_chat(
        1,
        date!(2024 - 03 - 10),
        datetime!(2024-03-09 17:30 UTC),
        "628125",
        Answers::new(),
    )
    .into_record(RecordId::new());
    app.store.seed(date!(2024 - 03 - 10), other_day).await;

    let (status, body) = send(&app.router, authed("GET", "/api/v1/queue?date=2024-03-09", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["date"], "2024-03-09");
    assert_eq!(body["total"], 3);
    let numbers: Vec<i64> = body["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["sequence_number"].as_i64().unwrap())
        .collect();
    assert_eq!(numbers, vec![1, 2, 3]);

    let (_, body) = send(
        &app.router,
        authed("GET", "/api/v1/queue?date=2024-03-09&status=waiting", None),
    )
    .await;
    assert_eq!(body["total"], 2);

    let (status, body) = send(&app.router, authed("GET", "/api/v1/queue?date=09-03-2024", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

}

// =============================================================================
// Bridge webhook
// =============================================================================

#[tokio::test]
async fn test_webhook_without_bridge_is_not_found() {
    let app = app();

    let req = Request::post("/api/v1/transport/events")
        .header(SIGNATURE_HEADER, "sha256=00")
        .body(Body::from(r#"{"type":"ready"}"#))
        .unwrap();
    let (status, _) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_verifies_and_dispatches() {
    let app = app_with(TransportKind::Bridge);
    let bridge = app.bridge.clone().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = bridge.subscribe(tx);

    let body = r#"{"type":"message","from":"628123@c.us","body":"MULAI"}"#;

    let req = Request::post("/api/v1/transport/events")
        .header(SIGNATURE_HEADER, sign_payload("wrong-secret", body.as_bytes()))
        .body(Body::from(body))
        .unwrap();
    let (status, resp) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(resp["error"]["code"], "INVALID_SIGNATURE");
    assert!(rx.try_recv().is_err());

    let req = Request::post("/api/v1/transport/events")
        .body(Body::from(body))
        .unwrap();
    let (status, _) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let req = Request::post("/api/v1/transport/events")
        .header(SIGNATURE_HEADER, sign_payload(WEBHOOK_SECRET, body.as_bytes()))
        .body(Body::from(body))
        .unwrap();
    let (status, _) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    match rx.try_recv().unwrap() {
        TransportEvent::Message(message) => {
            assert_eq!(message.sender_id, "628123");
            assert_eq!(message.text, "MULAI");
            assert!(!message.is_group);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let garbage = "not json";
    let req = Request::post("/api/v1/transport/events")
        .header(SIGNATURE_HEADER, sign_payload(WEBHOOK_SECRET, garbage.as_bytes()))
        .body(Body::from(garbage))
        .unwrap();
    let (status, _) = send(&app.router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

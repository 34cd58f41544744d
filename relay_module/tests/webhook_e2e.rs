use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use mockito::{Matcher, Mock, Server, ServerGuard};
use relay_module::retry::RetryPolicy;
use relay_module::service::{build_pipeline, build_router, RelayConfig, DEFAULT_MAX_BODY_BYTES};
use relay_module::store::RelayStore;
use relay_module::{WebhookOutcome, WebhookPipeline};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const ASSIGNMENT: &str = r#"{"allocated_to":"a@x.com","reference_type":"Task","reference_name":"T-1","assigned_by_full_name":"Bob","due_date":"2024-01-01"}"#;
const ROOM_PATH: &str = "/ocs/v2.php/apps/spreed/api/v4/room";

fn test_config(erp_url: &str, talk_url: &str, db_path: &Path) -> RelayConfig {
    RelayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        db_path: db_path.to_path_buf(),
        max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        http_timeout: Duration::from_secs(5),
        talk_retry: RetryPolicy::new(5, Duration::from_millis(1)),
        erpnext_api_url: erp_url.to_string(),
        erpnext_api_key: "key".to_string(),
        erpnext_api_secret: "secret".to_string(),
        nextcloud_api_url: talk_url.to_string(),
        nextcloud_username: "relay".to_string(),
        nextcloud_app_password: "app-pass".to_string(),
    }
}

struct Relay {
    erp: ServerGuard,
    talk: ServerGuard,
    pipeline: WebhookPipeline,
    db_path: std::path::PathBuf,
    _temp: TempDir,
}

impl Relay {
    fn start() -> Self {
        let erp = Server::new();
        let talk = Server::new();
        let temp = TempDir::new().expect("tempdir");
        let db_path = temp.path().join("erpnext_talk.db");
        let config = test_config(&erp.url(), &talk.url(), &db_path);
        let pipeline = build_pipeline(&config).expect("pipeline");
        Self {
            erp,
            talk,
            pipeline,
            db_path,
            _temp: temp,
        }
    }

    fn deliver_json(&self, body: &str) -> WebhookOutcome {
        self.pipeline.handle(Some("application/json"), body.as_bytes())
    }

    fn mock_user(&mut self, body: Value) -> Mock {
        self.erp
            .mock("GET", Matcher::Regex(r"^/api/resource/User/a(%40|@)x\.com$".to_string()))
            .match_header("authorization", "token key:secret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
    }

    fn mock_alice(&mut self) -> Mock {
        self.mock_user(json!({"data": {"name": "a@x.com", "full_name": "Alice Smith"}}))
    }

    fn mock_room(&mut self, status: usize, body: Value) -> Mock {
        self.talk
            .mock("POST", ROOM_PATH)
            .match_query(Matcher::UrlEncoded("format".into(), "json".into()))
            .match_header("ocs-apirequest", "true")
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
    }

    fn mock_chat(&mut self, token: &str, status: usize) -> Mock {
        self.talk
            .mock("POST", format!("/ocs/v2.php/apps/spreed/api/v1/chat/{}", token).as_str())
            .match_query(Matcher::UrlEncoded("format".into(), "json".into()))
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ocs":{"meta":{"status":"ok"}}}"#)
    }
}

#[test]
fn fresh_assignment_creates_room_and_sends_message() {
    let mut relay = Relay::start();
    let user = relay.mock_alice().create();
    let room = relay
        .mock_room(200, json!({"ocs": {"data": {"token": "tok1"}}}))
        .match_body(Matcher::Json(json!({"roomType": 1, "invite": "Alice Smith"})))
        .expect(1)
        .create();
    let chat = relay
        .mock_chat("tok1", 201)
        .match_body(Matcher::Regex("Hey Alice Smith".to_string()))
        .expect(1)
        .create();

    let outcome = relay.deliver_json(ASSIGNMENT);

    assert_eq!(outcome, WebhookOutcome::Success);
    assert_eq!(outcome.status(), StatusCode::OK);
    assert_eq!(
        outcome.body(),
        json!({"message": "Notification sent to Nextcloud Talk"})
    );
    user.assert();
    room.assert();
    chat.assert();

    let store = RelayStore::new(&relay.db_path).expect("store");
    assert_eq!(
        store.conversation_handle("Alice Smith").expect("lookup"),
        Some("tok1".to_string())
    );
}

#[test]
fn redelivery_is_acknowledged_without_side_effects() {
    let mut relay = Relay::start();
    let user = relay.mock_alice().expect(1).create();
    let room = relay
        .mock_room(200, json!({"ocs": {"data": {"token": "tok1"}}}))
        .expect(1)
        .create();
    let chat = relay.mock_chat("tok1", 201).expect(1).create();

    assert_eq!(relay.deliver_json(ASSIGNMENT), WebhookOutcome::Success);
    let reordered = r#"{"due_date":"2024-01-01","assigned_by_full_name":"Bob","reference_name":"T-1","reference_type":"Task","allocated_to":"a@x.com"}"#;
    let outcome = relay.deliver_json(reordered);

    assert_eq!(outcome, WebhookOutcome::AlreadyProcessed);
    assert_eq!(outcome.body(), json!({"message": "Webhook already processed"}));
    user.assert();
    room.assert();
    chat.assert();
}

#[test]
fn cached_room_skips_creation() {
    let mut relay = Relay::start();
    let _user = relay.mock_alice().create();
    let room = relay
        .mock_room(200, json!({"ocs": {"data": {"token": "tok1"}}}))
        .expect(1)
        .create();
    let chat = relay.mock_chat("tok1", 201).expect(2).create();

    assert_eq!(relay.deliver_json(ASSIGNMENT), WebhookOutcome::Success);
    let second = ASSIGNMENT.replace("T-1", "T-2");
    assert_eq!(relay.deliver_json(&second), WebhookOutcome::Success);

    room.assert();
    chat.assert();
}

#[test]
fn rate_limited_room_creation_gives_up_after_five_attempts() {
    let mut relay = Relay::start();
    let _user = relay.mock_alice().create();
    let room = relay
        .mock_room(429, json!({"ocs": {"meta": {"status": "failure"}}}))
        .expect(5)
        .create();
    let chat = relay.mock_chat("tok1", 201).expect(0).create();

    let outcome = relay.deliver_json(ASSIGNMENT);

    assert_eq!(
        outcome,
        WebhookOutcome::UpstreamError("Could not create or find Talk conversation".to_string())
    );
    assert_eq!(outcome.status(), StatusCode::INTERNAL_SERVER_ERROR);
    room.assert();
    chat.assert();
}

#[test]
fn unknown_user_is_an_upstream_error() {
    let mut relay = Relay::start();
    let user = relay
        .erp
        .mock("GET", Matcher::Regex(r"^/api/resource/User/".to_string()))
        .with_status(404)
        .with_body(r#"{"exc_type":"DoesNotExistError"}"#)
        .create();
    let room = relay.mock_room(200, json!({})).expect(0).create();

    let outcome = relay.deliver_json(ASSIGNMENT);

    assert_eq!(
        outcome.body(),
        json!({"error": "Could not fetch user details for a@x.com"})
    );
    assert_eq!(outcome.status(), StatusCode::INTERNAL_SERVER_ERROR);
    user.assert();
    room.assert();
}

#[test]
fn user_without_full_name_is_an_upstream_error() {
    let mut relay = Relay::start();
    let _user = relay
        .mock_user(json!({"data": {"name": "a@x.com", "full_name": "  "}}))
        .create();

    let outcome = relay.deliver_json(ASSIGNMENT);

    assert_eq!(
        outcome,
        WebhookOutcome::UpstreamError("Could not retrieve full name".to_string())
    );
}

#[test]
fn failed_send_is_reported() {
    let mut relay = Relay::start();
    let _user = relay.mock_alice().create();
    let _room = relay
        .mock_room(200, json!({"ocs": {"data": {"token": "tok1"}}}))
        .create();
    let chat = relay.mock_chat("tok1", 500).expect(1).create();

    let outcome = relay.deliver_json(ASSIGNMENT);

    assert_eq!(
        outcome,
        WebhookOutcome::UpstreamError("Could not send message to Nextcloud Talk".to_string())
    );
    chat.assert();
}

#[test]
fn form_encoded_delivery_is_relayed() {
    let mut relay = Relay::start();
    let _user = relay.mock_alice().create();
    let _room = relay
        .mock_room(200, json!({"ocs": {"data": {"token": "tok1"}}}))
        .create();
    let chat = relay.mock_chat("tok1", 201).expect(1).create();

    let body = format!("{}=", urlencoding::encode(ASSIGNMENT));
    let outcome = relay
        .pipeline
        .handle(Some("application/x-www-form-urlencoded"), body.as_bytes());

    assert_eq!(outcome, WebhookOutcome::Success);
    chat.assert();
}

fn offline_router(temp: &TempDir) -> axum::Router {
    let config = test_config(
        "http://127.0.0.1:9",
        "http://127.0.0.1:9",
        &temp.path().join("relay.db"),
    );
    let pipeline = build_pipeline(&config).expect("pipeline");
    build_router(Arc::new(pipeline), 1024)
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let temp = TempDir::new().expect("tempdir");
    let response = offline_router(&temp)
        .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn webhook_route_rejects_unsupported_content() {
    let temp = TempDir::new().expect("tempdir");
    let response = offline_router(&temp)
        .oneshot(
            Request::post("/webhook")
                .header("content-type", "text/plain")
                .body(Body::from("hello"))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        read_json(response).await,
        json!({"error": "No data or unsupported data format"})
    );
}

#[tokio::test]
async fn webhook_route_rejects_missing_recipient() {
    let temp = TempDir::new().expect("tempdir");
    let response = offline_router(&temp)
        .oneshot(
            Request::post("/webhook")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"reference_type":"Task"}"#))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        read_json(response).await,
        json!({"error": "Missing 'allocated_to' in webhook payload"})
    );
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let temp = TempDir::new().expect("tempdir");
    let response = offline_router(&temp)
        .oneshot(
            Request::post("/webhook")
                .header("content-type", "application/json")
                .body(Body::from(vec![b' '; 4096]))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

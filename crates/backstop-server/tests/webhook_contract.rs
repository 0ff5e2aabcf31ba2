use backstop_engine::ControllerConfig;
use backstop_model::ServiceName;
use backstop_server::{build_router, AppState, DeploymentApi, FakeDeploymentApi, ServerConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const TOKEN: &str = "test-token";

fn fast_config() -> ControllerConfig {
    ControllerConfig {
        poll_interval: Duration::from_millis(1),
        execution_deadline: Duration::from_millis(500),
        decision_timeout: Duration::from_secs(2),
        ..ControllerConfig::default()
    }
}

async fn spawn_server(deploy: Arc<FakeDeploymentApi>) -> std::net::SocketAddr {
    let server = ServerConfig {
        webhook_auth_token: TOKEN.to_string(),
        ..ServerConfig::default()
    };
    let state = AppState::new(fast_config(), server, deploy as Arc<dyn DeploymentApi>);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

async fn send_raw(
    addr: std::net::SocketAddr,
    method: &str,
    path: &str,
    body: Option<&Value>,
) -> (u16, String) {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("connect server");
    let payload = body.map(|b| b.to_string()).unwrap_or_default();
    let mut req = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
    if body.is_some() {
        req.push_str("Content-Type: application/json\r\n");
    }
    req.push_str(&format!("Content-Length: {}\r\n\r\n{payload}", payload.len()));
    stream.write_all(req.as_bytes()).await.expect("write request");
    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .await
        .expect("read response");
    let (head, body) = response
        .split_once("\r\n\r\n")
        .expect("http response separator");
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .expect("http status");
    (status, body.to_string())
}

fn alert_body(incident_id: &str, service: &str, rate: f64) -> Value {
    json!({
        "incident": {
            "incident_id": incident_id,
            "policy_name": "error-budget-burn",
            "condition": {"thresholdValue": rate, "windowSeconds": 300},
            "resource": {"service_name": service}
        }
    })
}

fn webhook_path(token: &str) -> String {
    format!("/webhook/error-budget-alert?auth_token={token}")
}

#[tokio::test]
async fn bad_token_is_rejected_before_parsing() {
    let addr = spawn_server(Arc::new(FakeDeploymentApi::default())).await;
    let body = alert_body("inc-auth", "checkout", 0.5);
    let (status, resp) = send_raw(addr, "POST", &webhook_path("wrong"), Some(&body)).await;
    assert_eq!(status, 401);
    let parsed: Value = serde_json::from_str(&resp).expect("error json");
    assert_eq!(parsed["code"], "UNAUTHORIZED");

    let (status, _) = send_raw(addr, "POST", "/webhook/error-budget-alert", Some(&body)).await;
    assert_eq!(status, 401, "missing token behaves like a bad one");
}

#[tokio::test]
async fn malformed_payload_reports_field_errors() {
    let addr = spawn_server(Arc::new(FakeDeploymentApi::default())).await;
    let body = json!({"incident": {"incident_id": "inc-1"}});
    let (status, resp) = send_raw(addr, "POST", &webhook_path(TOKEN), Some(&body)).await;
    assert_eq!(status, 400);
    let parsed: Value = serde_json::from_str(&resp).expect("error json");
    assert_eq!(parsed["code"], "VALIDATION_FAILED");
    let fields = parsed["details"]["field_errors"].as_array().expect("fields");
    assert!(fields
        .iter()
        .any(|f| f["field"] == "resource.service_name"));
    assert!(fields
        .iter()
        .any(|f| f["field"] == "condition.thresholdValue"));
}

#[tokio::test]
async fn unparsable_body_is_a_400_not_a_crash() {
    let addr = spawn_server(Arc::new(FakeDeploymentApi::default())).await;
    let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    let garbage = "this is not json";
    let req = format!(
        "POST {} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{garbage}",
        webhook_path(TOKEN),
        garbage.len()
    );
    stream.write_all(req.as_bytes()).await.expect("write");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");
    assert!(response.starts_with("HTTP/1.1 400"));
}

#[tokio::test]
async fn high_error_rate_with_known_good_triggers_rollback() {
    let deploy = Arc::new(FakeDeploymentApi::default());
    deploy
        .set_stable(&ServiceName::parse("checkout").unwrap(), "stable-v3")
        .await;
    let addr = spawn_server(Arc::clone(&deploy)).await;

    let body = alert_body("inc-hot", "checkout", 0.025);
    let (status, resp) = send_raw(addr, "POST", &webhook_path(TOKEN), Some(&body)).await;
    assert_eq!(status, 200);
    let ack: Value = serde_json::from_str(&resp).expect("ack json");
    assert_eq!(ack["accepted"], true);
    assert_eq!(ack["deduplicated"], false);
    let rollback_id = ack["rollback_id"].as_str().expect("rollback id").to_string();

    // Poll the status API until the background rollout finishes.
    let mut last = Value::Null;
    for _ in 0..200 {
        let (status, resp) =
            send_raw(addr, "GET", &format!("/rollback/status/{rollback_id}"), None).await;
        assert_eq!(status, 200);
        last = serde_json::from_str(&resp).expect("record json");
        if last["status"] == "succeeded" || last["status"] == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(last["status"], "succeeded");
    assert_eq!(last["target_revision"], "stable-v3");
    assert_eq!(last["triggered_by"], "automated");
    assert!((last["confidence"].as_f64().unwrap() - 0.85).abs() < 1e-9);

    let shifts = deploy.shifts.lock().await;
    let percents: Vec<u8> = shifts.iter().map(|(_, _, p)| *p).collect();
    assert_eq!(percents, vec![25, 50, 100]);
}

#[tokio::test]
async fn below_threshold_alert_is_accepted_without_rollback() {
    let deploy = Arc::new(FakeDeploymentApi::default());
    deploy
        .set_stable(&ServiceName::parse("checkout").unwrap(), "stable-v3")
        .await;
    let addr = spawn_server(deploy).await;

    let body = alert_body("inc-cool", "checkout", 0.005);
    let (status, resp) = send_raw(addr, "POST", &webhook_path(TOKEN), Some(&body)).await;
    assert_eq!(status, 200);
    let ack: Value = serde_json::from_str(&resp).expect("ack json");
    assert_eq!(ack["accepted"], true);
    assert!(ack.get("rollback_id").is_none());

    let (_, recent) = send_raw(addr, "GET", "/rollback/recent?service=checkout", None).await;
    let recent: Value = serde_json::from_str(&recent).expect("recent json");
    assert_eq!(recent["records"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn duplicate_incident_id_creates_exactly_one_record() {
    let deploy = Arc::new(FakeDeploymentApi::default());
    deploy
        .set_stable(&ServiceName::parse("checkout").unwrap(), "stable-v3")
        .await;
    let addr = spawn_server(deploy).await;

    let body = alert_body("inc-dup", "checkout", 0.025);
    let (_, first) = send_raw(addr, "POST", &webhook_path(TOKEN), Some(&body)).await;
    let first: Value = serde_json::from_str(&first).expect("first ack");
    assert_eq!(first["deduplicated"], false);

    let (status, second) = send_raw(addr, "POST", &webhook_path(TOKEN), Some(&body)).await;
    assert_eq!(status, 200);
    let second: Value = serde_json::from_str(&second).expect("second ack");
    assert_eq!(second["accepted"], true);
    assert_eq!(second["deduplicated"], true);
    assert!(second.get("rollback_id").is_none());

    let (_, recent) = send_raw(addr, "GET", "/rollback/recent?service=checkout", None).await;
    let recent: Value = serde_json::from_str(&recent).expect("recent json");
    assert_eq!(recent["records"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_known_good_downgrades_to_no_rollback() {
    // No stable revision scripted into the fake.
    let addr = spawn_server(Arc::new(FakeDeploymentApi::default())).await;

    let body = alert_body("inc-nolkg", "checkout", 0.05);
    let (status, resp) = send_raw(addr, "POST", &webhook_path(TOKEN), Some(&body)).await;
    assert_eq!(status, 200);
    let ack: Value = serde_json::from_str(&resp).expect("ack json");
    assert!(ack.get("rollback_id").is_none());

    let (_, metrics) = send_raw(addr, "GET", "/metrics", None).await;
    assert!(metrics.contains("reason=\"no known-good revision\"} 1"));
}

#[tokio::test]
async fn kill_switch_disables_and_reenables_automation() {
    let deploy = Arc::new(FakeDeploymentApi::default());
    deploy
        .set_stable(&ServiceName::parse("checkout").unwrap(), "stable-v3")
        .await;
    let addr = spawn_server(deploy).await;

    let (status, resp) = send_raw(addr, "POST", "/rollback/kill-switch?enabled=false", None).await;
    assert_eq!(status, 200);
    let body: Value = serde_json::from_str(&resp).expect("switch json");
    assert_eq!(body["rollback_enabled"], false);

    let alert = alert_body("inc-killed", "checkout", 0.5);
    let (_, ack) = send_raw(addr, "POST", &webhook_path(TOKEN), Some(&alert)).await;
    let ack: Value = serde_json::from_str(&ack).expect("ack json");
    assert!(ack.get("rollback_id").is_none());
    let (_, metrics) = send_raw(addr, "GET", "/metrics", None).await;
    assert!(metrics.contains("reason=\"rollbacks disabled\"} 1"));

    let (_, resp) = send_raw(addr, "POST", "/rollback/kill-switch?enabled=true", None).await;
    let body: Value = serde_json::from_str(&resp).expect("switch json");
    assert_eq!(body["rollback_enabled"], true);

    let alert = alert_body("inc-revived", "checkout", 0.5);
    let (_, ack) = send_raw(addr, "POST", &webhook_path(TOKEN), Some(&alert)).await;
    let ack: Value = serde_json::from_str(&ack).expect("ack json");
    assert!(ack.get("rollback_id").is_some());
}

#[tokio::test]
async fn kill_switch_requires_a_boolean() {
    let addr = spawn_server(Arc::new(FakeDeploymentApi::default())).await;
    let (status, _) = send_raw(addr, "POST", "/rollback/kill-switch?enabled=maybe", None).await;
    assert_eq!(status, 400);
    let (status, _) = send_raw(addr, "POST", "/rollback/kill-switch", None).await;
    assert_eq!(status, 400);
}

//! HTTP backend tests against `wiremock` servers.
//!
//! Tests verify:
//! - Request shape per API style (path, auth header, body)
//! - Status codes map onto transient vs fatal errors
//! - Transport failures (refused connection, timeout) are transient
//! - A profile file on disk drives a full route → dispatch → fallback cycle
//! - Explicit endpoints in a profile file win over `AZURE_API_BASE`

use std::sync::Once;
use std::time::Duration;

use providers::{ApiStyle, ChatCompletionsBackend, Endpoint, ProfileLoader, Sampling};
use routing::{Backend, BackendError, BackendId, BackendRequest, DispatchStatus, TaskRequest};
use serde_json::json;
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

static INIT: Once = Once::new();

fn init_test_subscriber() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

fn ok_body() -> serde_json::Value {
    json!({
        "model": "served-model",
        "choices": [{
            "message": {"role": "assistant", "content": "pong"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
    })
}

fn backend(base: &str, style: ApiStyle, timeout: Duration) -> ChatCompletionsBackend {
    let client = reqwest::Client::builder().timeout(timeout).build().unwrap();
    ChatCompletionsBackend::new(
        client,
        Endpoint {
            api_base: base.to_string(),
            api_version: "2025-01-01-preview".to_string(),
            api_key: "test-key".to_string(),
            style,
        },
        "gpt-4o",
        Sampling {
            temperature: 0.7,
            max_tokens: Some(256),
        },
        timeout,
    )
}

fn request(text: &str) -> BackendRequest {
    BackendRequest::from_task(&TaskRequest::new(text))
}

async fn sent_bodies(server: &MockServer) -> Vec<serde_json::Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

// ── Request shape ──────────────────────────────────────────────────

#[tokio::test]
async fn test_azure_openai_request_shape() {
    init_test_subscriber();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/deployments/gpt-4o/chat/completions"))
        .and(query_param("api-version", "2025-01-01-preview"))
        .and(header("api-key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
        .expect(1)
        .mount(&server)
        .await;

    let raw = backend(&server.uri(), ApiStyle::AzureOpenai, Duration::from_secs(5))
        .submit(&request("ping"))
        .await
        .unwrap();
    assert_eq!(raw.content, "pong");
    assert_eq!(raw.model.as_deref(), Some("served-model"));
    assert_eq!(raw.usage.unwrap().total_tokens, 4);

    let bodies = sent_bodies(&server).await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["messages"][0]["content"], "ping");
    assert_eq!(bodies[0]["max_tokens"], 256);
    assert_eq!(bodies[0]["temperature"], 0.7);
    assert!(bodies[0].get("model").is_none());
}

#[tokio::test]
async fn test_openai_style_uses_bearer_and_model_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
        .expect(1)
        .mount(&server)
        .await;

    backend(&server.uri(), ApiStyle::Openai, Duration::from_secs(5))
        .submit(&request("ping"))
        .await
        .unwrap();

    let bodies = sent_bodies(&server).await;
    assert_eq!(bodies[0]["model"], "gpt-4o");
}

// ── Error mapping ──────────────────────────────────────────────────

#[tokio::test]
async fn test_status_mapping() {
    // (status, serialized variant name, transient)
    let cases = [
        (429, "rate_limited", true),
        (503, "server", true),
        (408, "upstream_timeout", true),
        (401, "auth", false),
        (400, "bad_request", false),
        (422, "bad_request", false),
    ];
    for (status, kind, transient) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({"error": "nope"})))
            .mount(&server)
            .await;

        let err = backend(&server.uri(), ApiStyle::AzureInference, Duration::from_secs(5))
            .submit(&request("x"))
            .await
            .unwrap_err();
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get(kind).is_some(), "status {status} mapped to {err:?}");
        assert_eq!(err.is_transient(), transient, "status {status}");
    }
}

#[tokio::test]
async fn test_unparseable_success_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = backend(&server.uri(), ApiStyle::Openai, Duration::from_secs(5))
        .submit(&request("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidResponse(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_refused_connection_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = backend(&format!("http://{}", addr), ApiStyle::Openai, Duration::from_secs(5))
        .submit(&request("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Connection(_)), "{err:?}");
}

#[tokio::test]
async fn test_client_timeout_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ok_body())
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let timeout = Duration::from_millis(200);
    let err = backend(&server.uri(), ApiStyle::Openai, timeout)
        .submit(&request("x"))
        .await
        .unwrap_err();
    assert_eq!(err, BackendError::Timeout(timeout));
}

// ── Profile files end to end ───────────────────────────────────────

#[tokio::test]
async fn test_profile_file_drives_fallback() -> anyhow::Result<()> {
    init_test_subscriber();
    let flaky = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .expect(1)
        .mount(&flaky)
        .await;
    let steady = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer k"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
        .expect(1)
        .mount(&steady)
        .await;

    let dir = tempfile::tempdir()?;
    let file = dir.path().join("profiles.toml");
    std::fs::write(
        &file,
        format!(
            r#"
[profiles.local]
api_style = "openai"
api_key_env = "LOCAL_KEY"

[[profiles.local.backends]]
id = "flaky"
model = "cheap-model"
capabilities = ["general"]
cost_weight = 0.1
api_base = "{}"

[[profiles.local.backends]]
id = "steady"
model = "solid-model"
capabilities = ["general"]
cost_weight = 0.9
api_base = "{}"
"#,
            flaky.uri(),
            steady.uri()
        ),
    )?;

    let file_str = file.to_string_lossy().to_string();
    let loader = ProfileLoader::with_lookup(move |var| match var {
        "MODEL_ROUTER_PROFILE_PATH" => Some(file_str.clone()),
        "MODEL_ROUTER_PROFILE" => Some("local".to_string()),
        "LOCAL_KEY" => Some("k".to_string()),
        _ => None,
    });
    let service = loader.load()?.into_service()?;

    let result = service.execute(&TaskRequest::new("hello")).await?;
    assert_eq!(result.backend, BackendId::from("steady"));
    assert_eq!(result.status, DispatchStatus::Fallback);
    assert_eq!(result.retry_count, 1);
    assert_eq!(result.content, "pong");
    assert_eq!(sent_bodies(&steady).await[0]["model"], "solid-model");
    Ok(())
}

#[tokio::test]
async fn test_file_endpoint_wins_over_azure_env() -> anyhow::Result<()> {
    let local = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
        .expect(1)
        .mount(&local)
        .await;

    let dir = tempfile::tempdir()?;
    let file = dir.path().join("profiles.toml");
    std::fs::write(
        &file,
        format!(
            r#"
[profiles.local]
api_style = "openai"

[[profiles.local.backends]]
id = "local"
model = "local-model"
capabilities = ["general"]
api_base = "{}"
"#,
            local.uri()
        ),
    )?;

    let file_str = file.to_string_lossy().to_string();
    let service = ProfileLoader::with_lookup(move |var| match var {
        "MODEL_ROUTER_PROFILE_PATH" => Some(file_str.clone()),
        "MODEL_ROUTER_PROFILE" => Some("local".to_string()),
        "AZURE_API_BASE" => Some("http://127.0.0.1:1".to_string()),
        "AZURE_API_KEY" => Some("k".to_string()),
        _ => None,
    })
    .load()?
    .into_service()?;

    let result = service.execute(&TaskRequest::new("hello")).await?;
    assert_eq!(result.backend, BackendId::from("local"));
    assert_eq!(result.retry_count, 0);
    assert_eq!(sent_bodies(&local).await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_yaml_profile_file_loads() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("profiles.yaml");
    std::fs::write(
        &file,
        r#"
profiles:
  edge:
    api_base: http://127.0.0.1:9
    api_style: openai
    backends:
      - id: tiny
        model: tiny-1
        capabilities: [general, low_latency]
        max_context: 8192
"#,
    )?;
    let file_str = file.to_string_lossy().to_string();
    let loaded = ProfileLoader::with_lookup(move |var| match var {
        "MODEL_ROUTER_PROFILE_PATH" => Some(file_str.clone()),
        "MODEL_ROUTER_PROFILE" => Some("edge".to_string()),
        "AZURE_API_KEY" => Some("k".to_string()),
        _ => None,
    })
    .load()?;
    let (profiles, adapters, _router) = loaded.into_parts();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].max_context, 8192);
    assert!(adapters.contains(&BackendId::from("tiny")));
    Ok(())
}

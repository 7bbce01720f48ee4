//! Integration tests for single delivery attempts against a mock server.
//!
//! These exercise the pure HTTP side of the executor: request shape,
//! signing, header merging, and outcome classification. Ledger behavior
//! is covered by the `integration`-gated tests.

mod common;

use common::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sdv_webhooks::executor::{
    attempt_delivery, DELIVERY_ID_HEADER, EVENT_ID_HEADER, EVENT_TYPE_HEADER, SIGNATURE_HEADER,
};
use sdv_webhooks::outcome::AttemptOutcome;
use sdv_webhooks::signing;

/// A 2xx response classifies as Success with the body and latency captured.
#[tokio::test]
async fn test_successful_delivery() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let endpoint = endpoint(&format!("{}/webhook", mock_server.uri()));
    let record = record(endpoint.id, scenario_payload());

    let outcome = attempt_delivery(&test_client(), &TEST_KEY, &endpoint, &record).await;

    match outcome {
        AttemptOutcome::Success {
            status_code,
            response_body,
            response_time_ms,
        } => {
            assert_eq!(status_code, 200);
            assert_eq!(response_body, "ok");
            assert!(response_time_ms >= 0);
        }
        other => panic!("expected success, got {other:?}"),
    }
}

/// Standard headers identify the delivery, the event, and the engine.
#[tokio::test]
async fn test_standard_headers_sent() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let endpoint = endpoint(&mock_server.uri());
    let record = record(endpoint.id, scenario_payload());

    attempt_delivery(&test_client(), &TEST_KEY, &endpoint, &record).await;

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    let header = |name: &str| {
        request
            .headers
            .get(name)
            .map(|v| v.to_str().unwrap_or("").to_string())
            .unwrap_or_default()
    };

    assert_eq!(header("content-type"), "application/json");
    assert_eq!(header(DELIVERY_ID_HEADER), record.id.to_string());
    assert_eq!(header(EVENT_ID_HEADER), record.event_id.to_string());
    assert_eq!(header(EVENT_TYPE_HEADER), "scenario.created");
    assert_eq!(header("user-agent"), "sdv-webhook-engine/1.0");
}

/// The body is the JSON-serialized event payload, exactly.
#[tokio::test]
async fn test_body_is_serialized_payload() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let endpoint = endpoint(&mock_server.uri());
    let record = record(endpoint.id, scenario_payload());

    attempt_delivery(&test_client(), &TEST_KEY, &endpoint, &record).await;

    let requests = mock_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body, scenario_payload());
}

/// Endpoints with a secret get a verifiable signature over the exact body.
#[tokio::test]
async fn test_signature_header_with_secret() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let endpoint = signed_endpoint(&mock_server.uri());
    let record = record(endpoint.id, scenario_payload());

    attempt_delivery(&test_client(), &TEST_KEY, &endpoint, &record).await;

    let requests = mock_server.received_requests().await.unwrap();
    let request = &requests[0];

    let signature = request
        .headers
        .get(SIGNATURE_HEADER)
        .expect("signature header missing")
        .to_str()
        .unwrap();

    assert!(signature.starts_with("sha256="));
    assert!(signing::verify_signature(
        signature,
        TEST_SECRET,
        &request.body
    ));
}

/// Endpoints without a secret receive unsigned requests.
#[tokio::test]
async fn test_no_signature_without_secret() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let endpoint = endpoint(&mock_server.uri());
    let record = record(endpoint.id, scenario_payload());

    attempt_delivery(&test_client(), &TEST_KEY, &endpoint, &record).await;

    let requests = mock_server.received_requests().await.unwrap();
    assert!(requests[0].headers.get(SIGNATURE_HEADER).is_none());
}

/// Custom headers are merged and may override defaults.
#[tokio::test]
async fn test_custom_headers_merged() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let mut endpoint = endpoint(&mock_server.uri());
    endpoint.headers = serde_json::json!({
        "X-Team": "simulation",
        "X-Event-Type": "overridden.type"
    });
    let record = record(endpoint.id, scenario_payload());

    attempt_delivery(&test_client(), &TEST_KEY, &endpoint, &record).await;

    let requests = mock_server.received_requests().await.unwrap();
    let request = &requests[0];

    assert_eq!(request.headers.get("X-Team").unwrap(), "simulation");
    assert_eq!(
        request.headers.get(EVENT_TYPE_HEADER).unwrap(),
        "overridden.type"
    );
}

/// Custom headers can never plant a signature.
#[tokio::test]
async fn test_custom_headers_cannot_forge_signature() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    // Unsigned endpoint trying to set X-Signature via custom headers.
    let mut endpoint = endpoint(&mock_server.uri());
    endpoint.headers = serde_json::json!({ "X-Signature": "sha256=forged" });
    let record = record(endpoint.id, scenario_payload());

    attempt_delivery(&test_client(), &TEST_KEY, &endpoint, &record).await;

    let requests = mock_server.received_requests().await.unwrap();
    assert!(requests[0].headers.get(SIGNATURE_HEADER).is_none());

    // Signed endpoint: the computed signature wins over the custom header.
    let mut endpoint = signed_endpoint(&mock_server.uri());
    endpoint.headers = serde_json::json!({ "X-Signature": "sha256=forged" });
    let record = common::record(endpoint.id, scenario_payload());

    attempt_delivery(&test_client(), &TEST_KEY, &endpoint, &record).await;

    let requests = mock_server.received_requests().await.unwrap();
    let signature = requests[1].headers.get(SIGNATURE_HEADER).unwrap();
    assert_ne!(signature, "sha256=forged");
    assert!(signing::verify_signature(
        signature.to_str().unwrap(),
        TEST_SECRET,
        &requests[1].body
    ));
}

/// A 5xx response is a retryable failure.
#[tokio::test]
async fn test_server_error_is_retryable_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let endpoint = endpoint(&mock_server.uri());
    let record = record(endpoint.id, scenario_payload());

    let outcome = attempt_delivery(&test_client(), &TEST_KEY, &endpoint, &record).await;

    match outcome {
        AttemptOutcome::RetryableFailure {
            error_message,
            status_code,
            response_body,
            ..
        } => {
            assert_eq!(error_message, "HTTP 500");
            assert_eq!(status_code, Some(500));
            assert_eq!(response_body.as_deref(), Some("boom"));
        }
        other => panic!("expected retryable failure, got {other:?}"),
    }
}

/// 4xx responses get the same uniform retryable handling as 5xx.
#[tokio::test]
async fn test_client_error_is_retryable_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let endpoint = endpoint(&mock_server.uri());
    let record = record(endpoint.id, scenario_payload());

    let outcome = attempt_delivery(&test_client(), &TEST_KEY, &endpoint, &record).await;

    match outcome {
        AttemptOutcome::RetryableFailure {
            error_message,
            status_code,
            ..
        } => {
            assert_eq!(error_message, "HTTP 404");
            assert_eq!(status_code, Some(404));
        }
        other => panic!("expected retryable failure, got {other:?}"),
    }
}

/// A response slower than the client timeout is a retryable failure with
/// no status code.
#[tokio::test]
async fn test_timeout_is_retryable_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let endpoint = endpoint(&mock_server.uri());
    let record = record(endpoint.id, scenario_payload());

    let outcome = attempt_delivery(&test_client(), &TEST_KEY, &endpoint, &record).await;

    match outcome {
        AttemptOutcome::RetryableFailure {
            error_message,
            status_code,
            ..
        } => {
            assert!(error_message.contains("timeout"), "got: {error_message}");
            assert_eq!(status_code, None);
        }
        other => panic!("expected retryable failure, got {other:?}"),
    }
}

/// A connection failure is a retryable failure, not a crash.
#[tokio::test]
async fn test_connection_failure_is_retryable_failure() {
    // Port 9 (discard) is not listening.
    let endpoint = endpoint("http://127.0.0.1:9/webhook");
    let record = record(endpoint.id, scenario_payload());

    let outcome = attempt_delivery(&test_client(), &TEST_KEY, &endpoint, &record).await;

    match outcome {
        AttemptOutcome::RetryableFailure { status_code, .. } => {
            assert_eq!(status_code, None);
        }
        other => panic!("expected retryable failure, got {other:?}"),
    }
}

/// An undecryptable secret falls back to an unsigned delivery rather than
/// failing the attempt.
#[tokio::test]
async fn test_bad_secret_delivers_unsigned() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let mut endpoint = endpoint(&mock_server.uri());
    endpoint.secret_encrypted = Some("not-a-valid-ciphertext".to_string());
    let record = record(endpoint.id, scenario_payload());

    let outcome = attempt_delivery(&test_client(), &TEST_KEY, &endpoint, &record).await;
    assert!(outcome.is_success());

    let requests = mock_server.received_requests().await.unwrap();
    assert!(requests[0].headers.get(SIGNATURE_HEADER).is_none());
}

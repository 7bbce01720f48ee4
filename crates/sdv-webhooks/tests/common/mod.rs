//! Common fixtures for sdv-webhooks integration tests.

#![allow(dead_code)]

use chrono::Utc;
use reqwest::Client;
use uuid::Uuid;

use sdv_db::models::{DeliveryRecord, DeliveryStatus, WebhookEndpoint};
use sdv_webhooks::config::USER_AGENT;
use sdv_webhooks::signing;

/// Standard test encryption key.
pub const TEST_KEY: [u8; 32] = [0x42u8; 32];

/// Standard test signing secret.
pub const TEST_SECRET: &str = "whsec_test_secret_key_12345";

/// HTTP client configured the way the executor configures it.
pub fn test_client() -> Client {
    Client::builder()
        .timeout(std::time::Duration::from_secs(2))
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("failed to build test client")
}

/// An active endpoint pointing at `url`, unsigned by default.
pub fn endpoint(url: &str) -> WebhookEndpoint {
    WebhookEndpoint {
        id: Uuid::new_v4(),
        name: format!("endpoint-{}", Uuid::new_v4()),
        description: None,
        url: url.to_string(),
        secret_encrypted: None,
        is_active: true,
        event_types: vec!["scenario.*".to_string()],
        headers: serde_json::json!({}),
        max_attempts: None,
        initial_delay_ms: None,
        backoff_multiplier: None,
        max_delay_ms: None,
        total_deliveries: 0,
        successful_deliveries: 0,
        failed_deliveries: 0,
        last_delivery_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// An endpoint with an encrypted signing secret.
pub fn signed_endpoint(url: &str) -> WebhookEndpoint {
    let mut endpoint = endpoint(url);
    endpoint.secret_encrypted =
        Some(signing::encrypt_secret(TEST_SECRET, &TEST_KEY).expect("encryption failed"));
    endpoint
}

/// A claimed delivery record for the given endpoint.
pub fn record(webhook_id: Uuid, payload: serde_json::Value) -> DeliveryRecord {
    DeliveryRecord {
        id: Uuid::new_v4(),
        webhook_id,
        event_id: Uuid::new_v4(),
        event_type: "scenario.created".to_string(),
        payload,
        status: DeliveryStatus::InProgress,
        attempt_count: 0,
        max_attempts: 3,
        next_retry_at: None,
        status_code: None,
        response_body: None,
        response_time_ms: None,
        error_message: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        completed_at: None,
    }
}

/// Standard test payload.
pub fn scenario_payload() -> serde_json::Value {
    serde_json::json!({
        "eventId": "e1",
        "eventType": "scenario.created",
        "scenarioId": "s-42",
        "name": "highway-merge"
    })
}

mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use common::checkout;
use sauki_backend::config::VendingConfig;
use sauki_backend::database::memory::MemoryStore;
use sauki_backend::database::models::{DeliveryState, TxStatus, VendAttemptOutcome};
use sauki_backend::database::repository::TransactionStore;
use sauki_backend::resilience::circuit_breaker::{BreakerState, CircuitBreakerConfig};
use sauki_backend::resilience::retry::RetryConfig;
use sauki_backend::services::catalog::StaticPlanCatalog;
use sauki_backend::services::delivery::DeliveryService;
use sauki_backend::vending::{Network, VendError, VendRequest, Vendor, VendingClient};

const VEND_PATH: &str = "/api/data/";

fn config(base_url: &str, max_retries: u32, failure_threshold: u32) -> VendingConfig {
    VendingConfig {
        endpoint_url: format!("{}{}", base_url, VEND_PATH),
        api_token: "vend-token".to_string(),
        provider_name: "test-vendor".to_string(),
        attempt_timeout: Duration::from_secs(2),
        retry: RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(5),
            multiplier: 2.0,
            max_delay: Duration::from_millis(20),
        },
        breaker: CircuitBreakerConfig {
            failure_threshold,
            open_timeout: Duration::from_millis(150),
            half_open_max_calls: 1,
            success_threshold: 1,
        },
    }
}

/// Accepts connections and holds them open without ever answering.
async fn silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{}", addr)
}

fn request(tx_ref: &str) -> VendRequest {
    VendRequest {
        tx_ref: tx_ref.to_string(),
        network: Network::Mtn,
        mobile_number: "08031234567".to_string(),
        plan: "1001".to_string(),
        ported: false,
    }
}

#[tokio::test]
async fn persistent_server_errors_use_every_attempt_then_fail() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", VEND_PATH)
        .with_status(500)
        .with_body("upstream exploded")
        .expect(4)
        .create_async()
        .await;

    let store = Arc::new(MemoryStore::new());
    let client = VendingClient::new(config(&server.url(), 3, 10), store.clone()).unwrap();

    let err = client.vend(&request("SAUKI-VND-1")).await.unwrap_err();

    assert!(matches!(err, VendError::Server { status: 500, .. }));
    mock.assert_async().await;

    let attempts = store.vend_attempts_for("SAUKI-VND-1");
    assert_eq!(attempts.len(), 4);
    assert_eq!(
        attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert!(attempts
        .iter()
        .all(|a| matches!(a.outcome, VendAttemptOutcome::TransientError)));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", VEND_PATH)
        .with_status(400)
        .with_body(r#"{"error":"invalid plan"}"#)
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(MemoryStore::new());
    let client = VendingClient::new(config(&server.url(), 3, 10), store.clone()).unwrap();

    let err = client.vend(&request("SAUKI-VND-2")).await.unwrap_err();

    assert!(matches!(err, VendError::Upstream { status: 400, .. }));
    mock.assert_async().await;
    assert_eq!(client.breaker_state(), BreakerState::Closed);
    assert_eq!(client.breaker().consecutive_failures(), 0);
}

#[tokio::test]
async fn request_carries_token_and_idempotency_key() {
    let mut server = mockito::Server::new_async().await;
    let expected = request("SAUKI-VND-3");
    let mock = server
        .mock("POST", VEND_PATH)
        .match_header("authorization", "Token vend-token")
        .match_header("idempotency-key", expected.idempotency_key().as_str())
        .match_body(mockito::Matcher::PartialJson(json!({
            "network": 1,
            "mobile_number": "08031234567",
            "plan": "1001",
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"Status":"successful","id":77}"#)
        .create_async()
        .await;

    let store = Arc::new(MemoryStore::new());
    let client = VendingClient::new(config(&server.url(), 0, 10), store.clone()).unwrap();

    let response = client.vend(&expected).await.unwrap();

    assert!(response.success);
    assert_eq!(response.payload["id"], 77);
    mock.assert_async().await;
    let attempts = store.vend_attempts_for("SAUKI-VND-3");
    assert_eq!(attempts.len(), 1);
    assert!(matches!(attempts[0].outcome, VendAttemptOutcome::Success));
}

#[tokio::test]
async fn ok_without_success_marker_is_a_rejection() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", VEND_PATH)
        .with_status(200)
        .with_body(r#"{"Status":"failed","message":"insufficient vendor float"}"#)
        .create_async()
        .await;

    let store = Arc::new(MemoryStore::new());
    let client = VendingClient::new(config(&server.url(), 3, 10), store.clone()).unwrap();

    let response = client.vend(&request("SAUKI-VND-4")).await.unwrap();

    assert!(!response.success);
    let attempts = store.vend_attempts_for("SAUKI-VND-4");
    assert_eq!(attempts.len(), 1);
    assert!(matches!(attempts[0].outcome, VendAttemptOutcome::Rejected));
}

#[tokio::test]
async fn breaker_opens_short_circuits_and_recovers() {
    let mut server = mockito::Server::new_async().await;
    let failing = server
        .mock("POST", VEND_PATH)
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let store = Arc::new(MemoryStore::new());
    let client = VendingClient::new(config(&server.url(), 0, 2), store.clone()).unwrap();

    for i in 0..2 {
        let err = client.vend(&request(&format!("SAUKI-BRK-{}", i))).await.unwrap_err();
        assert!(matches!(err, VendError::Server { status: 503, .. }));
    }
    assert_eq!(client.breaker_state(), BreakerState::Open);

    // Open: rejected without reaching the provider.
    let err = client.vend(&request("SAUKI-BRK-2")).await.unwrap_err();
    assert!(matches!(err, VendError::CircuitOpen { .. }));
    assert!(store.vend_attempts_for("SAUKI-BRK-2").is_empty());
    failing.assert_async().await;
    failing.remove_async().await;

    server
        .mock("POST", VEND_PATH)
        .with_status(200)
        .with_body(r#"{"success":true}"#)
        .create_async()
        .await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    let response = client.vend(&request("SAUKI-BRK-3")).await.unwrap();
    assert!(response.success);
    assert_eq!(client.breaker_state(), BreakerState::Closed);
}

#[tokio::test]
async fn missing_endpoint_is_a_configuration_error() {
    let store = Arc::new(MemoryStore::new());
    let mut config = config("http://127.0.0.1:9", 0, 10);
    config.endpoint_url = String::new();
    let client = VendingClient::new(config, store.clone()).unwrap();

    let err = client.vend(&request("SAUKI-VND-5")).await.unwrap_err();

    assert!(matches!(err, VendError::Configuration { .. }));
    assert!(store.vend_attempts().is_empty());
}

#[tokio::test]
async fn timeouts_exhaust_retries_and_leave_a_transient_failure() {
    let base_url = silent_server().await;
    let mut config = config(&base_url, 2, 10);
    config.attempt_timeout = Duration::from_millis(100);

    let store = Arc::new(MemoryStore::new());
    store
        .seed_transaction(checkout("SAUKI-VND-6", 300, "mtn-1gb"), TxStatus::Paid)
        .unwrap();
    let client = Arc::new(VendingClient::new(config, store.clone()).unwrap());

    let err = client.vend(&request("SAUKI-VND-6")).await.unwrap_err();
    assert!(matches!(err, VendError::Timeout { .. }));
    let attempts = store.vend_attempts_for("SAUKI-VND-6");
    assert_eq!(attempts.len(), 3);
    assert!(attempts
        .iter()
        .all(|a| matches!(a.outcome, VendAttemptOutcome::TransientError)));

    let delivery = DeliveryService::new(
        store.clone(),
        client.clone(),
        Arc::new(StaticPlanCatalog::builtin()),
    );
    let tx = store.find_by_ref("SAUKI-VND-6").await.unwrap().unwrap();
    let after = delivery.fulfil(&tx).await.unwrap();

    assert_eq!(after.status, TxStatus::Paid);
    assert_eq!(after.delivery_state, DeliveryState::Failed);
    let failure = after.delivery_data.unwrap();
    assert_eq!(failure["transient"], true);
    assert!(failure["status_code"].is_null());
    assert_eq!(store.vend_attempts_for("SAUKI-VND-6").len(), 6);
    assert_eq!(client.breaker_state(), BreakerState::Closed);
}

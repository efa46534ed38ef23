mod common;

use bigdecimal::BigDecimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use common::{app_state, checkout, flutterwave_verify_body, CountingVendor};
use sauki_backend::database::memory::MemoryStore;
use sauki_backend::database::models::TxStatus;
use sauki_backend::database::repository::TransactionStore;
use sauki_backend::workers::payment_monitor::{
    CycleReport, PaymentMonitorConfig, PaymentMonitorWorker,
};

async fn mock_verify(server: &mut mockito::ServerGuard, tx_ref: &str, status: &str) {
    server
        .mock("GET", "/transactions/verify_by_reference")
        .match_query(mockito::Matcher::UrlEncoded("tx_ref".into(), tx_ref.into()))
        .with_status(200)
        .with_body(flutterwave_verify_body(tx_ref, status, "300"))
        .create_async()
        .await;
}

fn config() -> PaymentMonitorConfig {
    PaymentMonitorConfig {
        poll_interval: Duration::from_millis(20),
        lookback: Duration::from_secs(3600),
        batch_size: 10,
    }
}

#[tokio::test]
async fn cycle_settles_everything_in_the_window() {
    let mut server = mockito::Server::new_async().await;
    mock_verify(&mut server, "SAUKI-MON-1", "successful").await;
    mock_verify(&mut server, "SAUKI-MON-2", "failed").await;

    let store = Arc::new(MemoryStore::new());
    store
        .seed_transaction(checkout("SAUKI-MON-1", 300, "mtn-1gb"), TxStatus::Pending)
        .unwrap();
    store
        .seed_transaction(checkout("SAUKI-MON-2", 300, "mtn-1gb"), TxStatus::Pending)
        .unwrap();
    store
        .seed_transaction(checkout("SAUKI-MON-3", 300, "mtn-1gb"), TxStatus::Paid)
        .unwrap();
    store
        .seed_transaction(checkout("SAUKI-MON-4", 300, "mtn-1gb"), TxStatus::Delivered)
        .unwrap();

    let vendor = CountingVendor::delivering();
    let state = app_state(store.clone(), vendor.clone(), &server.url(), BigDecimal::from(0));
    let worker = PaymentMonitorWorker::new(store.clone(), state.verifier.clone(), config());

    let report = worker.run_cycle().await.unwrap();

    assert_eq!(
        report,
        CycleReport {
            scanned: 3,
            paid: 0,
            delivered: 2,
            failed: 1,
            errors: 0,
        }
    );
    assert_eq!(vendor.calls(), 2);
    for (tx_ref, status) in [
        ("SAUKI-MON-1", TxStatus::Delivered),
        ("SAUKI-MON-2", TxStatus::Failed),
        ("SAUKI-MON-3", TxStatus::Delivered),
    ] {
        let tx = store.find_by_ref(tx_ref).await.unwrap().unwrap();
        assert_eq!(tx.status, status, "{}", tx_ref);
    }

    let second = worker.run_cycle().await.unwrap();
    assert_eq!(second.scanned, 0);
    assert_eq!(vendor.calls(), 2);
}

#[tokio::test]
async fn worker_stops_on_shutdown_signal() {
    let server = mockito::Server::new_async().await;
    let store = Arc::new(MemoryStore::new());
    let state = app_state(
        store.clone(),
        CountingVendor::delivering(),
        &server.url(),
        BigDecimal::from(0),
    );
    let worker = PaymentMonitorWorker::new(store, state.verifier.clone(), config());

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker did not stop")
        .unwrap();
}

//! Gateway + client integration: a subscriber connected over HTTP
//! receives published payloads as `reminder` SSE events.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use ingat::bus::{InMemoryBus, NotificationBus};
use ingat::client::StreamClient;
use ingat::config::GatewayConfig;
use ingat::gateway::router;
use ingat::reminder::{OwnerId, ReminderEvent};
use std::sync::Arc;
use std::time::Duration;

fn event(id: i64) -> ReminderEvent {
    ReminderEvent {
        reminder_id: id,
        title: "Laporan".to_owned(),
        message: "Kirim laporan".to_owned(),
        tipe: "Harian".to_owned(),
        scheduled_at: "2024-01-01T08:00:00+07:00".to_owned(),
    }
}

async fn serve(config: &GatewayConfig, bus: Arc<InMemoryBus>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(config, bus as _);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn published_payload_reaches_the_streaming_client() {
    let bus = Arc::new(InMemoryBus::default());
    let base = serve(&GatewayConfig::default(), Arc::clone(&bus)).await;

    let client = StreamClient::new(
        format!("{base}/stream/42"),
        None,
        Duration::from_millis(200),
    );
    let (mut handle, mut rx) = client.spawn();

    // Wait for the connection to register before publishing.
    for _ in 0..50 {
        if bus.subscriber_count(OwnerId(42)) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(bus.subscriber_count(OwnerId(42)), 1);

    bus.publish(OwnerId(42), event(7));

    let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("client should receive within the timeout")
        .expect("channel open");
    assert_eq!(payload.reminder_id, 7);
    assert_eq!(payload.tipe, "Harian");

    handle.stop();
    handle.join().await;
}

#[tokio::test]
async fn payloads_for_other_owners_stay_invisible() {
    let bus = Arc::new(InMemoryBus::default());
    let base = serve(&GatewayConfig::default(), Arc::clone(&bus)).await;

    let client = StreamClient::new(
        format!("{base}/stream/1"),
        None,
        Duration::from_millis(200),
    );
    let (mut handle, mut rx) = client.spawn();

    for _ in 0..50 {
        if bus.subscriber_count(OwnerId(1)) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    bus.publish(OwnerId(2), event(99));

    let observed = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(observed.is_err(), "owner 1 must not see owner 2 payloads");

    handle.stop();
    handle.join().await;
}

#[tokio::test]
async fn stream_requires_the_configured_bearer_token() {
    let bus = Arc::new(InMemoryBus::default());
    let config = GatewayConfig {
        bearer_token: Some("rahasia".to_owned()),
        ..GatewayConfig::default()
    };
    let base = serve(&config, Arc::clone(&bus)).await;

    let http = reqwest::Client::new();
    let denied = http
        .get(format!("{base}/stream/42"))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(bus.subscriber_count(OwnerId(42)), 0);
}

#[tokio::test]
async fn health_endpoint_answers() {
    let bus = Arc::new(InMemoryBus::default());
    let base = serve(&GatewayConfig::default(), bus).await;

    let body: serde_json::Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn disconnect_unregisters_the_subscriber() {
    let bus = Arc::new(InMemoryBus::default());
    let base = serve(&GatewayConfig::default(), Arc::clone(&bus)).await;

    let client = StreamClient::new(
        format!("{base}/stream/5"),
        None,
        Duration::from_millis(200),
    );
    let (mut handle, rx) = client.spawn();

    for _ in 0..50 {
        if bus.subscriber_count(OwnerId(5)) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(bus.subscriber_count(OwnerId(5)), 1);

    handle.stop();
    handle.join().await;
    drop(rx);

    // The server notices the closed connection on its next write; the
    // publish after unregistration is a no-op, not an error.
    for _ in 0..50 {
        bus.publish(OwnerId(5), event(1));
        if bus.subscriber_count(OwnerId(5)) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(bus.subscriber_count(OwnerId(5)), 0);
}

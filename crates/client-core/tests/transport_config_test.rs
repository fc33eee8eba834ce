//! Relay credential resolution against a mock token service

mod common;

use std::sync::Arc;
use std::time::Duration;

use emdr_client_core::{
    ClientConfig, HttpTransportConfigResolver, MemoryRendezvous, RelayConfig, SessionBuilder,
    SimulatedCaptureBackend, TransportConfig, TransportConfigSource,
};
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::wait_until;

fn fallback() -> TransportConfig {
    TransportConfig::fallback(["stun:stun.example.org:3478"])
}

fn resolver(server: &MockServer) -> HttpTransportConfigResolver {
    let endpoint = Url::parse(&format!("{}/ice", server.uri())).unwrap();
    HttpTransportConfigResolver::new(endpoint, Duration::from_millis(500), fallback())
}

async fn serve(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/ice"))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_relay_credentials_are_used_when_available() {
    let server = MockServer::start().await;
    serve(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "iceServers": [
                { "urls": "stun:stun.relay.example:3478" },
                {
                    "urls": ["turn:relay.example:3478?transport=udp", "turns:relay.example:443"],
                    "username": "1700000000:alice",
                    "credential": "c2VjcmV0"
                }
            ]
        })),
    )
    .await;

    let config = resolver(&server).resolve().await;
    assert_eq!(config.ice_servers.len(), 2);
    assert_eq!(config.relay_count(), 1);
    let relay = &config.ice_servers[1];
    assert_eq!(relay.username.as_deref(), Some("1700000000:alice"));
    assert_eq!(relay.credential.as_deref(), Some("c2VjcmV0"));
    assert_eq!(relay.urls.len(), 2);
}

#[tokio::test]
async fn test_server_error_falls_back_to_discovery_only() {
    let server = MockServer::start().await;
    serve(&server, ResponseTemplate::new(500)).await;

    assert_eq!(resolver(&server).resolve().await, fallback());
}

#[tokio::test]
async fn test_malformed_body_falls_back() {
    let server = MockServer::start().await;
    serve(
        &server,
        ResponseTemplate::new(200).set_body_string("<html>gateway</html>"),
    )
    .await;

    assert_eq!(resolver(&server).resolve().await, fallback());
}

#[tokio::test]
async fn test_empty_server_list_falls_back() {
    let server = MockServer::start().await;
    serve(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "iceServers": [] })),
    )
    .await;

    assert_eq!(resolver(&server).resolve().await, fallback());
}

#[tokio::test]
async fn test_slow_endpoint_times_out_to_fallback() {
    let server = MockServer::start().await;
    serve(
        &server,
        ResponseTemplate::new(200)
            .set_delay(Duration::from_secs(3))
            .set_body_json(json!({ "iceServers": [{ "urls": "turn:late.example:3478" }] })),
    )
    .await;

    assert_eq!(resolver(&server).resolve().await, fallback());
}

#[tokio::test]
async fn test_session_registers_with_resolved_config_even_when_endpoint_fails() {
    let server = MockServer::start().await;
    serve(&server, ResponseTemplate::new(503)).await;

    let hub = MemoryRendezvous::new();
    let relay = RelayConfig {
        credentials_url: Some(format!("{}/ice", server.uri())),
        request_timeout_secs: 1,
        fallback_stun_urls: vec!["stun:fallback.example:19302".into()],
    };
    let session = SessionBuilder::new()
        .config(
            ClientConfig::new()
                .with_email("alice@example.com")
                .with_relay(relay),
        )
        .substrate(Arc::new(hub.clone()))
        .capture_backend(Arc::new(SimulatedCaptureBackend::new()))
        .build()
        .await
        .unwrap();

    wait_until(&session, |s| s.registered).await;
    let registered = hub.registered_config("alice-example-com").unwrap();
    assert_eq!(
        registered,
        TransportConfig::fallback(["stun:fallback.example:19302"])
    );
    assert_eq!(session.transport_config(), &registered);
}

#[tokio::test]
async fn test_session_registers_with_relay_servers() {
    let server = MockServer::start().await;
    serve(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "iceServers": [{ "url": "turn:relay.example:3478", "username": "u", "credential": "p" }]
        })),
    )
    .await;

    let hub = MemoryRendezvous::new();
    let session = SessionBuilder::new()
        .config(ClientConfig::new().with_credentials_url(format!("{}/ice", server.uri())))
        .email("bob@example.com")
        .substrate(Arc::new(hub.clone()))
        .capture_backend(Arc::new(SimulatedCaptureBackend::new()))
        .build()
        .await
        .unwrap();

    wait_until(&session, |s| s.registered).await;
    let registered = hub.registered_config("bob-example-com").unwrap();
    assert_eq!(registered.relay_count(), 1);
    let info = session.registration().await.unwrap();
    assert_eq!(info.relay_servers, 1);
}

//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use emdr_client_core::{
    ClientEvent, MemoryRendezvous, SessionBuilder, SessionFacade, SessionStatus,
    SimulatedCaptureBackend,
};

/// Builder wired to `hub` and `backend`
pub fn builder(
    hub: &MemoryRendezvous,
    backend: &Arc<SimulatedCaptureBackend>,
    email: &str,
) -> SessionBuilder {
    SessionBuilder::new()
        .email(email)
        .substrate(Arc::new(hub.clone()))
        .capture_backend(backend.clone())
}

/// Start a session and wait until it is registered with local media
pub async fn ready(builder: SessionBuilder) -> SessionFacade {
    let session = builder.build().await.expect("session starts");
    wait_until(&session, |s| s.registered && s.has_local_media).await;
    session
}

/// Auto-answering session with its own simulated camera
pub async fn participant(hub: &MemoryRendezvous, email: &str) -> SessionFacade {
    ready(builder(hub, &Arc::new(SimulatedCaptureBackend::new()), email)).await
}

/// Wait for a status matching `predicate`
pub async fn wait_until(
    session: &SessionFacade,
    mut predicate: impl FnMut(&SessionStatus) -> bool,
) -> SessionStatus {
    let mut rx = session.watch_status();
    let status = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| predicate(s)))
        .await
        .expect("status condition not reached in time")
        .expect("status channel closed")
        .clone();
    status
}

/// Connect `caller` to `callee` and wait until both ends see remote media
pub async fn connect(caller: &SessionFacade, callee: &SessionFacade) {
    caller
        .connect(callee.local_identity().as_str())
        .await
        .expect("call placed");
    wait_until(caller, |s| s.connected).await;
    wait_until(callee, |s| s.connected).await;
}

/// Everything already buffered on `events`
pub fn drain(events: &mut tokio::sync::broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

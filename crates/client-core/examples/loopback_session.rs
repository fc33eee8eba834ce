//! Loopback Session Example
//!
//! Runs a therapist and a client session inside one process on the in-memory
//! rendezvous hub: the client calls the therapist, the therapist starts the
//! stimulus, changes its settings, the client turns its camera off and on,
//! and finally the therapist hangs up.
//!
//! Run with: cargo run --example loopback_session
//! More detail: RUST_LOG=emdr_client_core=debug cargo run --example loopback_session

use std::sync::Arc;
use std::time::Duration;

use emdr_client_core::{
    ClientEvent, MemoryRendezvous, ParticipantRole, SessionBuilder, SessionFacade,
    SessionStatus, SimulatedCaptureBackend, StimulusSettings,
};
use tracing_subscriber::EnvFilter;

async fn wait_for(
    session: &SessionFacade,
    predicate: impl FnMut(&SessionStatus) -> bool,
) -> Result<SessionStatus, Box<dyn std::error::Error>> {
    let mut status = session.watch_status();
    let mut predicate = predicate;
    let reached = tokio::time::timeout(Duration::from_secs(10), status.wait_for(|s| predicate(s)))
        .await??
        .clone();
    Ok(reached)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("emdr_client_core=info")),
        )
        .init();

    println!("🧠 EMDR Loopback Session");
    println!("========================\n");

    let hub = MemoryRendezvous::new();
    let start = |email: &'static str, role: ParticipantRole| {
        SessionBuilder::new()
            .email(email)
            .role(role)
            .substrate(Arc::new(hub.clone()))
            .capture_backend(Arc::new(SimulatedCaptureBackend::new()))
            .build()
    };

    let therapist = start("therapist@example.com", ParticipantRole::Therapist).await?;
    let client = start("client@example.com", ParticipantRole::Client).await?;
    println!("👩‍⚕️ Therapist: {}", therapist.local_identity());
    println!("🧑 Client:    {}", client.local_identity());

    let mut client_events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = client_events.recv().await {
            if let ClientEvent::ControlMessage { remote, message, .. } = event {
                println!("   📨 client received '{}' from {}", message, remote);
            }
        }
    });

    wait_for(&therapist, |s| s.registered && s.has_local_media).await?;
    wait_for(&client, |s| s.registered && s.has_local_media).await?;

    println!("\n📞 Client calls the therapist...");
    client.connect(therapist.local_identity().as_str()).await?;
    let status = wait_for(&client, |s| s.connected).await?;
    println!("   client: {}", status.text);
    println!("   therapist: {}", wait_for(&therapist, |s| s.connected).await?.text);

    println!("\n🎯 Therapist adjusts and starts the stimulus...");
    therapist
        .update_stimulus_settings(StimulusSettings::new("#3366ff", 120, 10))
        .await?;
    therapist.start_stimulus().await?;
    wait_for(&client, |s| s.stimulus_active).await?;
    println!("   stimulus running on the client");

    tokio::time::sleep(Duration::from_secs(1)).await;
    therapist.stop_stimulus().await?;
    wait_for(&client, |s| !s.stimulus_active).await?;
    println!("   stimulus stopped");

    println!("\n📷 Client toggles the camera...");
    client.toggle_video().await?;
    wait_for(&therapist, |s| !s.remote_video_enabled).await?;
    println!("   therapist sees the client's camera off");
    client.toggle_video().await?;
    wait_for(&therapist, |s| s.remote_video_enabled).await?;
    println!("   therapist sees the client's camera on");

    println!("\n👋 Therapist hangs up...");
    therapist.disconnect().await?;
    println!("   client: {}", wait_for(&client, |s| !s.connected).await?.text);

    therapist.shutdown().await?;
    client.shutdown().await?;
    println!("\n✅ Done");
    Ok(())
}

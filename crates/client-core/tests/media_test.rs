//! Local media control during a session

mod common;

use std::sync::Arc;
use std::time::Duration;

use emdr_client_core::{
    CallPhase, ClientError, ClientEvent, MediaAccessError, MediaEventType, MemoryRendezvous,
    SimulatedCaptureBackend, StatusCategory, TrackKind, VideoDisablePolicy,
};

use common::{builder, connect, drain, participant, ready, wait_until};

#[tokio::test]
async fn test_device_switch_keeps_one_live_track_and_replaces_it_in_call() {
    let hub = MemoryRendezvous::new();
    let camera = Arc::new(SimulatedCaptureBackend::new());
    let alice = ready(builder(&hub, &camera, "alice")).await;
    let bob = participant(&hub, "bob").await;
    connect(&alice, &bob).await;
    let mut events = alice.subscribe();

    alice.switch_device(TrackKind::Video, "cam-1").await.unwrap();
    alice.switch_device(TrackKind::Video, "cam-0").await.unwrap();

    assert_eq!(camera.live_tracks(TrackKind::Video), 1);
    assert_eq!(camera.max_live_observed(TrackKind::Video), 1);
    assert_eq!(camera.opened_tracks(TrackKind::Video), 3);
    assert_eq!(hub.replaced_tracks("alice").len(), 2);

    let tracks = alice.local_tracks().await;
    let video: Vec<_> = tracks.iter().filter(|t| t.kind() == TrackKind::Video).collect();
    assert_eq!(video.len(), 1);
    assert_eq!(video[0].device_id(), "cam-0");

    let switched = drain(&mut events)
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                ClientEvent::MediaEvent { info, .. }
                    if matches!(info.event_type, MediaEventType::DeviceSwitched { .. })
            )
        })
        .count();
    assert_eq!(switched, 2);
    assert!(alice.status().connected, "switching never drops the call");
}

#[tokio::test]
async fn test_switch_to_unknown_device_reports_media_error() {
    let hub = MemoryRendezvous::new();
    let alice = participant(&hub, "alice").await;
    let mut events = alice.subscribe();

    let err = alice
        .switch_device(TrackKind::Audio, "mic-404")
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            ClientError::MediaUnavailable {
                source: MediaAccessError::DeviceNotFound { .. }
            }
        ),
        "{err}"
    );
    let failed = drain(&mut events).into_iter().any(|e| {
        matches!(
            e,
            ClientEvent::MediaEvent { info, .. }
                if matches!(info.event_type, MediaEventType::LocalMediaFailed { .. })
        )
    });
    assert!(failed);
}

#[tokio::test]
async fn test_device_chosen_before_capture_is_used_on_acquisition() {
    let hub = MemoryRendezvous::new();
    let camera = Arc::new(SimulatedCaptureBackend::new());
    let alice = builder(&hub, &camera, "alice")
        .acquire_media_on_start(false)
        .build()
        .await
        .unwrap();
    wait_until(&alice, |s| s.registered).await;
    let _bob = participant(&hub, "bob").await;

    alice.switch_device(TrackKind::Video, "cam-1").await.unwrap();
    assert_eq!(camera.opened_tracks(TrackKind::Video), 0);

    alice.connect("bob").await.unwrap();
    wait_until(&alice, |s| s.connected).await;
    let tracks = alice.local_tracks().await;
    let video = tracks
        .iter()
        .find(|t| t.kind() == TrackKind::Video)
        .expect("video track");
    assert_eq!(video.device_id(), "cam-1");
}

#[tokio::test]
async fn test_audio_toggle_mutes_without_releasing() {
    let hub = MemoryRendezvous::new();
    let camera = Arc::new(SimulatedCaptureBackend::new());
    let alice = ready(builder(&hub, &camera, "alice")).await;
    assert!(alice.status().local_audio_enabled);

    assert!(!alice.toggle_audio().await.unwrap());
    assert!(!alice.status().local_audio_enabled);
    assert_eq!(camera.live_tracks(TrackKind::Audio), 1);

    assert!(alice.toggle_audio().await.unwrap());
    assert!(alice.status().local_audio_enabled);
    assert_eq!(camera.opened_tracks(TrackKind::Audio), 1);
}

#[tokio::test]
async fn test_video_toggle_is_announced_to_the_counterparty() {
    let hub = MemoryRendezvous::new();
    let camera = Arc::new(SimulatedCaptureBackend::new());
    let alice = ready(builder(&hub, &camera, "alice")).await;
    let bob = participant(&hub, "bob").await;
    connect(&alice, &bob).await;
    assert!(bob.status().remote_video_enabled);

    assert!(!alice.toggle_video().await.unwrap());
    assert!(!alice.status().local_video_enabled);
    wait_until(&bob, |s| !s.remote_video_enabled).await;
    assert_eq!(camera.live_tracks(TrackKind::Video), 1, "mute keeps the device open");

    assert!(alice.toggle_video().await.unwrap());
    wait_until(&bob, |s| s.remote_video_enabled).await;
    assert!(hub.replaced_tracks("alice").is_empty());
}

#[tokio::test]
async fn test_release_policy_stops_and_reopens_the_camera() {
    let hub = MemoryRendezvous::new();
    let camera = Arc::new(SimulatedCaptureBackend::new());
    let alice = ready(
        builder(&hub, &camera, "alice").video_disable_policy(VideoDisablePolicy::Release),
    )
    .await;
    let bob = participant(&hub, "bob").await;
    connect(&alice, &bob).await;

    assert!(!alice.toggle_video().await.unwrap());
    assert_eq!(camera.live_tracks(TrackKind::Video), 0);
    wait_until(&bob, |s| !s.remote_video_enabled).await;

    assert!(alice.toggle_video().await.unwrap());
    assert_eq!(camera.live_tracks(TrackKind::Video), 1);
    assert_eq!(camera.max_live_observed(TrackKind::Video), 1);
    assert_eq!(hub.replaced_tracks("alice").len(), 1);
    assert!(alice.status().local_video_enabled);
    wait_until(&bob, |s| s.remote_video_enabled).await;
}

#[tokio::test]
async fn test_toggles_without_media_are_errors() {
    let hub = MemoryRendezvous::new();
    let alice = builder(&hub, &Arc::new(SimulatedCaptureBackend::new()), "alice")
        .acquire_media_on_start(false)
        .build()
        .await
        .unwrap();

    for result in [alice.toggle_audio().await, alice.toggle_video().await] {
        assert!(matches!(
            result,
            Err(ClientError::MediaUnavailable {
                source: MediaAccessError::NotAcquired
            })
        ));
    }
}

#[tokio::test]
async fn test_denied_media_fails_the_outbound_call() {
    let hub = MemoryRendezvous::new();
    let camera = Arc::new(SimulatedCaptureBackend::new());
    camera.deny_access();
    let alice = builder(&hub, &camera, "alice").build().await.unwrap();
    let startup = wait_until(&alice, |s| {
        s.category == StatusCategory::MediaError && s.registered
    })
    .await;
    assert!(startup.text.starts_with("Media access error:"), "{}", startup.text);
    let _bob = participant(&hub, "bob").await;

    alice.connect("bob").await.unwrap();
    let status = wait_until(&alice, |s| s.phase == Some(CallPhase::Failed)).await;
    assert_eq!(status.category, StatusCategory::MediaError);
    assert!(status.text.starts_with("Media access error:"));
    assert_eq!(hub.dial_count("alice"), 0);

    // Access granted later: the next attempt goes through
    camera.allow_access();
    alice.connect("bob").await.unwrap();
    wait_until(&alice, |s| s.connected).await;
}

#[tokio::test]
async fn test_denied_media_leaves_inbound_call_ringing() {
    let hub = MemoryRendezvous::new();
    let alice = participant(&hub, "alice").await;
    let camera = Arc::new(SimulatedCaptureBackend::new());
    camera.deny_access();
    let bob = builder(&hub, &camera, "bob")
        .acquire_media_on_start(false)
        .build()
        .await
        .unwrap();
    wait_until(&bob, |s| s.registered).await;

    alice.connect("bob").await.unwrap();
    let status = wait_until(&bob, |s| s.category == StatusCategory::MediaError).await;
    assert!(status.ringing, "the user can retry by accepting");
    assert_eq!(status.phase, Some(CallPhase::RingingInbound));

    camera.allow_access();
    bob.accept_call().await.unwrap();
    wait_until(&bob, |s| s.connected).await;
    wait_until(&alice, |s| s.connected).await;
}

#[tokio::test(start_paused = true)]
async fn test_teardown_during_acquisition_leaves_no_camera_live() {
    let hub = MemoryRendezvous::new();
    let camera = Arc::new(SimulatedCaptureBackend::new());
    camera.set_open_delay(Some(Duration::from_secs(1)));
    let alice = builder(&hub, &camera, "alice").build().await.unwrap();

    // Camera granted, microphone prompt still open
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(camera.live_tracks(TrackKind::Video), 1);
    assert!(!alice.status().has_local_media);

    alice.set_identity(Some("alice-two@example.com")).await.unwrap();
    assert_eq!(camera.live_tracks(TrackKind::Video), 0);

    // The rebuilt session starts acquiring again; shut down mid-way
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(camera.live_tracks(TrackKind::Video), 1);
    alice.shutdown().await.unwrap();

    assert_eq!(camera.live_tracks(TrackKind::Video), 0);
    assert_eq!(camera.live_tracks(TrackKind::Audio), 0);
    assert!(!alice.status().has_local_media);
}

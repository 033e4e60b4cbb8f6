//! End-to-end call scenarios over the in-process relay
//!
//! Two `Call`s share an `InMemoryRelay` and a paired `MockTransportFactory`,
//! so the whole join/offer/answer/candidate/bye exchange runs through the
//! real room coordinator, negotiator and session lifecycle.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p peercall --test call_scenarios_test -- --nocapture
//! ```

mod harness;

use harness::{
    init_logging, mock_deps, test_config, wait_for_notification, MockTransportFactory,
    RecordingSink, STEP_TIMEOUT,
};
use peercall::media::StaticMediaSource;
use peercall::signaling::InMemoryRelay;
use peercall::{Call, Error, MediaSinks, NegotiationState, Notification, Role, RoomPrompt};
use std::sync::Arc;
use std::time::Duration;

fn is_connected(state: NegotiationState) -> bool {
    state == NegotiationState::Connected
}

// ============================================================================
// Scenario A: two participants reach Connected and exchange the ready message
// ============================================================================

#[tokio::test]
async fn test_two_participants_connect_and_chat() {
    init_logging();

    let relay = InMemoryRelay::new();
    let factory = MockTransportFactory::new();
    let config = test_config("r1");

    let mut first = Call::start(config.clone(), mock_deps(&relay, &factory))
        .await
        .unwrap();
    assert_eq!(first.role(), Role::Callee);
    assert_eq!(first.state(), NegotiationState::Joining);

    let mut second = Call::start(config.clone(), mock_deps(&relay, &factory))
        .await
        .unwrap();
    assert_eq!(second.role(), Role::Caller);
    assert_eq!(relay.member_count("r1").await, 2);

    futures::future::try_join(
        first.wait_for_state(STEP_TIMEOUT, is_connected),
        second.wait_for_state(STEP_TIMEOUT, is_connected),
    )
    .await
    .unwrap();

    // Each side announces readiness over the data channel
    let mut first_notes = first.take_notifications().unwrap();
    let mut second_notes = second.take_notifications().unwrap();
    let mut seen = Vec::new();
    let ready = Notification::Chat(config.ready_message.clone());
    wait_for_notification(&mut first_notes, &mut seen, |n| *n == ready).await;
    wait_for_notification(&mut second_notes, &mut seen, |n| *n == ready).await;

    second.send_chat("hello from the caller").await.unwrap();
    wait_for_notification(&mut first_notes, &mut seen, |n| {
        *n == Notification::Chat("hello from the caller".to_string())
    })
    .await;

    first.send_chat("hello back").await.unwrap();
    wait_for_notification(&mut second_notes, &mut seen, |n| {
        *n == Notification::Chat("hello back".to_string())
    })
    .await;

    first.hang_up().await;
    second.hang_up().await;
}

#[tokio::test]
async fn test_connected_session_shows_remote_stream() {
    init_logging();

    let relay = InMemoryRelay::new();
    let factory = MockTransportFactory::new();
    let config = test_config("r-video");
    let local = RecordingSink::new();
    let remote = RecordingSink::new();

    let sinks = MediaSinks {
        local: Some(local.clone()),
        remote: Some(remote.clone()),
    };
    let mut first = Call::start(config.clone(), mock_deps(&relay, &factory).with_sinks(sinks))
        .await
        .unwrap();
    let mut second = Call::start(config, mock_deps(&relay, &factory)).await.unwrap();

    first.wait_for_state(STEP_TIMEOUT, is_connected).await.unwrap();
    assert_eq!(local.attached().len(), 1);
    assert!(!remote.attached().is_empty());

    first.hang_up().await;
    assert_eq!(local.detaches(), 1);
    assert_eq!(remote.detaches(), 1);
    second.hang_up().await;
}

// ============================================================================
// Scenario B: media access denied
// ============================================================================

#[tokio::test]
async fn test_media_denied_fails_before_relay_activity() {
    init_logging();

    let relay = InMemoryRelay::new();
    let factory = MockTransportFactory::new();
    let media = StaticMediaSource::new()
        .deny_user_media()
        .deny_display_media();
    let deps = mock_deps(&relay, &factory).with_media(Arc::new(media));

    let result = Call::start(test_config("r1"), deps).await;

    assert!(matches!(result, Err(Error::MediaAccess(_))));
    assert_eq!(relay.connection_count().await, 0);
    assert_eq!(relay.member_count("r1").await, 0);
    assert_eq!(factory.created(), 0);
}

#[tokio::test]
async fn test_screen_share_fallback_still_joins() {
    init_logging();

    let relay = InMemoryRelay::new();
    let factory = MockTransportFactory::new();
    let media = StaticMediaSource::new().deny_user_media();
    let deps = mock_deps(&relay, &factory).with_media(Arc::new(media));

    let mut call = Call::start(test_config("r1"), deps).await.unwrap();

    assert_eq!(call.role(), Role::Callee);
    assert_eq!(factory.record(0).ops(), vec!["add_local_stream:1".to_string()]);
    call.hang_up().await;
}

// ============================================================================
// Scenario C: hang-up reaches both sides
// ============================================================================

#[tokio::test]
async fn test_hang_up_closes_both_sides() {
    init_logging();

    let relay = InMemoryRelay::new();
    let factory = MockTransportFactory::new();
    let config = test_config("r1");

    let mut first = Call::start(config.clone(), mock_deps(&relay, &factory))
        .await
        .unwrap();
    let mut second = Call::start(config, mock_deps(&relay, &factory)).await.unwrap();
    first.wait_for_state(STEP_TIMEOUT, is_connected).await.unwrap();
    second.wait_for_state(STEP_TIMEOUT, is_connected).await.unwrap();

    let report = second.hang_up().await;
    assert!(report.bye_sent);
    assert!(report.transport_closed);
    assert!(report.data_channel_closed);
    assert!(report.relay_closed);
    assert!(report.tracks_stopped >= 2);
    assert_eq!(second.state(), NegotiationState::Closed);

    let state = first
        .wait_for_state(STEP_TIMEOUT, |s| s == NegotiationState::Closed)
        .await
        .unwrap();
    assert_eq!(state, NegotiationState::Closed);

    // Hanging up a session the peer already ended releases nothing more
    assert!(first.hang_up().await.is_noop());
    assert_eq!(factory.record(0).close_count(), 1);
    assert_eq!(factory.record(1).close_count(), 1);
    assert_eq!(relay.connection_count().await, 0);
    assert!(matches!(
        first.send_chat("anyone there?").await,
        Err(Error::SessionClosed)
    ));
}

#[tokio::test]
async fn test_room_is_reusable_after_hang_up() {
    init_logging();

    let relay = InMemoryRelay::new();
    let factory = MockTransportFactory::new();
    let config = test_config("r1");

    let mut first = Call::start(config.clone(), mock_deps(&relay, &factory))
        .await
        .unwrap();
    first.hang_up().await;
    assert_eq!(relay.member_count("r1").await, 0);

    let mut again = Call::start(config, mock_deps(&relay, &MockTransportFactory::new()))
        .await
        .unwrap();
    assert_eq!(again.role(), Role::Callee);
    again.hang_up().await;
}

// ============================================================================
// Scenario D: room full
// ============================================================================

#[tokio::test]
async fn test_third_participant_is_rejected() {
    init_logging();

    let relay = InMemoryRelay::new();
    let factory = MockTransportFactory::new();
    let config = test_config("r1");

    let mut first = Call::start(config.clone(), mock_deps(&relay, &factory))
        .await
        .unwrap();
    let mut second = Call::start(config.clone(), mock_deps(&relay, &factory))
        .await
        .unwrap();

    let third_factory = MockTransportFactory::new();
    let result = Call::start(config, mock_deps(&relay, &third_factory)).await;

    assert!(matches!(result, Err(Error::RoomFull(ref room)) if room == "r1"));
    assert_eq!(third_factory.created(), 0);
    assert_eq!(relay.member_count("r1").await, 2);
    // The rejected participant's relay connection was released
    assert_eq!(relay.connection_count().await, 2);

    first.wait_for_state(STEP_TIMEOUT, is_connected).await.unwrap();
    first.hang_up().await;
    second.hang_up().await;
}

// ============================================================================
// Room name handling
// ============================================================================

struct EmptyPrompt;

#[async_trait::async_trait]
impl RoomPrompt for EmptyPrompt {
    async fn prompt_room_name(&self) -> Option<String> {
        Some("   ".to_string())
    }
}

struct NamedPrompt;

#[async_trait::async_trait]
impl RoomPrompt for NamedPrompt {
    async fn prompt_room_name(&self) -> Option<String> {
        Some(" prompted ".to_string())
    }
}

#[tokio::test]
async fn test_empty_room_name_is_rejected_without_joining() {
    init_logging();

    let relay = InMemoryRelay::new();
    let factory = MockTransportFactory::new();
    let mut config = test_config("unused");
    config.room = None;

    let deps = mock_deps(&relay, &factory).with_prompt(Arc::new(EmptyPrompt));
    let result = Call::start(config.clone(), deps).await;
    assert!(matches!(result, Err(Error::InvalidRoomName(_))));

    // No prompt at all behaves like an empty answer
    let result = Call::start(config, mock_deps(&relay, &factory)).await;
    assert!(matches!(result, Err(Error::InvalidRoomName(_))));

    assert_eq!(relay.connection_count().await, 0);
    assert_eq!(factory.created(), 0);
}

#[tokio::test]
async fn test_prompted_room_name_is_trimmed() {
    init_logging();

    let relay = InMemoryRelay::new();
    let factory = MockTransportFactory::new();
    let mut config = test_config("unused");
    config.room = None;

    let deps = mock_deps(&relay, &factory).with_prompt(Arc::new(NamedPrompt));
    let mut call = Call::start(config, deps).await.unwrap();

    assert_eq!(call.room(), "prompted");
    assert_eq!(relay.member_count("prompted").await, 1);
    call.hang_up().await;
}

// ============================================================================
// Failures after setup
// ============================================================================

#[tokio::test]
async fn test_relay_loss_while_waiting_fails_session() {
    init_logging();

    let relay = InMemoryRelay::new();
    let factory = MockTransportFactory::new();
    let mut call = Call::start(test_config("r1"), mock_deps(&relay, &factory))
        .await
        .unwrap();
    let mut notes = call.take_notifications().unwrap();

    relay.shutdown().await;

    let state = call
        .wait_for_state(STEP_TIMEOUT, |s| s.is_terminal())
        .await
        .unwrap();
    assert_eq!(state, NegotiationState::Failed);

    let mut seen = Vec::new();
    wait_for_notification(&mut notes, &mut seen, |n| matches!(n, Notification::Failed(_))).await;
    assert!(call.hang_up().await.is_noop());
    assert_eq!(factory.record(0).close_count(), 1);
}

#[tokio::test]
async fn test_relay_loss_after_connect_keeps_media_session() {
    init_logging();

    let relay = InMemoryRelay::new();
    let factory = MockTransportFactory::new();
    let config = test_config("r1");

    let mut first = Call::start(config.clone(), mock_deps(&relay, &factory))
        .await
        .unwrap();
    let mut second = Call::start(config, mock_deps(&relay, &factory)).await.unwrap();
    first.wait_for_state(STEP_TIMEOUT, is_connected).await.unwrap();
    second.wait_for_state(STEP_TIMEOUT, is_connected).await.unwrap();

    let mut first_notes = first.take_notifications().unwrap();
    relay.shutdown().await;

    let mut seen = Vec::new();
    wait_for_notification(&mut first_notes, &mut seen, |n| {
        matches!(n, Notification::Status(s) if s.starts_with("Signaling lost"))
    })
    .await;
    assert_eq!(first.state(), NegotiationState::Connected);

    // The data channel does not depend on the relay
    second.send_chat("still here").await.unwrap();
    wait_for_notification(&mut first_notes, &mut seen, |n| {
        *n == Notification::Chat("still here".to_string())
    })
    .await;

    let report = first.hang_up().await;
    assert!(!report.bye_sent);
    assert!(report.transport_closed);
    second.hang_up().await;
}

#[tokio::test]
async fn test_unanswered_offer_times_out() {
    init_logging();

    let relay = InMemoryRelay::new();
    let factory = MockTransportFactory::new();
    let mut config = test_config("r1");
    config.negotiation_timeout_secs = Some(1);

    // The first occupant never answers
    let (_silent, _) = harness::RawPeer::join(&relay, "r1").await;
    let mut call = Call::start(config, mock_deps(&relay, &factory)).await.unwrap();
    assert_eq!(call.role(), Role::Caller);

    let state = call
        .wait_for_state(Duration::from_secs(5), |s| s.is_terminal())
        .await
        .unwrap();
    assert_eq!(state, NegotiationState::Failed);
    assert_eq!(factory.record(0).close_count(), 1);
    call.hang_up().await;
}

#[tokio::test]
async fn test_offer_failure_is_a_setup_error() {
    init_logging();

    let relay = InMemoryRelay::new();
    let factory = MockTransportFactory::failing_on("create_offer");
    let (_callee, _) = harness::RawPeer::join(&relay, "r1").await;

    let result = Call::start(test_config("r1"), mock_deps(&relay, &factory)).await;

    assert!(matches!(result, Err(Error::Negotiation(_))));
    assert_eq!(factory.record(0).close_count(), 1);
    // Only the raw peer remains connected
    assert_eq!(relay.connection_count().await, 1);
    assert_eq!(relay.member_count("r1").await, 1);
}

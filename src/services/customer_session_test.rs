use super::*;
use crate::net::types::{Role, SenderKind};
use crate::test_helpers::{FakeChatApi, RecordingAlertSink, auth_for, channel};

const CUSTOMER: u64 = 42;
const AGENT: u64 = 3;

/// Just past one customer poll period.
const TICK: Duration = Duration::from_millis(5_100);

struct Harness {
    api: Arc<FakeChatApi>,
    alerts: Arc<RecordingAlertSink>,
    session: CustomerSession,
}

fn harness(signed_in: bool) -> Harness {
    let api = Arc::new(FakeChatApi::new(CUSTOMER, AGENT));
    let alerts = Arc::new(RecordingAlertSink::default());
    let auth = signed_in.then(|| auth_for(CUSTOMER, Role::User));
    let session = CustomerSession::new(api.clone(), alerts.clone(), auth, &ClientConfig::default());
    Harness { api, alerts, session }
}

async fn wait(d: Duration) {
    tokio::time::sleep(d).await;
}

// =============================================================
// Unauthenticated
// =============================================================

#[tokio::test(start_paused = true)]
async fn unauthenticated_mount_and_send_make_no_api_calls() {
    let h = harness(false);
    h.session.mount().await.unwrap();
    assert_eq!(h.session.phase(), CustomerPhase::Unauthenticated);

    let err = h.session.submit("Halo").await.unwrap_err();
    assert_eq!(err, ChatError::Unauthenticated);
    assert_eq!(h.session.snapshot().last_error, Some(ChatError::Unauthenticated));
    assert!(h.api.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn permission_is_requested_once_per_session() {
    let h = harness(true);
    h.session.mount().await.unwrap();
    h.session.submit("Halo").await.unwrap();
    assert_eq!(h.alerts.permission_requests(), 1);
}

// =============================================================
// First message
// =============================================================

#[tokio::test(start_paused = true)]
async fn first_message_creates_channel_and_starts_polling() {
    let h = harness(true);
    h.session.mount().await.unwrap();
    h.session.set_draft("Halo");
    h.session.submit("Halo").await.unwrap();

    let state = h.session.snapshot();
    assert_eq!(state.phase(), CustomerPhase::AwaitingAgent);
    let ch = state.channel.as_ref().unwrap();
    assert_eq!(ch.status, ChannelStatus::Open);
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].sender, SenderKind::Customer);
    assert_eq!(state.messages[0].text, "Halo");
    assert_eq!(state.unread(), 0);
    assert!(state.draft.is_empty());
    assert!(h.session.is_polling());
    assert_eq!(h.api.count("create_channel"), 1);
}

#[tokio::test(start_paused = true)]
async fn blank_message_is_rejected_locally() {
    let h = harness(true);
    let err = h.session.submit("   ").await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    assert!(h.api.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_channel_creation_is_surfaced_and_retryable() {
    let h = harness(true);
    h.api.fail("create_channel", ChatError::Unreachable("connection refused".to_owned()));

    let err = h.session.submit("Halo").await.unwrap_err();
    assert!(matches!(err, ChatError::Unreachable(_)));
    let state = h.session.snapshot();
    assert_eq!(state.phase(), CustomerPhase::NoChannel);
    assert_eq!(state.last_error, Some(err));
    assert!(!state.sending);
    assert!(!h.session.is_polling());

    h.api.recover("create_channel");
    h.session.submit("Halo").await.unwrap();
    let state = h.session.snapshot();
    assert_eq!(state.phase(), CustomerPhase::AwaitingAgent);
    assert_eq!(state.last_error, None);
}

// =============================================================
// Mount
// =============================================================

#[tokio::test(start_paused = true)]
async fn mount_recovers_existing_channel_with_history_read() {
    let h = harness(true);
    h.api.add_channel(channel(7, ChannelStatus::Assigned, AGENT));
    h.api.push_message(7, SenderKind::Customer, "Halo");
    h.api.push_message(7, SenderKind::Agent, "Hi!");

    h.session.mount().await.unwrap();
    let state = h.session.snapshot();
    assert_eq!(state.channel_id(), Some(7));
    assert_eq!(state.phase(), CustomerPhase::Connected);
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.unread(), 0);
    assert!(h.session.is_polling());
    assert_eq!(h.api.calls(), vec!["customer_channels", "customer_channel"]);
}

#[tokio::test(start_paused = true)]
async fn mount_without_active_channel_stays_idle() {
    let h = harness(true);
    h.api.add_channel(channel(7, ChannelStatus::Closed, AGENT));
    h.session.mount().await.unwrap();
    assert_eq!(h.session.phase(), CustomerPhase::NoChannel);
    assert!(!h.session.is_polling());
}

// =============================================================
// Polling
// =============================================================

#[tokio::test(start_paused = true)]
async fn agent_reply_raises_unread_and_alerts_once() {
    let h = harness(true);
    let channel_id = h.session.send_first_message("Halo").await.unwrap();
    h.api.set_channel(channel_id, ChannelStatus::Assigned, AGENT);
    h.api.push_message(channel_id, SenderKind::Agent, "Selamat pagi");
    h.api.push_message(channel_id, SenderKind::Agent, "Ada yang bisa dibantu?");

    wait(TICK).await;
    let state = h.session.snapshot();
    assert_eq!(state.phase(), CustomerPhase::Connected);
    assert_eq!(state.unread(), 2);
    assert_eq!(h.alerts.sounds(), 1);
    assert_eq!(h.alerts.notifications(), vec![(AGENT_MESSAGE_TITLE.to_owned(), "Selamat pagi".to_owned())]);

    // Nothing new on the next tick: no change, no alert.
    wait(TICK).await;
    assert_eq!(h.session.snapshot().unread(), 2);
    assert_eq!(h.alerts.sounds(), 1);

    h.session.open_view();
    assert_eq!(h.session.snapshot().unread(), 0);
}

#[tokio::test(start_paused = true)]
async fn sent_message_is_not_duplicated_by_next_poll() {
    let h = harness(true);
    let channel_id = h.session.send_first_message("Halo").await.unwrap();
    let sent = h.session.send_message("Are you there?").await.unwrap();
    assert_eq!(sent.channel_id, channel_id);

    wait(TICK).await;
    let state = h.session.snapshot();
    assert_eq!(state.messages.iter().filter(|m| m.id == sent.id).count(), 1);
    assert_eq!(state.messages.len(), 2);
    assert_eq!(h.alerts.sounds(), 0);
}

#[tokio::test(start_paused = true)]
async fn closed_channel_stops_polling_and_disables_compose() {
    let h = harness(true);
    let channel_id = h.session.send_first_message("Halo").await.unwrap();
    h.api.set_channel(channel_id, ChannelStatus::Closed, AGENT);

    wait(TICK).await;
    assert_eq!(h.session.phase(), CustomerPhase::Closed);
    assert!(!h.session.is_polling());
    assert!(!h.session.snapshot().can_compose());

    let polls = h.api.count("customer_channel");
    wait(TICK * 3).await;
    assert_eq!(h.api.count("customer_channel"), polls);

    let err = h.session.submit("hello?").await.unwrap_err();
    assert_eq!(err, ChatError::ChannelClosed(channel_id));
}

#[tokio::test(start_paused = true)]
async fn poll_errors_are_retried_on_next_tick() {
    let h = harness(true);
    let channel_id = h.session.send_first_message("Halo").await.unwrap();
    h.api.fail("customer_channel", ChatError::Api { status: 503, message: None });
    h.api.push_message(channel_id, SenderKind::Agent, "Hi");

    wait(TICK).await;
    assert!(h.session.is_polling());
    assert_eq!(h.session.snapshot().unread(), 0);

    h.api.recover("customer_channel");
    wait(TICK).await;
    assert_eq!(h.session.snapshot().unread(), 1);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_poll_ends_session() {
    let h = harness(true);
    h.session.send_first_message("Halo").await.unwrap();
    h.api.fail("customer_channel", ChatError::Unauthenticated);

    wait(TICK).await;
    assert_eq!(h.session.phase(), CustomerPhase::Unauthenticated);
    assert!(!h.session.is_polling());

    let polls = h.api.count("customer_channel");
    wait(TICK * 2).await;
    assert_eq!(h.api.count("customer_channel"), polls);
}

#[tokio::test(start_paused = true)]
async fn sign_out_and_drop_stop_background_polling() {
    let h = harness(true);
    h.session.send_first_message("Halo").await.unwrap();
    h.session.sign_out();
    assert!(!h.session.is_polling());
    wait(TICK * 2).await;
    assert_eq!(h.api.count("customer_channel"), 0);

    let h = harness(true);
    h.session.send_first_message("Halo").await.unwrap();
    let api = h.api.clone();
    drop(h);
    wait(TICK * 2).await;
    assert_eq!(api.count("customer_channel"), 0);
}

#[tokio::test(start_paused = true)]
async fn every_call_carries_the_session_token() {
    let h = harness(true);
    h.session.send_first_message("Halo").await.unwrap();
    h.session.send_message("second").await.unwrap();
    wait(TICK).await;
    assert!(h.api.tokens().iter().all(|t| t == "token-42"));
    assert!(h.api.tokens().len() >= 3);
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_updates() {
    let h = harness(true);
    let mut rx = h.session.subscribe();
    h.session.send_first_message("Halo").await.unwrap();
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().messages.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_poller() {
    let h = harness(true);
    h.session.send_first_message("Halo").await.unwrap();
    h.session.shutdown().await;
    assert!(!h.session.is_polling());
}

//! Scenario tests for the dashboard sync core against the in-memory platform.
//!
//! # Tiers
//!
//! - **Tier 0:** SubscriptionManager lifecycle: idempotent subscribe and
//!   unsubscribe, cancellation mid-open, orphan channels, stream end
//! - **Tier 1:** DashboardController initial load: buffering during the bulk
//!   fetch, teardown while suspended, fetch and open failures, abandoned
//!   loads, viewer switches
//! - **Tier 2:** Writes and live updates across two dashboards: uploads,
//!   visibility filtering, status changes

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use tutorlink_client::{
    ApplyOutcome, ChannelKey, ChannelKind, ChannelNames, ChannelPhase, ClientConfig,
    DashboardController, DashboardError, DashboardStatus, MemoryPlatform, PlatformError,
    RealtimeTransport, ResourceUpload, SubscriptionError, SubscriptionManager, TransportError,
    ValidationError,
};
use tutorlink_types::{Identity, Resource, ResourceId, Session, SessionStatus, UserId};

// ============================================================================
// Shared test setup
// ============================================================================

const MB: usize = 1024 * 1024;

fn session_on(tutor: UserId, student: UserId, day: u32) -> Session {
    Session::new(
        tutor,
        student,
        "Algebra",
        NaiveDate::from_ymd_opt(2026, 10, day).unwrap(),
        NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
    )
}

fn resource(tutor: UserId, title: &str, is_public: bool, students: Vec<UserId>) -> Resource {
    Resource {
        id: ResourceId::new(),
        tutor_id: tutor,
        title: title.into(),
        description: None,
        subject: "algebra".into(),
        is_public,
        student_ids: students,
        file_url: format!("memory://resources/{title}"),
        file_name: format!("{title}.pdf"),
        content_type: "application/pdf".into(),
        size_bytes: 128,
        created_at: Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap(),
    }
}

fn upload(content_type: &str, size: usize) -> ResourceUpload {
    ResourceUpload {
        title: "Worksheet 3".into(),
        description: Some("Quadratics".into()),
        subject: "algebra".into(),
        is_public: true,
        student_ids: vec![],
        file_name: "worksheet 3.pdf".into(),
        content_type: content_type.into(),
        bytes: vec![7u8; size],
    }
}

fn dashboard(platform: &Arc<MemoryPlatform>) -> Arc<DashboardController> {
    let controller = DashboardController::new(platform.client(), ClientConfig::default());
    Arc::new(controller)
}

fn manager(platform: &Arc<MemoryPlatform>) -> Arc<SubscriptionManager> {
    let transport = platform.client().realtime;
    Arc::new(SubscriptionManager::new(transport, ChannelNames::default()))
}

/// Poll `cond` while letting spawned pump tasks run.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

// ============================================================================
// Tier 0: SubscriptionManager
// ============================================================================

#[tokio::test]
async fn test_subscribe_twice_opens_once() {
    let platform = Arc::new(MemoryPlatform::new());
    let subs = manager(&platform);
    let tutor = UserId::new();
    let key = ChannelKey::new(ChannelKind::Sessions, &Identity::tutor(tutor));

    let first_seen = Arc::new(AtomicUsize::new(0));
    let second_seen = Arc::new(AtomicUsize::new(0));
    let h1 = {
        let seen = Arc::clone(&first_seen);
        subs.subscribe(key, move |_: Session| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap()
    };
    let h2 = {
        let seen = Arc::clone(&second_seen);
        subs.subscribe(key, move |_: Session| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap()
    };

    assert_eq!(h1, h2);
    assert_eq!(platform.open_calls(), 1);
    assert_eq!(h1.name(), format!("session-updates:tutor:{tutor}"));

    platform.upsert_session(session_on(tutor, UserId::new(), 5));
    wait_until(|| first_seen.load(Ordering::SeqCst) == 1).await;
    assert_eq!(second_seen.load(Ordering::SeqCst), 0);

    subs.unsubscribe_all().unwrap();
}

#[tokio::test]
async fn test_subscribe_while_subscribing_reuses_handle() {
    let platform = Arc::new(MemoryPlatform::new());
    let subs = manager(&platform);
    let key = ChannelKey::new(ChannelKind::Resources, &Identity::student(UserId::new()));

    let gate = platform.hold_opens();
    let pending = tokio::spawn({
        let subs = Arc::clone(&subs);
        async move { subs.subscribe(key, |_: Resource| {}).await }
    });
    wait_until(|| platform.open_calls() == 1).await;
    assert_eq!(subs.phase(&key), ChannelPhase::Subscribing);

    let again = subs.subscribe(key, |_: Resource| {}).await.unwrap();
    gate.release();
    let first = pending.await.unwrap().unwrap();

    assert_eq!(first, again);
    assert_eq!(platform.open_calls(), 1);
    assert_eq!(subs.phase(&key), ChannelPhase::Open);
    subs.unsubscribe_all().unwrap();
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let platform = Arc::new(MemoryPlatform::new());
    let subs = manager(&platform);
    let key = ChannelKey::new(ChannelKind::Sessions, &Identity::student(UserId::new()));

    subs.subscribe(key, |_: Session| {}).await.unwrap();
    assert_eq!(platform.open_channels().len(), 1);

    subs.unsubscribe(&key).unwrap();
    subs.unsubscribe(&key).unwrap();
    subs.unsubscribe(&key).unwrap();

    assert!(platform.open_channels().is_empty());
    assert_eq!(platform.close_calls(), 1);
    assert_eq!(subs.phase(&key), ChannelPhase::Closed);
}

#[tokio::test]
async fn test_unsubscribe_closes_untracked_transport_channel() {
    let platform = Arc::new(MemoryPlatform::new());
    let subs = manager(&platform);
    let key = ChannelKey::new(ChannelKind::Sessions, &Identity::tutor(UserId::new()));

    let name = subs.channel_name(&key);
    let _stream = platform.open_channel(&name, key.filter()).await.unwrap();
    assert_eq!(platform.open_channels(), vec![name]);

    subs.unsubscribe(&key).unwrap();
    assert!(platform.open_channels().is_empty());
}

#[tokio::test]
async fn test_unsubscribe_during_open_cancels() {
    let platform = Arc::new(MemoryPlatform::new());
    let subs = manager(&platform);
    let key = ChannelKey::new(ChannelKind::Sessions, &Identity::tutor(UserId::new()));

    let gate = platform.hold_opens();
    let pending = tokio::spawn({
        let subs = Arc::clone(&subs);
        async move { subs.subscribe(key, |_: Session| {}).await }
    });
    wait_until(|| platform.open_calls() == 1).await;

    subs.unsubscribe(&key).unwrap();
    assert_eq!(subs.phase(&key), ChannelPhase::Closed);
    gate.release();

    let result = pending.await.unwrap();
    let cancelled = SubscriptionError::Cancelled(subs.channel_name(&key));
    assert_eq!(result, Err(cancelled));
    assert!(platform.open_channels().is_empty());
    assert_eq!(subs.active_count(), 0);
}

#[tokio::test]
async fn test_open_failure_is_returned_without_retry() {
    let platform = Arc::new(MemoryPlatform::new());
    let subs = manager(&platform);
    let key = ChannelKey::new(ChannelKind::Resources, &Identity::tutor(UserId::new()));

    platform.fail_next_open("socket closed");
    let err = subs.subscribe(key, |_: Resource| {}).await.unwrap_err();

    assert!(matches!(
        err,
        SubscriptionError::Transport(TransportError::Open { .. })
    ));
    assert_eq!(platform.open_calls(), 1);
    assert_eq!(subs.phase(&key), ChannelPhase::Closed);
}

#[tokio::test]
async fn test_stream_end_returns_key_to_closed() {
    let platform = Arc::new(MemoryPlatform::new());
    let subs = manager(&platform);
    let key = ChannelKey::new(ChannelKind::Sessions, &Identity::tutor(UserId::new()));

    let handle = subs.subscribe(key, |_: Session| {}).await.unwrap();
    assert!(platform.end_channel(handle.name()));

    wait_until(|| subs.phase(&key) == ChannelPhase::Closed).await;
    assert_eq!(subs.active_count(), 0);
}

#[tokio::test]
async fn test_undecodable_event_is_skipped() {
    let platform = Arc::new(MemoryPlatform::new());
    let subs = manager(&platform);
    let tutor = UserId::new();
    let key = ChannelKey::new(ChannelKind::Sessions, &Identity::tutor(tutor));

    let seen = Arc::new(AtomicUsize::new(0));
    let handle = {
        let seen = Arc::clone(&seen);
        subs.subscribe(key, move |_: Session| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap()
    };

    let garbage = tutorlink_client::ChangeEvent::insert(
        "sessions",
        serde_json::json!({ "tutor_id": tutor.to_string(), "date": "not a date" }),
    );
    assert!(platform.push_raw(handle.name(), garbage));
    platform.upsert_session(session_on(tutor, UserId::new(), 9));

    wait_until(|| seen.load(Ordering::SeqCst) == 1).await;
    assert_eq!(subs.phase(&key), ChannelPhase::Open);
    subs.unsubscribe_all().unwrap();
}

// ============================================================================
// Tier 1: initial load
// ============================================================================

#[tokio::test]
async fn test_update_during_fetch_is_applied_after_load() {
    let platform = Arc::new(MemoryPlatform::new());
    let tutor = UserId::new();
    let student = UserId::new();
    let a = session_on(tutor, student, 1);
    let b = session_on(tutor, student, 2);
    platform.seed_session(a.clone());
    platform.seed_session(b.clone());

    let dash = dashboard(&platform);
    let gate = platform.hold_fetches();
    let init = tokio::spawn({
        let dash = Arc::clone(&dash);
        async move { dash.initialize(Identity::tutor(tutor)).await }
    });
    let sessions_open = || dash.channel_phase(ChannelKind::Sessions) == ChannelPhase::Open;
    wait_until(sessions_open).await;
    assert_eq!(dash.status(), DashboardStatus::Loading);

    let b_prime = b.clone().with_status(SessionStatus::Confirmed);
    platform.upsert_session(b_prime.clone());
    wait_until(|| dash.buffered_updates() == 1).await;
    assert!(dash.sessions().is_empty());

    gate.release();
    init.await.unwrap().unwrap();

    assert_eq!(*dash.sessions(), vec![a, b_prime]);
    assert_eq!(dash.buffered_updates(), 0);
    assert_eq!(dash.status(), DashboardStatus::Live);
    dash.teardown().unwrap();
}

#[tokio::test]
async fn test_teardown_during_fetch_discards_result() {
    let platform = Arc::new(MemoryPlatform::new());
    let tutor = UserId::new();
    platform.seed_session(session_on(tutor, UserId::new(), 3));

    let dash = dashboard(&platform);
    let gate = platform.hold_fetches();
    let init = tokio::spawn({
        let dash = Arc::clone(&dash);
        async move { dash.initialize(Identity::tutor(tutor)).await }
    });
    wait_until(|| platform.open_channels().len() == 2).await;

    dash.teardown().unwrap();
    assert!(platform.open_channels().is_empty());
    gate.release();

    assert_eq!(init.await.unwrap(), Err(DashboardError::TornDown));
    assert!(dash.sessions().is_empty());
    assert!(dash.resources().is_empty());
    assert!(platform.open_channels().is_empty());
    assert_eq!(dash.status(), DashboardStatus::TornDown);
}

#[tokio::test]
async fn test_teardown_while_channels_opening() {
    let platform = Arc::new(MemoryPlatform::new());
    let dash = dashboard(&platform);
    let fetches = platform.hold_fetches();
    let opens = platform.hold_opens();

    let init = tokio::spawn({
        let dash = Arc::clone(&dash);
        async move { dash.initialize(Identity::student(UserId::new())).await }
    });
    wait_until(|| platform.open_calls() == 2 && platform.fetch_calls() == 2).await;

    dash.teardown().unwrap();
    opens.release();
    fetches.release();

    assert_eq!(init.await.unwrap(), Err(DashboardError::TornDown));
    assert!(platform.open_channels().is_empty());
}

#[tokio::test]
async fn test_fetch_failure_then_retry() {
    let platform = Arc::new(MemoryPlatform::new());
    let tutor = UserId::new();
    let s = session_on(tutor, UserId::new(), 4);
    platform.seed_session(s.clone());
    let dash = dashboard(&platform);

    platform.fail_next_fetch("timeout");
    let err = dash.initialize(Identity::tutor(tutor)).await.unwrap_err();
    let request = PlatformError::Request("timeout".into());
    assert_eq!(err, DashboardError::Fetch(request));
    let failed = DashboardStatus::Failed("request failed: timeout".into());
    assert_eq!(dash.status(), failed);
    assert!(platform.open_channels().is_empty());

    dash.initialize(Identity::tutor(tutor)).await.unwrap();
    assert_eq!(*dash.sessions(), vec![s]);
    assert_eq!(dash.status(), DashboardStatus::Live);
    dash.teardown().unwrap();
}

#[tokio::test]
async fn test_open_failure_leaves_data_stale() {
    let platform = Arc::new(MemoryPlatform::new());
    let tutor = UserId::new();
    let s = session_on(tutor, UserId::new(), 6);
    platform.seed_session(s.clone());
    let dash = dashboard(&platform);

    platform.fail_next_open("refused");
    let err = dash.initialize(Identity::tutor(tutor)).await.unwrap_err();
    assert!(matches!(
        err,
        DashboardError::Subscription(SubscriptionError::Transport(_))
    ));
    assert!(matches!(dash.status(), DashboardStatus::Stale(_)));
    assert_eq!(*dash.sessions(), vec![s]);
    assert!(platform.open_channels().is_empty());

    dash.initialize(Identity::tutor(tutor)).await.unwrap();
    assert_eq!(dash.status(), DashboardStatus::Live);
    assert_eq!(platform.open_channels().len(), 2);
    dash.teardown().unwrap();
}

#[tokio::test]
async fn test_initialize_timeout_then_retry_goes_live() {
    let platform = Arc::new(MemoryPlatform::new());
    let tutor = UserId::new();
    let identity = Identity::tutor(tutor);
    let dash = dashboard(&platform);

    // the caller gives up while both channel opens are still pending
    let opens = platform.hold_opens();
    let init = dash.initialize(identity);
    let attempt = tokio::time::timeout(Duration::from_millis(50), init).await;
    assert!(attempt.is_err());
    let phase = |kind: ChannelKind| dash.channel_phase(kind);
    assert_eq!(phase(ChannelKind::Sessions), ChannelPhase::Closed);
    assert_eq!(phase(ChannelKind::Resources), ChannelPhase::Closed);

    opens.release();
    dash.initialize(identity).await.unwrap();
    assert_eq!(dash.status(), DashboardStatus::Live);
    assert_eq!(phase(ChannelKind::Sessions), ChannelPhase::Open);
    assert_eq!(phase(ChannelKind::Resources), ChannelPhase::Open);
    assert_eq!(platform.open_channels().len(), 2);

    let s = session_on(tutor, UserId::new(), 15);
    platform.upsert_session(s.clone());
    wait_until(|| dash.sessions().len() == 1).await;
    assert_eq!(dash.sessions()[0], s);
    dash.teardown().unwrap();
}

#[tokio::test]
async fn test_switching_viewer_after_failed_fetch_shows_no_stale_rows() {
    let platform = Arc::new(MemoryPlatform::new());
    let first = UserId::new();
    let second = UserId::new();
    platform.seed_session(session_on(first, UserId::new(), 8));
    platform.seed_resource(resource(first, "first-only", true, vec![]));
    let dash = dashboard(&platform);

    dash.initialize(Identity::tutor(first)).await.unwrap();
    assert_eq!(dash.sessions().len(), 1);
    assert_eq!(dash.resources().len(), 1);

    platform.fail_next_fetch("timeout");
    let err = dash.initialize(Identity::tutor(second)).await.unwrap_err();
    assert!(matches!(err, DashboardError::Fetch(_)));
    assert!(dash.sessions().is_empty());
    assert!(dash.resources().is_empty());

    // updates for the first viewer no longer reach this dashboard
    platform.upsert_session(session_on(first, UserId::new(), 9));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(dash.sessions().is_empty());
    dash.teardown().unwrap();
}

// ============================================================================
// Tier 2: writes and live updates
// ============================================================================

#[tokio::test]
async fn test_oversized_upload_never_reaches_storage() {
    let platform = Arc::new(MemoryPlatform::new());
    let dash = dashboard(&platform);
    let tutor = Identity::tutor(UserId::new());
    dash.initialize(tutor).await.unwrap();

    let oversized = upload("application/pdf", 11 * MB);
    let err = dash.upload_resource(oversized).await.unwrap_err();
    assert!(matches!(
        err,
        DashboardError::Validation(ValidationError::FileTooLarge { .. })
    ));
    assert!(err.to_string().contains("10.0MB"));

    let image = upload("image/png", 1024);
    let err = dash.upload_resource(image).await.unwrap_err();
    assert!(matches!(
        err,
        DashboardError::Validation(ValidationError::UnsupportedType { .. })
    ));

    assert_eq!(platform.upload_calls(), 0);
    assert!(platform.resource_rows().is_empty());
    dash.teardown().unwrap();
}

#[tokio::test]
async fn test_upload_publishes_to_tutor_and_students() {
    let platform = Arc::new(MemoryPlatform::new());
    let tutor = UserId::new();
    let student = UserId::new();
    let tutor_dash = dashboard(&platform);
    let student_dash = dashboard(&platform);
    tutor_dash.initialize(Identity::tutor(tutor)).await.unwrap();
    let viewer = Identity::student(student);
    student_dash.initialize(viewer).await.unwrap();

    let pdf = upload("application/pdf", 4096);
    let published = tutor_dash.upload_resource(pdf).await.unwrap();
    assert_eq!(published.size_bytes, 4096);
    let prefix = format!("memory://resources/{tutor}/");
    assert!(published.file_url.starts_with(&prefix));
    assert_eq!(platform.upload_calls(), 1);
    assert_eq!(*tutor_dash.resources(), vec![published.clone()]);

    wait_until(|| student_dash.resources().len() == 1).await;
    assert_eq!(student_dash.resources()[0], published);

    tutor_dash.teardown().unwrap();
    student_dash.teardown().unwrap();
}

#[tokio::test]
async fn test_student_only_sees_visible_resources() {
    let platform = Arc::new(MemoryPlatform::new());
    let tutor = UserId::new();
    let student = UserId::new();
    let dash = dashboard(&platform);
    dash.initialize(Identity::student(student)).await.unwrap();

    let hidden = resource(tutor, "someone-elses", false, vec![UserId::new()]);
    let shared = resource(tutor, "for-you", false, vec![student]);
    platform.upsert_resource(hidden);
    platform.upsert_resource(shared.clone());

    wait_until(|| !dash.resources().is_empty()).await;
    assert_eq!(*dash.resources(), vec![shared]);
    dash.teardown().unwrap();
}

#[tokio::test]
async fn test_status_change_reaches_other_party() {
    let platform = Arc::new(MemoryPlatform::new());
    let tutor = UserId::new();
    let student = UserId::new();
    let s = session_on(tutor, student, 12);
    platform.seed_session(s.clone());

    let tutor_dash = dashboard(&platform);
    let student_dash = dashboard(&platform);
    tutor_dash.initialize(Identity::tutor(tutor)).await.unwrap();
    let viewer = Identity::student(student);
    student_dash.initialize(viewer).await.unwrap();
    let before = student_dash.generation();

    tutor_dash
        .update_session_status(s.id, SessionStatus::Confirmed)
        .await
        .unwrap();

    let confirmed = || student_dash.sessions()[0].status == SessionStatus::Confirmed;
    wait_until(confirmed).await;
    assert!(student_dash.generation() > before);

    tutor_dash.teardown().unwrap();
    student_dash.teardown().unwrap();
}

#[tokio::test]
async fn test_duplicate_snapshot_keeps_identity() {
    let platform = Arc::new(MemoryPlatform::new());
    let tutor = UserId::new();
    let s = session_on(tutor, UserId::new(), 20);
    platform.seed_session(s.clone());
    let dash = dashboard(&platform);
    dash.initialize(Identity::tutor(tutor)).await.unwrap();

    let before = dash.sessions();
    let generation = dash.generation();
    let outcome = dash.apply_session(s);
    assert_eq!(outcome, ApplyOutcome::Merged { changed: false });
    assert!(Arc::ptr_eq(&before, &dash.sessions()));
    assert_eq!(dash.generation(), generation);
    dash.teardown().unwrap();
}

#[tokio::test]
async fn test_delete_resource_removes_locally() {
    let platform = Arc::new(MemoryPlatform::new());
    let tutor = UserId::new();
    let keep = resource(tutor, "keep", true, vec![]);
    let drop_me = resource(tutor, "drop", true, vec![]);
    platform.seed_resource(keep.clone());
    platform.seed_resource(drop_me.clone());
    let dash = dashboard(&platform);
    dash.initialize(Identity::tutor(tutor)).await.unwrap();

    dash.delete_resource(drop_me.id).await.unwrap();
    assert_eq!(*dash.resources(), vec![keep]);
    assert_eq!(platform.resource_rows().len(), 1);

    let err = dash.delete_resource(drop_me.id).await.unwrap_err();
    assert_eq!(err, DashboardError::UnknownResource(drop_me.id));
    dash.teardown().unwrap();
}

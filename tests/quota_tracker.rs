use relayguard::telemetry::{self, GuardEvent, MemorySink, QuotaEvent};
use relayguard::{BackendKind, GuardError, ManualClock, Policy, QuotaTracker};
use std::sync::Arc;
use std::time::Duration;

const START: u64 = 1_735_689_600_000;

fn tracker_at(clock: &ManualClock) -> QuotaTracker {
    QuotaTracker::builder().clock(clock.clone()).build()
}

#[tokio::test]
async fn admits_limit_then_denies_without_recording() {
    let clock = ManualClock::new(START);
    let tracker = tracker_at(&clock);
    let policy = Policy::new("burst", Duration::from_secs(60), 3);

    for expected in [2, 1, 0] {
        let decision = tracker.check_and_record("alice", &policy).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining, expected);
        assert_eq!(decision.limit, 3);
        clock.advance(Duration::from_millis(10));
    }

    // Denials leave the log alone, so repeated attempts keep the same retry time.
    let first = tracker.check_and_record("alice", &policy).await.unwrap();
    let second = tracker.check_and_record("alice", &policy).await.unwrap();
    assert!(!first.allowed && !second.allowed);
    assert_eq!(first.remaining, 0);
    assert_eq!(first.retry_at, START + 60_000);
    assert_eq!(first.retry_at, second.retry_at);
}

#[tokio::test]
async fn limit_holds_while_clock_is_inside_first_window() {
    let clock = ManualClock::new(0);
    let tracker = tracker_at(&clock);
    let policy = Policy::new("early", Duration::from_secs(60), 2);

    let mut admissions = Vec::new();
    for _ in 0..5 {
        admissions.push(tracker.check_and_record("zoe", &policy).await.unwrap().allowed);
    }
    assert_eq!(admissions, vec![true, true, false, false, false]);

    clock.set(60_000);
    assert!(tracker.check_and_record("zoe", &policy).await.unwrap().allowed);
}

#[tokio::test]
async fn window_slides_one_timestamp_at_a_time() {
    let clock = ManualClock::new(START);
    let tracker = tracker_at(&clock);
    let policy = Policy::new("slide", Duration::from_secs(10), 2);

    assert!(tracker.check_and_record("bob", &policy).await.unwrap().allowed);
    clock.advance(Duration::from_secs(4));
    assert!(tracker.check_and_record("bob", &policy).await.unwrap().allowed);

    clock.advance(Duration::from_secs(5));
    assert!(!tracker.check_and_record("bob", &policy).await.unwrap().allowed);

    // At exactly start + window the first stamp has left the window.
    clock.set(START + 10_000);
    let decision = tracker.check_and_record("bob", &policy).await.unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 0);
    assert_eq!(decision.window_reset_at, START + 10_000);

    // The second stamp (at +4s) still counts until +14s.
    clock.set(START + 13_999);
    assert!(!tracker.check_and_record("bob", &policy).await.unwrap().allowed);
    clock.set(START + 14_000);
    assert!(tracker.check_and_record("bob", &policy).await.unwrap().allowed);
}

#[tokio::test]
async fn identities_and_policies_are_isolated() {
    let clock = ManualClock::new(START);
    let tracker = tracker_at(&clock);
    let tight = Policy::new("tight", Duration::from_secs(60), 1);
    let other = Policy::new("other", Duration::from_secs(60), 1);

    assert!(tracker.check_and_record("carol", &tight).await.unwrap().allowed);
    assert!(!tracker.check_and_record("carol", &tight).await.unwrap().allowed);
    assert!(tracker.check_and_record("dave", &tight).await.unwrap().allowed);
    assert!(tracker.check_and_record("carol", &other).await.unwrap().allowed);
}

#[tokio::test]
async fn chat_policy_allows_thirty_per_five_minutes() {
    let clock = ManualClock::new(START);
    let chat = tracker_at(&clock).for_policy(Policy::CHAT);

    let mut remaining = Vec::new();
    for _ in 0..30 {
        let decision = chat.check("user-42").await.unwrap();
        assert!(decision.allowed);
        remaining.push(decision.remaining);
        clock.advance(Duration::from_secs(1));
    }
    assert_eq!(remaining.first(), Some(&29));
    assert_eq!(remaining.last(), Some(&0));

    match chat.admit("user-42").await {
        Err(GuardError::QuotaExceeded { decision, message }) => {
            assert_eq!(decision.remaining, 0);
            assert_eq!(message, Policy::CHAT.denial_message());
        }
        other => panic!("expected QuotaExceeded, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_never_exceed_the_limit() {
    let clock = ManualClock::new(START);
    let tracker = tracker_at(&clock);
    let policy = Arc::new(Policy::new("race", Duration::from_secs(60), 25));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let tracker = tracker.clone();
            let policy = policy.clone();
            tokio::spawn(async move { tracker.check_and_record("eve", &policy).await })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().allowed {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 25);
}

#[tokio::test]
async fn decisions_are_reported_to_the_sink() {
    let sink = MemorySink::new();
    let tracker = QuotaTracker::builder()
        .clock(ManualClock::new(START))
        .sink(telemetry::boxed(sink.clone()))
        .build();
    let policy = Policy::new("observed", Duration::from_secs(60), 1);

    tracker.check_and_record("frank", &policy).await.unwrap();
    tracker.check_and_record("frank", &policy).await.unwrap();

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert!(matches!(
        events[0],
        GuardEvent::Quota(QuotaEvent::Admitted {
            policy: "observed",
            remaining: 0,
            backend: BackendKind::Local
        })
    ));
    match &events[1] {
        GuardEvent::Quota(QuotaEvent::Denied { policy, retry_after }) => {
            assert_eq!(*policy, "observed");
            assert_eq!(*retry_after, Duration::from_secs(60));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn local_tracker_reports_its_backend() {
    assert_eq!(QuotaTracker::local().backend_kind(), BackendKind::Local);
}

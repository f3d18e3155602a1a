//! Tests for actor startup, cancellation and shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keyring_agent::facility::{errno, MemoryFacility};
use keyring_agent::{ActorStatus, KeyringActor, KeyringError, StopCause};

use crate::support::{test_config, DropSignal, SlowFacility};

#[tokio::test]
async fn start_reports_running() {
    let actor = KeyringActor::start(MemoryFacility::new(), &test_config())
        .await
        .expect("actor should start");
    assert_eq!(actor.status(), ActorStatus::Running);
}

#[tokio::test]
async fn stop_is_idempotent_and_wait_reports_cancelled() {
    let actor = KeyringActor::start(MemoryFacility::new(), &test_config())
        .await
        .expect("actor should start");

    actor.stop();
    actor.stop();
    assert_eq!(actor.wait().await, StopCause::Cancelled);

    actor.stop();
    assert_eq!(actor.wait().await, StopCause::Cancelled);
    assert_eq!(actor.status(), ActorStatus::Stopped(StopCause::Cancelled));
}

#[tokio::test]
async fn requests_after_stop_fail_with_shutdown() {
    let actor = KeyringActor::start(MemoryFacility::new(), &test_config())
        .await
        .expect("actor should start");
    actor.add_key("k", b"v").await.expect("add before stop");

    actor.stop();
    assert_eq!(actor.add_key("k", b"v").await, Err(KeyringError::Shutdown));
    assert!(matches!(
        actor.read_key("k").await,
        Err(KeyringError::Shutdown)
    ));
    assert_eq!(actor.remove_key("k").await, Err(KeyringError::Shutdown));

    actor.wait().await;
    assert_eq!(actor.describe().await, Err(KeyringError::Shutdown));
}

#[tokio::test]
async fn stop_from_a_clone_stops_every_clone() {
    let actor = KeyringActor::start(MemoryFacility::new(), &test_config())
        .await
        .expect("actor should start");
    let other = actor.clone();

    other.stop();
    assert_eq!(actor.wait().await, StopCause::Cancelled);
    assert_eq!(actor.remove_key("k").await, Err(KeyringError::Shutdown));
}

#[tokio::test]
async fn creation_failure_is_reported_by_start() {
    let facility = MemoryFacility::new();
    facility.fail_join(errno::EACCES);

    let err = KeyringActor::start(facility, &test_config())
        .await
        .expect_err("join failure should fail start");
    assert!(matches!(err, KeyringError::CreationFailed(_)));
    assert_eq!(err.errno(), Some(errno::EACCES));
}

#[tokio::test]
async fn requests_on_a_failed_actor_carry_the_creation_error() {
    let facility = MemoryFacility::new();
    facility.fail_join(errno::EACCES);

    let actor = KeyringActor::spawn(facility, &test_config()).expect("thread should spawn");
    let err = actor
        .add_key("k", b"v")
        .await
        .expect_err("request on a failed actor should fail");
    assert!(matches!(err, KeyringError::CreationFailed(_)));

    let cause = actor.wait().await;
    assert!(matches!(cause, StopCause::CreationFailed(_)));
    assert!(matches!(
        actor.read_key("k").await,
        Err(KeyringError::CreationFailed(_))
    ));
}

#[tokio::test]
async fn requests_queued_before_ready_are_served() {
    let actor =
        KeyringActor::spawn(MemoryFacility::new(), &test_config()).expect("thread should spawn");

    actor.add_key("early", b"bird").await.expect("queued add");
    actor.ready().await.expect("actor should be ready");
    assert_eq!(
        actor.read_key("early").await.expect("read").as_slice(),
        b"bird"
    );
}

#[tokio::test]
async fn dropping_every_handle_releases_the_thread() {
    let dropped = Arc::new(AtomicBool::new(false));
    let facility = DropSignal {
        inner: MemoryFacility::new(),
        linger: Duration::ZERO,
        dropped: Arc::clone(&dropped),
    };
    let actor = KeyringActor::start(facility, &test_config())
        .await
        .expect("actor should start");
    let clone = actor.clone();

    drop(actor);
    drop(clone);

    let released = tokio::time::timeout(Duration::from_secs(5), async {
        while !dropped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "actor thread should drop its facility");
}

#[tokio::test]
async fn every_waiter_returns_after_the_keyring_is_released() {
    let dropped = Arc::new(AtomicBool::new(false));
    let facility = DropSignal {
        inner: MemoryFacility::new(),
        linger: Duration::from_millis(200),
        dropped: Arc::clone(&dropped),
    };
    let actor = KeyringActor::start(facility, &test_config())
        .await
        .expect("actor should start");
    let other = actor.clone();

    actor.stop();
    let first = async {
        let cause = actor.wait().await;
        (cause, dropped.load(Ordering::SeqCst))
    };
    let second = async {
        let cause = other.wait().await;
        (cause, dropped.load(Ordering::SeqCst))
    };
    let ((first_cause, first_released), (second_cause, second_released)) =
        tokio::join!(first, second);

    assert_eq!(first_cause, StopCause::Cancelled);
    assert_eq!(second_cause, StopCause::Cancelled);
    assert!(first_released, "joining waiter returned before release");
    assert!(second_released, "concurrent waiter returned before release");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queued_requests_are_answered_when_stopped() {
    let facility = SlowFacility {
        inner: MemoryFacility::new(),
        delay: Duration::from_millis(50),
    };
    let actor = KeyringActor::start(facility, &test_config())
        .await
        .expect("actor should start");

    let mut tasks = Vec::new();
    for i in 0..6 {
        let actor = actor.clone();
        tasks.push(tokio::spawn(async move {
            actor.add_key(&format!("queued-{i}"), b"v").await
        }));
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    actor.stop();

    let mut shutdown = 0;
    for task in tasks {
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("queued request should be answered")
            .expect("caller task should not panic");
        match result {
            Ok(()) => {}
            Err(KeyringError::Shutdown) => shutdown += 1,
            Err(other) => panic!("unexpected error for a queued request: {other:?}"),
        }
    }
    assert!(shutdown >= 1, "requests queued behind stop should be rejected");
    assert_eq!(actor.wait().await, StopCause::Cancelled);
}

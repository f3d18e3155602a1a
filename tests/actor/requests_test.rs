//! Tests for request routing: add, read, remove, describe, permissions.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use keyring_agent::facility::{errno, MemoryFacility};
use keyring_agent::{KeyringActor, KeyringError, Permission, PermissionGroup, PermissionMask};

use crate::support::{test_config, GrowingFacility, PanickingFacility};

async fn memory_actor() -> (KeyringActor, MemoryFacility) {
    let facility = MemoryFacility::new();
    let actor = KeyringActor::start(facility.clone(), &test_config())
        .await
        .expect("actor should start");
    (actor, facility)
}

#[tokio::test]
async fn add_read_remove_read_scenario() {
    let (actor, _facility) = memory_actor().await;

    actor
        .add_key("test", b"Hello World")
        .await
        .expect("add should succeed");
    let secret = actor.read_key("test").await.expect("read should succeed");
    assert_eq!(secret.as_slice(), b"Hello World");

    actor.remove_key("test").await.expect("remove should succeed");
    let missing = actor.read_key("test").await;
    assert!(
        matches!(missing, Err(KeyringError::NotFound(ref name)) if name == "test"),
        "read after remove should be NotFound, got {missing:?}"
    );

    actor.stop();
    actor.wait().await;
}

#[tokio::test]
async fn scenario_repeats_on_the_same_actor() {
    let (actor, facility) = memory_actor().await;

    for _ in 0..2 {
        actor
            .add_key("test", b"Hello World")
            .await
            .expect("add should succeed");
        let secret = actor.read_key("test").await.expect("read should succeed");
        assert_eq!(secret.as_slice(), b"Hello World");
        actor.remove_key("test").await.expect("remove should succeed");
        assert!(matches!(
            actor.read_key("test").await,
            Err(KeyringError::NotFound(_))
        ));
    }
    assert_eq!(facility.key_count(), 0);
}

#[tokio::test]
async fn re_adding_replaces_the_payload() {
    let (actor, _facility) = memory_actor().await;

    actor.add_key("token", b"first").await.expect("add");
    actor.add_key("token", b"second").await.expect("re-add");
    let secret = actor.read_key("token").await.expect("read");
    assert_eq!(secret.as_slice(), b"second");
}

#[tokio::test]
async fn empty_payload_is_rejected() {
    let (actor, facility) = memory_actor().await;

    let err = actor
        .add_key("empty", b"")
        .await
        .expect_err("empty user payload should fail");
    assert_eq!(err.errno(), Some(errno::EINVAL));
    assert!(matches!(err, KeyringError::Facility(_)));
    assert_eq!(facility.key_count(), 0);
}

#[tokio::test]
async fn binary_payload_round_trips() {
    let (actor, _facility) = memory_actor().await;

    let binary: Vec<u8> = (0..=255).collect();
    actor.add_key("binary", &binary).await.expect("add binary");
    assert_eq!(
        actor.read_key("binary").await.expect("read binary").as_slice(),
        binary.as_slice()
    );
}

#[tokio::test]
async fn remove_missing_key_is_not_found() {
    let (actor, _facility) = memory_actor().await;
    assert_eq!(
        actor.remove_key("nothing-here").await,
        Err(KeyringError::NotFound("nothing-here".to_owned()))
    );
}

#[tokio::test]
async fn oversized_payload_keeps_the_errno() {
    let (actor, _facility) = memory_actor().await;
    let payload = vec![0u8; MemoryFacility::MAX_USER_PAYLOAD + 1];
    let err = actor
        .add_key("huge", &payload)
        .await
        .expect_err("oversized payload should fail");
    assert_eq!(err.errno(), Some(errno::EINVAL));
    assert!(matches!(err, KeyringError::Facility(_)));
}

#[tokio::test]
async fn describe_reports_the_session_keyring() {
    let config = test_config();
    let actor = KeyringActor::start(MemoryFacility::new(), &config)
        .await
        .expect("actor should start");

    let description = actor.describe().await.expect("describe should succeed");
    assert_eq!(description.key_type, "keyring");
    assert_eq!(description.description, config.name);
    assert!(description.perm.is_some());
}

#[tokio::test]
async fn set_permission_is_reflected_in_describe() {
    let (actor, _facility) = memory_actor().await;
    let mask = PermissionMask::PROCESS_ALL.with(
        PermissionGroup::User,
        Permission::VIEW | Permission::READ,
    );

    actor.set_permission(mask).await.expect("setperm should succeed");
    let description = actor.describe().await.expect("describe");
    assert_eq!(description.perm, Some(mask));
}

#[tokio::test]
async fn configured_permission_is_applied_at_start() {
    let mut config = test_config();
    let mask = PermissionMask::PROCESS_ALL | PermissionMask::USER_ALL;
    config.permission = Some(mask);

    let actor = KeyringActor::start(MemoryFacility::new(), &config)
        .await
        .expect("actor should start");
    assert_eq!(actor.describe().await.expect("describe").perm, Some(mask));
}

#[tokio::test]
async fn panicking_call_is_reported_and_loop_survives() {
    let inner = MemoryFacility::new();
    let actor = KeyringActor::start(PanickingFacility { inner }, &test_config())
        .await
        .expect("actor should start");

    let err = actor
        .add_key("boom", b"x")
        .await
        .expect_err("panicking call should fail");
    assert!(matches!(err, KeyringError::Facility(ref e) if e.op() == "add"));

    actor
        .add_key("fine", b"still here")
        .await
        .expect("loop should keep serving after a panic");
    assert_eq!(
        actor.read_key("fine").await.expect("read").as_slice(),
        b"still here"
    );
}

#[tokio::test]
async fn read_retries_once_when_payload_grows() {
    let growths = Arc::new(AtomicUsize::new(1));
    let facility = GrowingFacility {
        inner: MemoryFacility::new(),
        growths: Arc::clone(&growths),
    };
    let actor = KeyringActor::start(facility, &test_config())
        .await
        .expect("actor should start");

    actor.add_key("k", b"payload").await.expect("add");
    let secret = actor.read_key("k").await.expect("read should recover");
    assert_eq!(secret.as_slice(), b"payload");
}

#[tokio::test]
async fn read_gives_up_when_payload_keeps_growing() {
    let facility = GrowingFacility {
        inner: MemoryFacility::new(),
        growths: Arc::new(AtomicUsize::new(usize::MAX)),
    };
    let actor = KeyringActor::start(facility, &test_config())
        .await
        .expect("actor should start");

    actor.add_key("k", b"payload").await.expect("add");
    let err = actor
        .read_key("k")
        .await
        .expect_err("unbounded growth should fail");
    assert_eq!(err.errno(), Some(errno::EMSGSIZE));
}

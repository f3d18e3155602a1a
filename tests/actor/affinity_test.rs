//! Tests that every keyring call runs on the actor's own thread.

use std::collections::HashSet;

use keyring_agent::facility::MemoryFacility;
use keyring_agent::KeyringActor;

use crate::support::test_config;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_are_served_on_one_thread() {
    let facility = MemoryFacility::new();
    let actor = KeyringActor::start(facility.clone(), &test_config())
        .await
        .expect("actor should start");

    let mut tasks = Vec::new();
    for i in 0..32 {
        let actor = actor.clone();
        tasks.push(tokio::spawn(async move {
            let name = format!("key-{i}");
            let payload = format!("value-{i}");
            actor
                .add_key(&name, payload.as_bytes())
                .await
                .expect("add should succeed");
            let secret = actor.read_key(&name).await.expect("read should succeed");
            assert_eq!(secret.as_slice(), payload.as_bytes());
            actor.remove_key(&name).await.expect("remove should succeed");
        }));
    }
    for task in tasks {
        task.await.expect("caller task should not panic");
    }

    assert_eq!(facility.key_count(), 0);
    assert_eq!(
        facility.observed_threads(),
        HashSet::from([actor.thread_id()]),
        "every facility call must come from the actor thread"
    );

    actor.stop();
    actor.wait().await;
}

#[tokio::test]
async fn caller_thread_cannot_reach_the_actor_keyring() {
    use keyring_agent::facility::{errno, KeyFacility, KeySerial};

    let facility = MemoryFacility::new();
    let actor = KeyringActor::start(facility.clone(), &test_config())
        .await
        .expect("actor should start");
    actor.add_key("k", b"v").await.expect("add");

    // The test thread never joined a session keyring.
    let err = facility
        .request_key("user", "k", KeySerial::SESSION_KEYRING)
        .expect_err("foreign thread has no session keyring");
    assert_eq!(err.errno(), Some(errno::ENOKEY));

    // The actor thread still resolves it.
    assert_eq!(actor.read_key("k").await.expect("read").as_slice(), b"v");
}

#[tokio::test]
async fn separate_actors_get_separate_keyrings() {
    let facility = MemoryFacility::new();
    let first = KeyringActor::start(facility.clone(), &test_config())
        .await
        .expect("first actor");
    let second = KeyringActor::start(facility.clone(), &test_config())
        .await
        .expect("second actor");

    assert_ne!(first.thread_id(), second.thread_id());
    first.add_key("shared-name", b"one").await.expect("add");
    assert!(second.read_key("shared-name").await.is_err());
}

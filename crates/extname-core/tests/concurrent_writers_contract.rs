//! Contract Test: Concurrent Writers
//!
//! Two callers racing to point the same record at different addresses must
//! leave it holding exactly one of them, and neither may exceed its retry
//! budget.

mod common;

use common::*;
use extname_core::address::validate;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn racing_applies_leave_one_whole_address() {
    let (inner, web) = seeded_store("web", "old-ip").await;
    // Both reads land before either write, forcing a conflict.
    let store = CountingStore::new(inner.clone()).with_read_latency(Duration::from_millis(20));
    let updater = updater_over(Arc::new(store.clone()), 5);

    let first = validate("10.0.0.1").unwrap();
    let second = validate("10.0.0.2").unwrap();

    let (a, b) = tokio::join!(updater.apply(&web, &first), updater.apply(&web, &second));
    let a = a.expect("first writer succeeds within budget");
    let b = b.expect("second writer succeeds within budget");

    let stored = external_name(&inner, &web).await.unwrap();
    assert!(
        stored == "10.0.0.1" || stored == "10.0.0.2",
        "stored value must be one of the two addresses, got {:?}",
        stored
    );

    assert!(a.attempts <= 5 && b.attempts <= 5);
    assert!(store.conflicts() >= 1, "the race should have produced a conflict");
    assert!(store.update_calls() <= 10);

    // Every accepted write moved the version forward exactly once.
    let accepted = store.update_calls() - store.conflicts();
    assert_eq!(accepted, 2);
    assert_eq!(inner.version(&web).await.as_deref(), Some("3"));
}

#[tokio::test]
async fn many_racing_writers_each_stay_within_budget() {
    let (inner, web) = seeded_store("web", "old-ip").await;
    let store = CountingStore::new(inner.clone()).with_read_latency(Duration::from_millis(2));
    let updater = updater_over(Arc::new(store.clone()), 3);

    let mut handles = Vec::new();
    for i in 1..=6u8 {
        let updater = updater.clone();
        let web = web.clone();
        handles.push(tokio::spawn(async move {
            let addr = validate(&format!("10.0.0.{}", i)).unwrap();
            updater.apply(&web, &addr).await
        }));
    }

    let mut successes = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(applied) => {
                assert!(applied.attempts <= 3);
                successes.push(applied.address.to_string());
            }
            Err(extname_core::Error::ExhaustedRetries { attempts, .. }) => assert_eq!(attempts, 3),
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert!(store.update_calls() <= 6 * 3);
    assert!(!successes.is_empty());

    let stored = external_name(&inner, &web).await.unwrap();
    assert!(
        successes.contains(&stored),
        "stored {:?} must be an address some writer applied ({:?})",
        stored,
        successes
    );
}

//! Concurrent callers share one refresh.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::*;
use envelope_session::{AuthBackendError, SessionError};
use futures::future::join_all;

#[tokio::test(start_paused = true)]
async fn test_expired_concurrent_callers_share_one_refresh() {
    let h = harness(ScriptedBackend::with_delay(Duration::from_millis(50)));
    h.backend.push_grant("fresh");
    h.session
        .set_credential(Some(credential("stale", -10)))
        .await
        .unwrap();

    let calls = (0..32).map(|_| h.session.ensure_valid_credential());
    let results = join_all(calls).await;

    assert_eq!(h.backend.refresh_calls(), 1);
    for result in results {
        assert_eq!(result.unwrap().access_token, "fresh");
    }
    assert!(!h.session.is_refreshing());
    assert_eq!(h.store.peek(KEY).unwrap().access_token, "fresh");
}

#[tokio::test(start_paused = true)]
async fn test_expired_concurrent_callers_share_one_failure() {
    let h = harness(ScriptedBackend::with_delay(Duration::from_millis(50)));
    h.backend
        .push(Err(AuthBackendError::Rejected("invalid_grant".into())));
    h.session
        .set_credential(Some(credential("stale", -10)))
        .await
        .unwrap();

    let signed_out = Arc::new(AtomicUsize::new(0));
    let counter = signed_out.clone();
    let _sub = h.session.on_session_change(move |c| {
        if c.is_none() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let results = join_all((0..8).map(|_| h.session.ensure_valid_credential())).await;

    assert_eq!(h.backend.refresh_calls(), 1);
    let first = results[0].clone().unwrap_err();
    assert!(matches!(first, SessionError::SessionExpired(_)));
    for result in results {
        assert_eq!(result.unwrap_err(), first);
    }

    assert_eq!(signed_out.load(Ordering::SeqCst), 1);
    assert!(h.session.current_credential().is_none());
    assert!(h.store.peek(KEY).is_none());
    assert!(!h.session.is_refreshing());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_across_worker_threads() {
    let h = harness(ScriptedBackend::with_delay(Duration::from_millis(50)));
    h.backend.push_grant("fresh");
    h.session
        .set_credential(Some(credential("stale", -10)))
        .await
        .unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let session = h.session.clone();
            tokio::spawn(async move { session.ensure_valid_credential().await })
        })
        .collect();

    for handle in handles {
        let credential = handle.await.unwrap().unwrap();
        assert_eq!(credential.access_token, "fresh");
    }
    assert_eq!(h.backend.refresh_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_waiters_do_not_cancel_refresh() {
    let h = harness(ScriptedBackend::with_delay(Duration::from_millis(50)));
    h.backend.push_grant("fresh");
    h.session
        .set_credential(Some(credential("stale", -10)))
        .await
        .unwrap();

    // Give up on the call before the refresh completes.
    let timed_out =
        tokio::time::timeout(Duration::from_millis(10), h.session.ensure_valid_credential()).await;
    assert!(timed_out.is_err());
    assert!(h.session.is_refreshing());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!h.session.is_refreshing());
    assert_eq!(h.session.current_credential().unwrap().access_token, "fresh");
    assert_eq!(h.backend.refresh_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_refreshes_each_call_backend() {
    let h = harness(ScriptedBackend::new());
    h.backend.push_grant("second");
    h.backend.push_grant("third");
    h.session
        .set_credential(Some(credential("first", 3600)))
        .await
        .unwrap();

    assert_eq!(h.session.refresh_now().await.unwrap().access_token, "second");
    assert_eq!(h.session.refresh_now().await.unwrap().access_token, "third");
    assert_eq!(h.backend.refresh_calls(), 2);
}

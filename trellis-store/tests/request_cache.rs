//! Request coordination: caching, coalescing, refresh, abort and ordering.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use trellis_core::{RequestError, StoreError};
use trellis_store::{
    DocumentChange, Notification, RequestInput, Store, StoreConfig,
};
use trellis_test_utils::{
    comment, eventually, init_tracing, post, post_with_comments, reference, social_schema, user,
    NormalizedPayload, RecordingLifecycle, ScriptedHandler, StubPolicy,
};

fn store(handler: &Arc<ScriptedHandler>) -> Store {
    init_tracing();
    Store::builder(social_schema(), handler.clone())
        .build()
        .unwrap()
}

fn store_with_policy(handler: &Arc<ScriptedHandler>, policy: &Arc<StubPolicy>) -> Store {
    init_tracing();
    Store::builder(social_schema(), handler.clone())
        .with_policy(policy.clone())
        .build()
        .unwrap()
}

fn name_of(store: &Store, id: &str) -> Option<serde_json::Value> {
    let key = store.peek_resource(&reference("user", id))?;
    store.attribute(&key, "name")
}

#[tokio::test]
async fn test_fresh_document_served_from_cache() {
    let handler = Arc::new(ScriptedHandler::new());
    let input = RequestInput::find_record("post", "1");
    handler.respond(input.fingerprint(), NormalizedPayload::single(post("1", "Hello")));
    let store = store(&handler);

    let first = store.request(input.clone()).await.unwrap();
    let second = store.request(input.clone()).await.unwrap();

    assert_eq!(handler.calls(), 1);
    assert_eq!(first.request_key, second.request_key);
    assert_eq!(
        first.data().unwrap().data.as_single(),
        second.data().unwrap().data.as_single()
    );
    let stats = store.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_reads_share_one_fetch() {
    let handler = Arc::new(ScriptedHandler::gated());
    let input = RequestInput::find_record("user", "1");
    handler.respond(input.fingerprint(), NormalizedPayload::single(user("1", "Ada")));
    let store = store(&handler);

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let store = store.clone();
        let input = input.clone();
        tasks.push(tokio::spawn(async move { store.request(input).await }));
    }
    eventually(|| store.stats().coalesced + store.stats().misses == 5).await;
    handler.release(1);

    let expected = store.resolve(&reference("user", "1")).unwrap();
    for task in tasks {
        let document = task.await.unwrap().unwrap();
        assert_eq!(document.data().unwrap().data.as_single(), Some(&expected));
    }
    assert_eq!(handler.calls(), 1);
    assert_eq!(store.stats().coalesced, 4);
}

#[tokio::test]
async fn test_resolved_document_is_already_merged() {
    let handler = Arc::new(ScriptedHandler::new());
    let input = RequestInput::find_record("post", "1");
    handler.respond(
        input.fingerprint(),
        NormalizedPayload::single(post_with_comments("1", "Hello", &["10", "11"]))
            .with_included(vec![comment("10", "first"), comment("11", "second")]),
    );
    let store = store(&handler);

    let document = store.request(input).await.unwrap();
    let post_key = document.data().unwrap().data.as_single().cloned().unwrap();
    assert_eq!(store.attribute(&post_key, "title"), Some(json!("Hello")));

    let comments = store.related(&post_key, "comments").unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(store.related(&comments[0], "post").unwrap(), vec![post_key]);
}

#[tokio::test]
async fn test_reload_bypasses_fresh_cache() {
    let handler = Arc::new(ScriptedHandler::new());
    let input = RequestInput::find_record("user", "1");
    handler
        .respond(input.fingerprint(), NormalizedPayload::single(user("1", "Ada")))
        .respond(input.fingerprint(), NormalizedPayload::single(user("1", "Grace")));
    let store = store(&handler);

    store.request(input.clone()).await.unwrap();
    store.request(input.clone().reload()).await.unwrap();

    assert_eq!(handler.calls(), 2);
    assert_eq!(name_of(&store, "1"), Some(json!("Grace")));
}

#[tokio::test]
async fn test_hard_expired_document_blocks_on_fetch() {
    let handler = Arc::new(ScriptedHandler::new());
    let policy = Arc::new(StubPolicy::new());
    let input = RequestInput::find_all("user");
    handler
        .respond(input.fingerprint(), NormalizedPayload::collection(vec![user("1", "Ada")]))
        .respond(
            input.fingerprint(),
            NormalizedPayload::collection(vec![user("1", "Ada"), user("2", "Grace")]),
        );
    let store = store_with_policy(&handler, &policy);

    store.request(input.clone()).await.unwrap();
    policy.set_hard_expired(true);
    let document = store.request(input).await.unwrap();

    assert_eq!(handler.calls(), 2);
    assert_eq!(document.resources().len(), 2);
}

#[tokio::test]
async fn test_soft_expired_document_refreshes_in_background() {
    let handler = Arc::new(ScriptedHandler::new());
    let policy = Arc::new(StubPolicy::new());
    let input = RequestInput::find_record("user", "1");
    handler
        .respond(input.fingerprint(), NormalizedPayload::single(user("1", "Ada")))
        .respond(input.fingerprint(), NormalizedPayload::single(user("1", "Grace")));
    let store = store_with_policy(&handler, &policy);

    store.request(input.clone()).await.unwrap();
    policy.set_soft_expired(true);
    let stale = store.request(input.clone()).await.unwrap();
    assert!(!stale.is_error());

    eventually(|| name_of(&store, "1") == Some(json!("Grace"))).await;
    assert_eq!(handler.calls(), 2);
    assert_eq!(store.stats().background_refreshes, 1);
}

#[tokio::test]
async fn test_background_reload_option() {
    let handler = Arc::new(ScriptedHandler::new());
    let input = RequestInput::find_record("user", "1");
    handler
        .respond(input.fingerprint(), NormalizedPayload::single(user("1", "Ada")))
        .respond(input.fingerprint(), NormalizedPayload::single(user("1", "Grace")));
    let store = store(&handler);

    store.request(input.clone()).await.unwrap();
    store.request(input.clone().background_reload()).await.unwrap();

    eventually(|| handler.calls() == 2).await;
    eventually(|| name_of(&store, "1") == Some(json!("Grace"))).await;
}

#[tokio::test]
async fn test_failed_fetch_cached_as_error_document() {
    let handler = Arc::new(ScriptedHandler::new());
    let good = RequestInput::find_record("post", "1");
    let bad = RequestInput::find_record("post", "2");
    handler.respond(good.fingerprint(), NormalizedPayload::single(post("1", "Hello")));
    handler.fail(bad.fingerprint(), 503, "unavailable");
    let store = store(&handler);

    store.request(good.clone()).await.unwrap();
    let err = store.request(bad.clone()).await.unwrap_err();
    assert!(err.is_fetch());

    let cached = store.peek_request(&bad.fingerprint()).unwrap();
    assert!(cached.is_error());
    assert!(!store.peek_request(&good.fingerprint()).unwrap().is_error());

    // The fresh error document answers the next request without a fetch.
    let again = store.request(bad).await.unwrap_err();
    assert_eq!(again, err);
    assert_eq!(handler.calls(), 2);
    assert_eq!(store.stats().errors, 1);
}

#[tokio::test]
async fn test_failed_background_refresh_keeps_document() {
    let handler = Arc::new(ScriptedHandler::new());
    let policy = Arc::new(StubPolicy::new());
    let input = RequestInput::find_record("user", "1");
    handler
        .respond(input.fingerprint(), NormalizedPayload::single(user("1", "Ada")))
        .fail(input.fingerprint(), 500, "boom");
    let store = store_with_policy(&handler, &policy);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    store.subscribe(move |notification| sink.lock().unwrap().push(notification.clone()));

    store.request(input.clone()).await.unwrap();
    policy.set_soft_expired(true);
    let served = store.request(input.clone()).await.unwrap();
    assert!(!served.is_error());

    let key = input.fingerprint();
    eventually(|| {
        seen.lock().unwrap().contains(&Notification::Document {
            request_key: key.clone(),
            change: DocumentChange::RefreshFailed,
        })
    })
    .await;
    assert!(!store.peek_request(&key).unwrap().is_error());
    assert_eq!(name_of(&store, "1"), Some(json!("Ada")));
}

#[tokio::test]
async fn test_sole_waiter_abort_leaves_cache_untouched() {
    let handler = Arc::new(ScriptedHandler::gated());
    let input = RequestInput::find_record("user", "1");
    handler.respond(input.fingerprint(), NormalizedPayload::single(user("1", "Ada")));
    let store = store(&handler);
    let cancel = CancellationToken::new();

    let task = tokio::spawn({
        let store = store.clone();
        let input = input.clone().with_cancel(cancel.clone());
        async move { store.request(input).await }
    });
    eventually(|| handler.calls() == 1).await;
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_abort());
    assert_eq!(store.in_flight(), 0);

    handler.release(1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(handler.completed(), 0);
    assert!(store.peek_request(&input.fingerprint()).is_none());
    assert!(store.peek_resource(&reference("user", "1")).is_none());
}

#[tokio::test]
async fn test_shared_waiter_abort_keeps_fetch_running() {
    let handler = Arc::new(ScriptedHandler::gated());
    let input = RequestInput::find_record("user", "1");
    handler.respond(input.fingerprint(), NormalizedPayload::single(user("1", "Ada")));
    let store = store(&handler);
    let cancel = CancellationToken::new();

    let aborting = tokio::spawn({
        let store = store.clone();
        let input = input.clone().with_cancel(cancel.clone());
        async move { store.request(input).await }
    });
    eventually(|| handler.calls() == 1).await;
    let patient = tokio::spawn({
        let store = store.clone();
        let input = input.clone();
        async move { store.request(input).await }
    });
    eventually(|| store.stats().coalesced == 1).await;

    cancel.cancel();
    assert!(aborting.await.unwrap().unwrap_err().is_abort());

    handler.release(1);
    let document = patient.await.unwrap().unwrap();
    assert!(!document.is_error());
    assert_eq!(handler.calls(), 1);
    assert_eq!(handler.completed(), 1);
    assert!(store.peek_request(&input.fingerprint()).is_some());
}

#[tokio::test]
async fn test_already_cancelled_request_never_fetches() {
    let handler = Arc::new(ScriptedHandler::new());
    let store = store(&handler);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = store
        .request(RequestInput::find_all("post").with_cancel(cancel))
        .await
        .unwrap_err();
    assert!(err.is_abort());
    assert_eq!(handler.calls(), 0);
}

#[tokio::test]
async fn test_older_save_response_is_superseded() {
    let handler = Arc::new(ScriptedHandler::new());
    let store = store(&handler);
    let key = store
        .push(&NormalizedPayload::single(user("1", "Ada")))
        .unwrap()
        .remove(0);
    let save = RequestInput::update_record(&key);
    handler
        .respond_after(
            save.fingerprint(),
            Duration::from_millis(100),
            NormalizedPayload::single(user("1", "Old")),
        )
        .respond(save.fingerprint(), NormalizedPayload::single(user("1", "New")));

    let older = tokio::spawn({
        let store = store.clone();
        let save = save.clone();
        async move { store.request(save).await }
    });
    eventually(|| handler.calls() == 1).await;
    store.request(save.clone()).await.unwrap();

    let err = older.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        StoreError::Request(RequestError::Superseded { .. })
    ));
    assert_eq!(handler.calls(), 2);
    assert_eq!(store.attribute(&key, "name"), Some(json!("New")));
}

#[tokio::test]
async fn test_deduped_saves_share_one_fetch() {
    let handler = Arc::new(ScriptedHandler::gated());
    let store = store(&handler);
    let key = store
        .push(&NormalizedPayload::single(user("1", "Ada")))
        .unwrap()
        .remove(0);
    let save = RequestInput::update_record(&key).dedupe();
    handler.respond(save.fingerprint(), NormalizedPayload::single(user("1", "Ada")));

    let first = tokio::spawn({
        let store = store.clone();
        let save = save.clone();
        async move { store.request(save).await }
    });
    eventually(|| handler.calls() == 1).await;
    let second = tokio::spawn({
        let store = store.clone();
        let save = save.clone();
        async move { store.request(save).await }
    });
    eventually(|| store.stats().coalesced == 1).await;
    handler.release(1);

    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn test_store_wide_mutation_dedupe() {
    let handler = Arc::new(ScriptedHandler::gated());
    init_tracing();
    let store = Store::builder(social_schema(), handler.clone())
        .with_config(StoreConfig::new().with_dedupe_mutations(true))
        .build()
        .unwrap();
    let key = store
        .push(&NormalizedPayload::single(user("1", "Ada")))
        .unwrap()
        .remove(0);
    let save = RequestInput::update_record(&key);
    handler.respond(save.fingerprint(), NormalizedPayload::single(user("1", "Ada")));

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let store = store.clone();
            let save = save.clone();
            tokio::spawn(async move { store.request(save).await })
        })
        .collect();
    eventually(|| store.stats().coalesced == 2).await;
    handler.release(1);
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn test_lifecycle_hooks_wrap_each_fetch() {
    let handler = Arc::new(ScriptedHandler::new());
    let lifecycle = Arc::new(RecordingLifecycle::new());
    let policy = Arc::new(StubPolicy::with_lifecycle(lifecycle.clone()));
    let ok = RequestInput::find_record("user", "1");
    let missing = RequestInput::find_record("user", "404");
    handler.respond(ok.fingerprint(), NormalizedPayload::single(user("1", "Ada")));
    let store = store_with_policy(&handler, &policy);

    store.request(ok.clone()).await.unwrap();
    store.request(missing.clone()).await.unwrap_err();

    assert_eq!(
        lifecycle.events(),
        vec![
            format!("will:{}", ok.fingerprint()),
            format!("did:{}:ok", ok.fingerprint()),
            format!("will:{}", missing.fingerprint()),
            format!("did:{}:err", missing.fingerprint()),
        ]
    );
}

#[tokio::test]
async fn test_invalidate_forces_refetch() {
    let handler = Arc::new(ScriptedHandler::new());
    let input = RequestInput::find_all("post");
    handler.respond(input.fingerprint(), NormalizedPayload::collection(vec![post("1", "a")]));
    let store = store(&handler);

    store.request(input.clone()).await.unwrap();
    assert!(store.invalidate(&input.fingerprint()));
    assert!(store.peek_request(&input.fingerprint()).is_none());
    store.request(input).await.unwrap();
    assert_eq!(handler.calls(), 2);
}

#[tokio::test]
async fn test_notifications_delivered_after_flush() {
    let handler = Arc::new(ScriptedHandler::new());
    let input = RequestInput::find_record("post", "1");
    handler.respond(input.fingerprint(), NormalizedPayload::single(post("1", "Hello")));
    let store = store(&handler);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let reader = store.clone();
    let id = store.subscribe(move |notification| {
        // Subscribers may read the store; the lock is already released.
        if let Notification::Document { request_key, .. } = notification {
            assert!(reader.peek_request(request_key).is_some());
        }
        sink.lock().unwrap().push(notification.clone());
    });

    store.request(input.clone()).await.unwrap();
    assert!(seen.lock().unwrap().contains(&Notification::Document {
        request_key: input.fingerprint(),
        change: DocumentChange::Added,
    }));

    assert!(store.unsubscribe(id));
    let before = seen.lock().unwrap().len();
    store.invalidate_type("post");
    assert_eq!(seen.lock().unwrap().len(), before);
}

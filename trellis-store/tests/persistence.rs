//! Seeding the in-memory cache from a persisted cache.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use trellis_store::{InMemoryPersistedCache, RequestInput, Store};
use trellis_test_utils::{
    comment, init_tracing, post_with_comments, reference, social_schema, user,
    NormalizedPayload, ScriptedHandler,
};

fn store(handler: &Arc<ScriptedHandler>, persisted: &Arc<InMemoryPersistedCache>) -> Store {
    init_tracing();
    Store::builder(social_schema(), handler.clone())
        .with_persisted_cache(persisted.clone())
        .build()
        .unwrap()
}

async fn wait_for_documents(persisted: &InMemoryPersistedCache, count: usize) {
    for _ in 0..2_000 {
        if persisted.document_count().await >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("persisted cache never received {count} documents");
}

#[tokio::test]
async fn test_second_store_seeds_from_persisted_cache() {
    let persisted = Arc::new(InMemoryPersistedCache::new());
    let input = RequestInput::find_record("post", "1");

    let online = Arc::new(ScriptedHandler::new());
    online.respond(
        input.fingerprint(),
        NormalizedPayload::single(post_with_comments("1", "Hello", &["10", "11"]))
            .with_included(vec![comment("10", "first"), comment("11", "second")]),
    );
    store(&online, &persisted).request(input.clone()).await.unwrap();
    wait_for_documents(&persisted, 1).await;

    let offline = Arc::new(ScriptedHandler::new());
    let restored = store(&offline, &persisted);
    let document = restored.request(input.clone()).await.unwrap();

    assert_eq!(offline.calls(), 0);
    let post = document.data().unwrap().data.as_single().cloned().unwrap();
    assert_eq!(post.id(), Some("1"));
    assert_eq!(restored.attribute(&post, "title"), Some(json!("Hello")));
    let comments = restored.related(&post, "comments").unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(restored.related(&comments[1], "post").unwrap(), vec![post]);
    assert_eq!(restored.stats().hits, 1);
}

#[tokio::test]
async fn test_known_resources_are_not_overwritten() {
    let persisted = Arc::new(InMemoryPersistedCache::new());
    let input = RequestInput::find_record("user", "1");

    let online = Arc::new(ScriptedHandler::new());
    online.respond(input.fingerprint(), NormalizedPayload::single(user("1", "Stale")));
    store(&online, &persisted).request(input.clone()).await.unwrap();
    wait_for_documents(&persisted, 1).await;

    let offline = Arc::new(ScriptedHandler::new());
    let restored = store(&offline, &persisted);
    restored
        .push(&NormalizedPayload::single(user("1", "Current")))
        .unwrap();
    let document = restored.request(input).await.unwrap();

    let key = restored.peek_resource(&reference("user", "1")).unwrap();
    assert_eq!(document.data().unwrap().data.as_single(), Some(&key));
    assert_eq!(restored.attribute(&key, "name"), Some(json!("Current")));
    assert_eq!(offline.calls(), 0);
}

#[tokio::test]
async fn test_reload_skips_persisted_cache() {
    let persisted = Arc::new(InMemoryPersistedCache::new());
    let input = RequestInput::find_all("user");

    let online = Arc::new(ScriptedHandler::new());
    online.respond(input.fingerprint(), NormalizedPayload::collection(vec![user("1", "Ada")]));
    store(&online, &persisted).request(input.clone()).await.unwrap();
    wait_for_documents(&persisted, 1).await;

    let second = Arc::new(ScriptedHandler::new());
    second.respond(input.fingerprint(), NormalizedPayload::collection(vec![]));
    let restored = store(&second, &persisted);
    let document = restored.request(input.reload()).await.unwrap();

    assert_eq!(second.calls(), 1);
    assert!(document.resources().is_empty());
}

#[tokio::test]
async fn test_failed_requests_are_not_persisted() {
    let persisted = Arc::new(InMemoryPersistedCache::new());
    let input = RequestInput::find_record("user", "404");
    let handler = Arc::new(ScriptedHandler::new());
    let store = store(&handler, &persisted);

    assert!(store.request(input).await.is_err());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(persisted.document_count().await, 0);
}

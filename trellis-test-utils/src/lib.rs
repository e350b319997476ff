//! Trellis Test Utilities
//!
//! Shared test infrastructure for the Trellis workspace:
//! - A social-network schema fixture and record builders
//! - A scripted [`RequestHandler`] with call counting, gating and cancellation
//! - A switchable cache policy and a recording lifecycle
//! - Proptest generators
//! - Test-friendly tracing setup

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

pub use trellis_cache::{
    CachePolicy, CachedDocument, RequestHandler, RequestInput, RequestKey, RequestLifecycle,
};
pub use trellis_core::{
    NormalizedPayload, RelationshipData, RequestError, ResourceRecord, ResourceReference, Schema,
    StaticSchema,
};

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-writer subscriber once per process. Honors `RUST_LOG`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds, panicking after roughly two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}

// ============================================================================
// SCHEMA FIXTURE
// ============================================================================

/// Schema used across the store tests.
///
/// - `user.friends` <-> `user.friends` (self-inverse to-many)
/// - `user.bestFriend` -> `user` (no inverse)
/// - `user.posts` <-> `post.author` (one-to-many)
/// - `post.comments` <-> `comment.post` (one-to-many)
/// - `user.profile` <-> `profile.user` (one-to-one)
pub fn social_schema() -> Arc<dyn Schema> {
    let schema = StaticSchema::builder()
        .to_many("user", "friends", "user", Some("friends"))
        .to_one("user", "bestFriend", "user", None)
        .to_many("user", "posts", "post", Some("author"))
        .to_one("post", "author", "user", Some("posts"))
        .to_many("post", "comments", "comment", Some("post"))
        .to_one("comment", "post", "post", Some("comments"))
        .to_one("user", "profile", "profile", Some("user"))
        .to_one("profile", "user", "user", Some("profile"))
        .build()
        .expect("social schema is valid");
    Arc::new(schema)
}

// ============================================================================
// RECORD BUILDERS
// ============================================================================

pub fn reference(resource_type: &str, id: &str) -> ResourceReference {
    ResourceReference::new(resource_type, id)
}

pub fn refs(resource_type: &str, ids: &[&str]) -> Vec<ResourceReference> {
    ids.iter().map(|id| reference(resource_type, id)).collect()
}

pub fn user(id: &str, name: &str) -> ResourceRecord {
    ResourceRecord::new("user", id).with_attribute("name", json!(name))
}

pub fn post(id: &str, title: &str) -> ResourceRecord {
    ResourceRecord::new("post", id).with_attribute("title", json!(title))
}

pub fn comment(id: &str, body: &str) -> ResourceRecord {
    ResourceRecord::new("comment", id).with_attribute("body", json!(body))
}

/// `user` with `friends` set to the given user ids.
pub fn user_with_friends(id: &str, name: &str, friends: &[&str]) -> ResourceRecord {
    user(id, name).with_relationship("friends", RelationshipData::to_many(refs("user", friends)))
}

/// `post` with `comments` set to the given comment ids.
pub fn post_with_comments(id: &str, title: &str, comments: &[&str]) -> ResourceRecord {
    post(id, title).with_relationship(
        "comments",
        RelationshipData::to_many(refs("comment", comments)),
    )
}

// ============================================================================
// SCRIPTED HANDLER
// ============================================================================

#[derive(Debug, Clone)]
struct Scripted {
    result: Result<NormalizedPayload, RequestError>,
    delay: Option<Duration>,
}

/// [`RequestHandler`] answering from per-request-key scripts.
///
/// Each key holds a queue of responses; the last response repeats. Keys
/// without a script fail with a 404 fetch error. When gated, every fetch
/// waits for a permit from [`release`](Self::release) or for cancellation.
#[derive(Debug, Default)]
pub struct ScriptedHandler {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: AtomicUsize,
    calls_by_key: Mutex<HashMap<String, usize>>,
    cancellations: AtomicUsize,
    completed: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every fetch until [`release`](Self::release) is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    /// Let `count` gated fetches proceed.
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    pub fn respond(&self, key: impl ToString, payload: NormalizedPayload) -> &Self {
        self.push(key, Ok(payload), None)
    }

    pub fn respond_after(
        &self,
        key: impl ToString,
        delay: Duration,
        payload: NormalizedPayload,
    ) -> &Self {
        self.push(key, Ok(payload), Some(delay))
    }

    pub fn fail(&self, key: impl ToString, status: u16, message: &str) -> &Self {
        let key = key.to_string();
        let error = RequestError::Fetch {
            request_key: key.clone(),
            status: Some(status),
            message: message.to_string(),
        };
        self.push(key, Err(error), None)
    }

    fn push(
        &self,
        key: impl ToString,
        result: Result<NormalizedPayload, RequestError>,
        delay: Option<Duration>,
    ) -> &Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .push_back(Scripted { result, delay });
        self
    }

    /// Total fetches started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, key: impl ToString) -> usize {
        self.calls_by_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key.to_string())
            .copied()
            .unwrap_or(0)
    }

    /// Fetches that observed their cancellation token.
    pub fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    /// Fetches that ran to the end and returned their scripted result.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    fn next(&self, key: &str) -> Option<Scripted> {
        let mut scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = scripts.get_mut(key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    fn aborted(&self, key: &str) -> RequestError {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
        RequestError::Aborted {
            request_key: key.to_string(),
        }
    }
}

#[async_trait]
impl RequestHandler for ScriptedHandler {
    async fn fetch(
        &self,
        request: &RequestInput,
        cancel: CancellationToken,
    ) -> Result<NormalizedPayload, RequestError> {
        let key = request.fingerprint().to_string();
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_by_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default() += 1;
        let scripted = self.next(&key);

        if let Some(gate) = &self.gate {
            tokio::select! {
                permit = gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
                _ = cancel.cancelled() => return Err(self.aborted(&key)),
            }
        }

        let Some(scripted) = scripted else {
            return Err(RequestError::Fetch {
                request_key: key,
                status: Some(404),
                message: "no scripted response".to_string(),
            });
        };
        if let Some(delay) = scripted.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(self.aborted(&key)),
            }
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        scripted.result
    }
}

// ============================================================================
// POLICY AND LIFECYCLE
// ============================================================================

/// Cache policy whose verdicts are flipped by the test.
#[derive(Debug, Default)]
pub struct StubPolicy {
    hard: AtomicBool,
    soft: AtomicBool,
    lifecycle: Option<Arc<RecordingLifecycle>>,
}

impl StubPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lifecycle(lifecycle: Arc<RecordingLifecycle>) -> Self {
        Self {
            lifecycle: Some(lifecycle),
            ..Self::default()
        }
    }

    pub fn set_hard_expired(&self, expired: bool) {
        self.hard.store(expired, Ordering::SeqCst);
    }

    pub fn set_soft_expired(&self, expired: bool) {
        self.soft.store(expired, Ordering::SeqCst);
    }
}

impl CachePolicy for StubPolicy {
    fn is_hard_expired(&self, _key: &RequestKey, document: &CachedDocument) -> bool {
        document.invalidated || self.hard.load(Ordering::SeqCst)
    }

    fn is_soft_expired(&self, _key: &RequestKey, _document: &CachedDocument) -> bool {
        self.soft.load(Ordering::SeqCst)
    }

    fn lifecycle(&self) -> Option<Arc<dyn RequestLifecycle>> {
        self.lifecycle
            .clone()
            .map(|lifecycle| lifecycle as Arc<dyn RequestLifecycle>)
    }
}

/// Lifecycle that records `will:<key>` / `did:<key>:<ok|err>` events.
#[derive(Debug, Default)]
pub struct RecordingLifecycle {
    events: Mutex<Vec<String>>,
}

impl RecordingLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, event: String) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl RequestLifecycle for RecordingLifecycle {
    fn will_request(&self, key: &RequestKey, _input: &RequestInput) {
        self.record(format!("will:{}", key));
    }

    fn did_request(&self, key: &RequestKey, result: Result<(), &RequestError>) {
        let outcome = if result.is_ok() { "ok" } else { "err" };
        self.record(format!("did:{}:{}", key, outcome));
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

/// Short numeric resource ids.
pub fn arb_id() -> impl Strategy<Value = String> {
    (1u32..50).prop_map(|n| n.to_string())
}

/// Distinct ids, in generation order.
pub fn arb_distinct_ids(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set(arb_id(), 0..=max).prop_map(|ids| ids.into_iter().collect())
}

/// Flat attribute bags of strings, numbers and booleans.
pub fn arb_attributes() -> impl Strategy<Value = serde_json::Map<String, Value>> {
    let value = prop_oneof![
        "[a-z]{0,8}".prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
    ];
    prop::collection::btree_map("[a-z]{1,6}", value, 0..5)
        .prop_map(|attrs| attrs.into_iter().collect())
}

/// A to-many edit described by positions into a pool of candidate members.
#[derive(Debug, Clone)]
pub enum MemberOp {
    Push(Vec<usize>),
    Insert(usize, Vec<usize>),
    Splice(usize, usize, Vec<usize>),
    Remove(Vec<usize>),
    Replace(Vec<usize>),
}

/// Edits over a pool of `pool` candidates; indexes may exceed the current
/// length, so callers clamp or expect `IndexOutOfBounds`.
pub fn arb_member_op(pool: usize) -> impl Strategy<Value = MemberOp> {
    let members = prop::collection::vec(0..pool, 0..4);
    prop_oneof![
        members.clone().prop_map(MemberOp::Push),
        (0usize..6, members.clone()).prop_map(|(at, m)| MemberOp::Insert(at, m)),
        (0usize..6, 0usize..4, members.clone()).prop_map(|(s, d, m)| MemberOp::Splice(s, d, m)),
        members.clone().prop_map(MemberOp::Remove),
        members.prop_map(MemberOp::Replace),
    ]
}

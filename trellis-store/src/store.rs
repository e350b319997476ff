//! The store façade: request coordination over the shared state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};
use trellis_cache::{
    decide, CacheDecision, CachePolicy, CacheStats, CachedDocument, LifecycleHooks,
    PersistedCache, RequestHandler, RequestInput, RequestKey, TtlCachePolicy,
};
use trellis_core::{
    Attributes, NormalizedPayload, RequestError, ResourceReference, Schema, StoreConfig,
    StoreError, StoreResult,
};
use trellis_graph::{MutationOutcome, RelationshipState, ToManyOperation};
use trellis_identity::ResourceKey;

use crate::fetch::{Completion, Started, Ticket};
use crate::flush::{Flush, PersistJob, StoreState};
use crate::notify::{Notification, Subscribers, SubscriptionId};

/// Builder for [`Store`].
pub struct StoreBuilder {
    schema: Arc<dyn Schema>,
    handler: Arc<dyn RequestHandler>,
    config: StoreConfig,
    policy: Option<Arc<dyn CachePolicy>>,
    persisted: Option<Arc<dyn PersistedCache>>,
}

impl StoreBuilder {
    pub fn new(schema: Arc<dyn Schema>, handler: Arc<dyn RequestHandler>) -> Self {
        Self {
            schema,
            handler,
            config: StoreConfig::new(),
            policy: None,
            persisted: None,
        }
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to a [`TtlCachePolicy`] built from the config.
    pub fn with_policy(mut self, policy: Arc<dyn CachePolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_persisted_cache(mut self, persisted: Arc<dyn PersistedCache>) -> Self {
        self.persisted = Some(persisted);
        self
    }

    pub fn build(self) -> StoreResult<Store> {
        self.config.validate()?;
        let policy: Arc<dyn CachePolicy> = match self.policy {
            Some(policy) => policy,
            None => Arc::new(TtlCachePolicy::from_config(&self.config.cache)),
        };
        let hooks = LifecycleHooks::resolve(policy.as_ref());
        tracing::info!(
            duplicates = self.config.duplicates.as_str(),
            soft_expires_ms = self.config.cache.soft_expires_ms,
            hard_expires_ms = self.config.cache.hard_expires_ms,
            lifecycle_hooks = hooks.is_enabled(),
            persisted = self.persisted.is_some(),
            "Store initialized"
        );
        Ok(Store {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState::new(self.schema, &self.config)),
                handler: self.handler,
                policy,
                hooks,
                persisted: self.persisted,
                subscribers: Subscribers::default(),
                config: self.config,
            }),
        })
    }
}

impl std::fmt::Debug for StoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("config", &self.config)
            .field("custom_policy", &self.policy.is_some())
            .field("persisted", &self.persisted.is_some())
            .finish()
    }
}

struct StoreInner {
    state: Mutex<StoreState>,
    config: StoreConfig,
    handler: Arc<dyn RequestHandler>,
    policy: Arc<dyn CachePolicy>,
    /// Resolved once at construction.
    hooks: LifecycleHooks,
    persisted: Option<Arc<dyn PersistedCache>>,
    subscribers: Subscribers,
}

/// Client-side resource store.
///
/// Cheap to clone; clones share state. All synchronous operations go through
/// [`transact`](Self::transact) or the convenience wrappers below. Calling a
/// `Store` method from inside a `transact` closure deadlocks; use the
/// [`Flush`] passed to the closure instead.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

enum Plan {
    Cached(CachedDocument),
    Revalidate(CachedDocument, Option<Started>),
    Wait(Ticket, Option<Started>),
}

impl Store {
    pub fn builder(schema: Arc<dyn Schema>, handler: Arc<dyn RequestHandler>) -> StoreBuilder {
        StoreBuilder::new(schema, handler)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access to the store.
    ///
    /// Notifications raised inside are delivered after the lock is released.
    pub fn transact<R>(&self, f: impl FnOnce(&mut Flush<'_>) -> R) -> R {
        let (result, notifications) = {
            let mut state = self.lock();
            let mut flush = Flush::new(&mut state, &self.inner.config);
            let result = f(&mut flush);
            (result, flush.finish())
        };
        self.inner.subscribers.deliver(&notifications);
        result
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&Notification) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.subscribers.subscribe(Arc::new(callback))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.unsubscribe(id)
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().documents.stats().clone()
    }

    /// Number of fetches currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.lock().fetches.len()
    }

    // ------------------------------------------------------------------
    // Synchronous conveniences
    // ------------------------------------------------------------------

    pub fn resolve(&self, reference: &ResourceReference) -> StoreResult<ResourceKey> {
        self.transact(|flush| flush.resolve(reference))
    }

    pub fn peek_resource(&self, reference: &ResourceReference) -> Option<ResourceKey> {
        self.transact(|flush| flush.peek_resource(reference))
    }

    #[tracing::instrument(skip_all, fields(records = payload.records().count()))]
    pub fn push(&self, payload: &NormalizedPayload) -> StoreResult<Vec<ResourceKey>> {
        self.transact(|flush| flush.push(payload))
    }

    pub fn peek_request(&self, key: &RequestKey) -> Option<CachedDocument> {
        self.transact(|flush| flush.peek_request(key))
    }

    pub fn invalidate(&self, key: &RequestKey) -> bool {
        self.transact(|flush| flush.invalidate(key))
    }

    pub fn invalidate_type(&self, resource_type: &str) -> Vec<RequestKey> {
        self.transact(|flush| flush.invalidate_type(resource_type))
    }

    pub fn unload_resource(&self, key: &ResourceKey) {
        self.transact(|flush| flush.unload_resource(key))
    }

    pub fn create_resource(&self, resource_type: &str, attributes: Attributes) -> ResourceKey {
        self.transact(|flush| flush.create_resource(resource_type, attributes))
    }

    pub fn attribute(&self, key: &ResourceKey, name: &str) -> Option<Value> {
        self.transact(|flush| flush.attribute(key, name))
    }

    pub fn set_attribute(&self, key: &ResourceKey, name: &str, value: Value) {
        self.transact(|flush| flush.set_attribute(key, name, value))
    }

    pub fn relationship(&self, key: &ResourceKey, field: &str) -> StoreResult<RelationshipState> {
        self.transact(|flush| flush.relationship(key, field))
    }

    /// Current local members of `(key, field)`.
    pub fn related(&self, key: &ResourceKey, field: &str) -> StoreResult<Vec<ResourceKey>> {
        self.transact(|flush| flush.related(key, field))
    }

    pub fn mutate_to_many(
        &self,
        key: &ResourceKey,
        field: &str,
        operation: ToManyOperation,
    ) -> StoreResult<MutationOutcome> {
        self.transact(|flush| flush.mutate_to_many(key, field, operation))
    }

    pub fn set_to_one(
        &self,
        key: &ResourceKey,
        field: &str,
        value: Option<ResourceKey>,
    ) -> StoreResult<Option<ResourceKey>> {
        self.transact(|flush| flush.set_to_one(key, field, value))
    }

    pub fn rollback(&self, key: &ResourceKey) -> StoreResult<()> {
        self.transact(|flush| flush.rollback(key))
    }

    pub fn is_dirty(&self, key: &ResourceKey) -> bool {
        self.transact(|flush| flush.is_dirty(key))
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Issue a request through the cache.
    ///
    /// Reads are served from cache when the policy allows, refreshed in the
    /// background when soft expired, and otherwise fetched; concurrent
    /// identical reads share one fetch. Mutations always fetch and only
    /// coalesce when asked to. The returned document is never resolved
    /// before its payload has been merged into the store.
    pub async fn request(&self, input: RequestInput) -> StoreResult<CachedDocument> {
        let key = input.fingerprint();
        let span = info_span!("request", request_key = %key, op = %input.op);
        self.request_keyed(key, input).instrument(span).await
    }

    async fn request_keyed(
        &self,
        key: RequestKey,
        input: RequestInput,
    ) -> StoreResult<CachedDocument> {
        let cancel = input.options.cancel.clone();
        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(aborted(&key));
        }
        if !input.op.is_mutation() && !input.options.reload {
            self.seed_from_persisted(&key).await;
        }

        match self.plan(&key, &input) {
            Plan::Cached(document) => into_result(document),
            Plan::Revalidate(document, started) => {
                if let Some(started) = started {
                    tracing::debug!("Serving cached document, refreshing in background");
                    self.spawn_fetch(key, input, started);
                }
                into_result(document)
            }
            Plan::Wait(ticket, started) => {
                if let Some(started) = started {
                    self.spawn_fetch(key.clone(), input, started);
                }
                self.wait(&key, ticket, cancel).await
            }
        }
    }

    fn plan(&self, key: &RequestKey, input: &RequestInput) -> Plan {
        let mut state = self.lock();
        let mutation = input.op.is_mutation();

        if !mutation {
            let cached = state.documents.peek(key).cloned();
            let decision = decide(self.inner.policy.as_ref(), key, cached.as_ref(), &input.options);
            match (decision, cached) {
                (CacheDecision::Fresh, Some(document)) => {
                    state.documents.stats_mut().hits += 1;
                    return Plan::Cached(document);
                }
                (CacheDecision::Revalidate, Some(document)) => {
                    state.documents.stats_mut().hits += 1;
                    let started = if state.fetches.in_flight(key) {
                        None
                    } else {
                        state.documents.stats_mut().background_refreshes += 1;
                        Some(state.fetches.start_background(key))
                    };
                    return Plan::Revalidate(document, started);
                }
                _ => {}
            }
        }

        let shared = !mutation || input.options.dedupe || self.inner.config.dedupe_mutations;
        if shared {
            if let Some(ticket) = state.fetches.attach(key) {
                state.documents.stats_mut().coalesced += 1;
                tracing::debug!(generation = ticket.generation, "Attached to in-flight fetch");
                return Plan::Wait(ticket, None);
            }
        }
        state.documents.stats_mut().misses += 1;
        let (ticket, started) = state.fetches.start(key, shared);
        Plan::Wait(ticket, Some(started))
    }

    fn spawn_fetch(&self, key: RequestKey, input: RequestInput, started: Started) {
        let store = self.clone();
        let span = info_span!(
            "fetch",
            request_key = %key,
            generation = started.token.generation(),
            background = started.background,
        );
        tokio::spawn(async move { store.run_fetch(key, input, started).await }.instrument(span));
    }

    async fn run_fetch(self, key: RequestKey, input: RequestInput, started: Started) {
        let Started {
            token,
            sender,
            background,
        } = started;

        self.inner.hooks.will_request(&key, &input);
        let result = tokio::select! {
            result = self.inner.handler.fetch(&input, token.transport_token()) => result,
            _ = token.cancelled() => Err(RequestError::Aborted {
                request_key: key.to_string(),
            }),
        };
        self.inner
            .hooks
            .did_request(&key, result.as_ref().map(|_| ()));

        let (outcome, job) = self.transact(|flush| {
            match flush.state.fetches.finish(&key, &token) {
                Completion::Apply => {}
                Completion::Aborted => {
                    tracing::debug!("Fetch aborted before completion; cache untouched");
                    return (Err(aborted(&key)), None);
                }
                Completion::Superseded => {
                    tracing::debug!("Discarding response superseded by a newer request");
                    return (
                        Err(RequestError::Superseded {
                            request_key: key.to_string(),
                        }
                        .into()),
                        None,
                    );
                }
            }
            match result {
                Ok(payload) => match flush.apply_response(&key, &input, payload) {
                    Ok(document) => {
                        let job = if input.op.is_mutation() {
                            None
                        } else {
                            flush.persist_job(&document)
                        };
                        (Ok(document), job)
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "Failed to merge response");
                        (Err(error), None)
                    }
                },
                Err(error) => {
                    tracing::debug!(error = %error, "Fetch failed");
                    (flush.apply_failure(&key, &input, background, error), None)
                }
            }
        });

        sender.send_replace(Some(outcome));
        if let Some(job) = job {
            self.write_persisted(job).await;
        }
    }

    async fn wait(
        &self,
        key: &RequestKey,
        ticket: Ticket,
        cancel: Option<CancellationToken>,
    ) -> StoreResult<CachedDocument> {
        let Ticket {
            generation,
            mut receiver,
        } = ticket;
        let cancel = cancel.unwrap_or_default();
        tokio::select! {
            received = receiver.wait_for(Option::is_some) => match received {
                Ok(value) => (*value).clone().unwrap_or_else(|| Err(lost(key))),
                Err(_) => Err(lost(key)),
            },
            _ = cancel.cancelled() => {
                let cancelled_fetch = self.lock().fetches.detach(generation);
                tracing::debug!(request_key = %key, cancelled_fetch, "Caller aborted");
                Err(aborted(key))
            }
        }
    }

    // ------------------------------------------------------------------
    // Persisted cache
    // ------------------------------------------------------------------

    async fn seed_from_persisted(&self, key: &RequestKey) {
        let Some(persisted) = self.inner.persisted.clone() else {
            return;
        };
        if self.lock().documents.peek(key).is_some() {
            return;
        }
        let document = match persisted.get_document(key).await {
            Ok(Some(document)) => document,
            Ok(None) => return,
            Err(error) => {
                tracing::warn!(request_key = %key, error = %error, "Persisted cache read failed");
                return;
            }
        };
        let records = match persisted.get_resources(&document.data.lids()).await {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!(request_key = %key, error = %error, "Persisted cache read failed");
                return;
            }
        };
        match self.transact(|flush| flush.restore_document(key, document, records)) {
            Ok(true) => tracing::debug!(request_key = %key, "Seeded document from persisted cache"),
            Ok(false) => {}
            Err(error) => {
                tracing::warn!(request_key = %key, error = %error, "Failed to restore persisted document");
            }
        }
    }

    async fn write_persisted(&self, job: PersistJob) {
        let Some(persisted) = self.inner.persisted.as_ref() else {
            return;
        };
        if let Err(error) = persisted
            .put_document(&job.key, job.document, job.resources)
            .await
        {
            tracing::warn!(request_key = %job.key, error = %error, "Persisted cache write failed");
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.inner.config)
            .field("hooks", &self.inner.hooks)
            .finish()
    }
}

fn into_result(document: CachedDocument) -> StoreResult<CachedDocument> {
    match document.error_value() {
        Some(error) => Err(error.clone().into()),
        None => Ok(document),
    }
}

fn aborted(key: &RequestKey) -> StoreError {
    RequestError::Aborted {
        request_key: key.to_string(),
    }
    .into()
}

fn lost(key: &RequestKey) -> StoreError {
    RequestError::Fetch {
        request_key: key.to_string(),
        status: None,
        message: "fetch ended without a result".to_string(),
    }
    .into()
}

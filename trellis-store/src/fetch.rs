//! In-flight fetch bookkeeping.
//!
//! Every fetch gets a generation from a monotonic clock and a cancellation
//! token scoped to that generation. Reads (and opted-in mutations) are
//! shared: at most one fetch per [`RequestKey`] is outstanding and later
//! callers attach to it. A completion is applied only if no later-initiated
//! fetch for the same key has already been applied.

use std::collections::HashMap;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use trellis_cache::{CachedDocument, RequestKey};
use trellis_core::StoreResult;

/// What waiters receive once the fetch has been merged into the store.
pub(crate) type FetchResult = Option<StoreResult<CachedDocument>>;

/// Generation-scoped cancellation token for one fetch.
#[derive(Debug, Clone)]
pub(crate) struct FetchToken {
    generation: u64,
    cancel: CancellationToken,
}

impl FetchToken {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            cancel: CancellationToken::new(),
        }
    }

    pub const fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token handed to the transport.
    pub fn transport_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Held by a caller waiting on a fetch.
pub(crate) struct Ticket {
    pub generation: u64,
    pub receiver: watch::Receiver<FetchResult>,
}

/// Held by the task running a fetch.
pub(crate) struct Started {
    pub token: FetchToken,
    pub sender: watch::Sender<FetchResult>,
    pub background: bool,
}

/// How a finished fetch may be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    Apply,
    /// Every waiter aborted; leave the store untouched.
    Aborted,
    /// A later-initiated fetch for the same key was applied first.
    Superseded,
}

struct InFlight {
    key: RequestKey,
    token: FetchToken,
    receiver: watch::Receiver<FetchResult>,
    waiters: usize,
    background: bool,
}

#[derive(Default)]
pub(crate) struct FetchTable {
    next_generation: u64,
    fetches: HashMap<u64, InFlight>,
    shared: HashMap<RequestKey, u64>,
    applied: HashMap<RequestKey, u64>,
}

impl FetchTable {
    pub fn in_flight(&self, key: &RequestKey) -> bool {
        self.shared.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fetches.len()
    }

    /// Join the shared fetch for `key`, if one is outstanding.
    pub fn attach(&mut self, key: &RequestKey) -> Option<Ticket> {
        let generation = *self.shared.get(key)?;
        let fetch = self.fetches.get_mut(&generation)?;
        fetch.waiters += 1;
        Some(Ticket {
            generation,
            receiver: fetch.receiver.clone(),
        })
    }

    /// Start a fetch with one waiter.
    pub fn start(&mut self, key: &RequestKey, shared: bool) -> (Ticket, Started) {
        let started = self.register(key, shared, false, 1);
        let ticket = Ticket {
            generation: started.token.generation(),
            receiver: started.sender.subscribe(),
        };
        (ticket, started)
    }

    /// Start a shared fetch nobody waits on yet.
    pub fn start_background(&mut self, key: &RequestKey) -> Started {
        self.register(key, true, true, 0)
    }

    fn register(&mut self, key: &RequestKey, shared: bool, background: bool, waiters: usize) -> Started {
        self.next_generation += 1;
        let token = FetchToken::new(self.next_generation);
        let (sender, receiver) = watch::channel(None);
        self.fetches.insert(
            token.generation(),
            InFlight {
                key: key.clone(),
                token: token.clone(),
                receiver,
                waiters,
                background,
            },
        );
        if shared {
            self.shared.insert(key.clone(), token.generation());
        }
        Started {
            token,
            sender,
            background,
        }
    }

    /// A waiter aborted. Returns true when that cancelled the fetch itself.
    ///
    /// Background fetches keep running without waiters.
    pub fn detach(&mut self, generation: u64) -> bool {
        let Some(fetch) = self.fetches.get_mut(&generation) else {
            return false;
        };
        fetch.waiters = fetch.waiters.saturating_sub(1);
        if fetch.waiters > 0 || fetch.background {
            return false;
        }
        fetch.token.cancel();
        if let Some(fetch) = self.fetches.remove(&generation) {
            if self.shared.get(&fetch.key) == Some(&generation) {
                self.shared.remove(&fetch.key);
            }
        }
        true
    }

    /// Retire a fetch and decide whether its result may be applied.
    pub fn finish(&mut self, key: &RequestKey, token: &FetchToken) -> Completion {
        let generation = token.generation();
        self.fetches.remove(&generation);
        if self.shared.get(key) == Some(&generation) {
            self.shared.remove(key);
        }
        let completion = if token.is_cancelled() {
            Completion::Aborted
        } else {
            match self.applied.get(key) {
                Some(&applied) if applied > generation => Completion::Superseded,
                _ => {
                    self.applied.insert(key.clone(), generation);
                    Completion::Apply
                }
            }
        };
        // Ordering only matters between overlapping fetches.
        if !self.fetches.values().any(|fetch| &fetch.key == key) {
            self.applied.remove(key);
        }
        completion
    }

    /// Keys whose applied generation is still tracked.
    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.applied.len()
    }
}

impl std::fmt::Debug for FetchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchTable")
            .field("in_flight", &self.fetches.len())
            .field("next_generation", &self.next_generation)
            .finish()
    }
}

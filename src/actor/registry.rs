//! Map of key → actor task for one process kind.

use super::{Next, Process, Transition};
use crate::error::{Result, SyncError};
use crate::store::StateStore;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

/// One output emitted by the actor for `key`.
pub struct Emitted<P: Process> {
    /// Key of the emitting instance.
    pub key: P::Key,
    /// The emitted output.
    pub output: P::Output,
}

enum Envelope<P: Process> {
    Apply {
        input: P::Input,
        reply: Option<oneshot::Sender<Vec<P::Output>>>,
    },
    Inspect(oneshot::Sender<Option<P>>),
}

type Inbox<P> = mpsc::UnboundedSender<Envelope<P>>;

/// A registered actor. `id` tells a respawned actor apart from its
/// predecessor under the same key.
struct Slot<P: Process> {
    id: u64,
    inbox: Inbox<P>,
}

type Actors<P> = Arc<Mutex<BTreeMap<<P as Process>::Key, Slot<P>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner<P: Process> {
    actors: Actors<P>,
    next_id: AtomicU64,
    policy: Arc<P::Policy>,
    store: Arc<dyn StateStore<P::Key, P>>,
    sink: mpsc::UnboundedSender<Emitted<P>>,
}

/// Registry of per-key actors for process kind `P`.
///
/// Inputs for one key are applied sequentially by that key's task; different
/// keys run in parallel. Sends happen under the registry lock, which is also
/// where an idle actor retires, so no input is ever queued to a retiring
/// actor. Methods that may start an actor must be called from within a tokio
/// runtime.
pub struct ActorRegistry<P: Process> {
    inner: Arc<Inner<P>>,
}

impl<P: Process> Clone for ActorRegistry<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Process> ActorRegistry<P> {
    /// Create an empty registry. Outputs of every actor go to `sink`.
    pub fn new(
        policy: P::Policy,
        store: Arc<dyn StateStore<P::Key, P>>,
        sink: mpsc::UnboundedSender<Emitted<P>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                actors: Arc::new(Mutex::new(BTreeMap::new())),
                next_id: AtomicU64::new(0),
                policy: Arc::new(policy),
                store,
                sink,
            }),
        }
    }

    /// Start an actor for every live key persisted in the store.
    ///
    /// Keys in a final state stay in the store without an actor. Returns the
    /// number of actors started.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the persisted state cannot be listed.
    pub fn restore(&self) -> Result<usize> {
        let persisted = self.inner.store.load_all()?;
        let mut actors = self.actors();
        let mut count = 0;
        for (key, state) in persisted {
            if state.is_final() || actors.contains_key(&key) {
                continue;
            }
            let slot = self.spawn_actor(key.clone(), Some(state));
            actors.insert(key, slot);
            count += 1;
        }
        if count > 0 {
            info!("restored {count} {} actor(s)", P::KIND);
        }
        Ok(count)
    }

    /// Make sure an actor exists for `key`, even before it has state.
    ///
    /// It stays registered until it has processed an input.
    pub fn ensure(&self, key: &P::Key) {
        let mut actors = self.actors();
        if actors.get(key).is_some_and(|slot| !slot.inbox.is_closed()) {
            return;
        }
        let slot = self.spawn_actor(key.clone(), self.load_initial(key));
        actors.insert(key.clone(), slot);
    }

    /// Snapshot of the currently registered keys.
    pub fn keys(&self) -> Vec<P::Key> {
        self.actors().keys().cloned().collect()
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.actors().len()
    }

    /// Returns `true` when no key is registered.
    pub fn is_empty(&self) -> bool {
        self.actors().is_empty()
    }

    /// Queue `input` for `key`, starting its actor if needed.
    pub fn deliver(&self, key: &P::Key, input: P::Input) {
        let envelope = Envelope::Apply { input, reply: None };
        if let Err(e) = self.send(key, envelope) {
            warn!("dropping {} input for {key}: {e}", P::KIND);
        }
    }

    /// Queue one input for every key registered right now.
    ///
    /// The key set is snapshotted before delivery; keys added concurrently
    /// are not included. Returns the number of keys reached.
    pub fn deliver_all(&self, mut make: impl FnMut() -> P::Input) -> usize {
        let keys = self.keys();
        for key in &keys {
            self.deliver(key, make());
        }
        keys.len()
    }

    /// Apply `input` for `key` and wait for the outputs it produced.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Channel`] if the actor stopped before replying.
    pub async fn ask(&self, key: &P::Key, input: P::Input) -> Result<Vec<P::Output>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(
            key,
            Envelope::Apply {
                input,
                reply: Some(reply_tx),
            },
        )?;
        reply_rx
            .await
            .map_err(|_| SyncError::Channel(format!("{} actor {key} dropped its reply", P::KIND)))
    }

    /// Current state for `key`.
    ///
    /// Registered keys are read through their actor; any other key is read
    /// from the store without starting an actor.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Channel`] if the actor stopped before replying.
    pub async fn state(&self, key: &P::Key) -> Result<Option<P>> {
        let pending = {
            let actors = self.actors();
            actors.get(key).and_then(|slot| {
                let (reply_tx, reply_rx) = oneshot::channel();
                slot.inbox
                    .send(Envelope::Inspect(reply_tx))
                    .ok()
                    .map(|()| reply_rx)
            })
        };
        match pending {
            Some(reply_rx) => reply_rx.await.map_err(|_| {
                SyncError::Channel(format!("{} actor {key} dropped its reply", P::KIND))
            }),
            None => self.inner.store.load(key),
        }
    }

    fn actors(&self) -> MutexGuard<'_, BTreeMap<P::Key, Slot<P>>> {
        lock(&self.inner.actors)
    }

    fn send(&self, key: &P::Key, envelope: Envelope<P>) -> Result<()> {
        let mut actors = self.actors();
        let envelope = match actors.get(key) {
            Some(slot) => match slot.inbox.send(envelope) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(envelope)) => {
                    warn!("{} actor {key} stopped, respawning from store", P::KIND);
                    envelope
                }
            },
            None => envelope,
        };

        let slot = self.spawn_actor(key.clone(), self.load_initial(key));
        let sent = slot
            .inbox
            .send(envelope)
            .map_err(|_| SyncError::Channel(format!("{} actor {key} unavailable", P::KIND)));
        actors.insert(key.clone(), slot);
        sent
    }

    fn load_initial(&self, key: &P::Key) -> Option<P> {
        match self.inner.store.load(key) {
            Ok(state) => state,
            Err(e) => {
                error!("cannot load {} state for {key}: {e}", P::KIND);
                None
            }
        }
    }

    fn spawn_actor(&self, key: P::Key, state: Option<P>) -> Slot<P> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let actor = Actor {
            id,
            key,
            state,
            policy: Arc::clone(&self.inner.policy),
            store: Arc::clone(&self.inner.store),
            sink: self.inner.sink.clone(),
            actors: Arc::clone(&self.inner.actors),
        };
        tokio::spawn(actor.run(inbox_rx));
        Slot {
            id,
            inbox: inbox_tx,
        }
    }
}

struct Actor<P: Process> {
    id: u64,
    key: P::Key,
    state: Option<P>,
    policy: Arc<P::Policy>,
    store: Arc<dyn StateStore<P::Key, P>>,
    sink: mpsc::UnboundedSender<Emitted<P>>,
    actors: Actors<P>,
}

impl<P: Process> Actor<P> {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Envelope<P>>) {
        trace!("{} actor {} started", P::KIND, self.key);
        while let Some(envelope) = inbox.recv().await {
            match envelope {
                Envelope::Inspect(reply) => {
                    let _ = reply.send(self.state.clone());
                }
                Envelope::Apply { input, reply } => {
                    let emitted = self.apply(input);
                    // Retire before replying so the caller observes the
                    // registry without this key.
                    let retired = self.try_retire(&inbox);
                    if let Some(reply) = reply {
                        let _ = reply.send(emitted);
                    }
                    if retired {
                        trace!("{} actor {} retired", P::KIND, self.key);
                        return;
                    }
                }
            }
        }
        debug!("{} actor {} inbox closed", P::KIND, self.key);
    }

    /// Unregister this actor if it has nothing left to do.
    fn try_retire(&self, inbox: &mpsc::UnboundedReceiver<Envelope<P>>) -> bool {
        if !self.state.as_ref().is_none_or(P::is_final) {
            return false;
        }
        let mut actors = lock(&self.actors);
        if !inbox.is_empty() {
            return false;
        }
        if actors.get(&self.key).is_some_and(|slot| slot.id == self.id) {
            actors.remove(&self.key);
        }
        true
    }

    fn apply(&mut self, input: P::Input) -> Vec<P::Output> {
        trace!(kind = P::KIND, key = %self.key, ?input, "applying input");
        let Transition { next, emitted } = P::apply(self.state.as_ref(), input, &self.policy);

        match next {
            Next::Unchanged => {}
            Next::Set(state) => {
                // Kept in memory even if persisting fails; the store is
                // retried on the next change.
                if let Err(e) = self.store.save(&self.key, &state) {
                    error!("cannot persist {} state for {}: {e}", P::KIND, self.key);
                }
                self.state = Some(state);
            }
            Next::Clear => {
                if self.state.take().is_some() {
                    if let Err(e) = self.store.remove(&self.key) {
                        error!("cannot remove {} state for {}: {e}", P::KIND, self.key);
                    }
                }
            }
        }

        for output in &emitted {
            let item = Emitted {
                key: self.key.clone(),
                output: output.clone(),
            };
            if self.sink.send(item).is_err() {
                debug!("{} output sink closed", P::KIND);
                break;
            }
        }
        emitted
    }
}

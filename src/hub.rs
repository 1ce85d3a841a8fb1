//! Delivery substrate connecting the clock, the keyed actors, and the
//! collaborators.
//!
//! Each process kind has an [`ActorRegistry`] whose outputs flow into a
//! router task. Routers publish [`SyncEvent`]s, forward commands to other
//! kinds, and run collaborator calls on spawned tasks whose results are fed
//! back to the owning actor. Nothing slow ever runs inside an actor or the
//! tick loop.

use crate::actor::{ActorRegistry, Emitted, Process};
use crate::clock::TimePassed;
use crate::collab::{Collaborators, RefreshOutcome};
use crate::config::{StateConfig, SyncConfig};
use crate::error::Result;
use crate::events::SyncEvent;
use crate::model::{ClientKey, IssuedToken, JanitorScope, Secret, SessionId, Timestamp, UserScope};
use crate::process::{
    ActiveSessions, AutoUpdateInput, AutoUpdateOutput, AutoUpdateState, FetchInput, FetchOutput,
    FetchRejection, FetchState, JanitorInput, JanitorOutput, JanitorState, SessionInput,
    SessionOutput, TokenMonitorInput, TokenMonitorOutput, TokenMonitorState,
};
use crate::store::{JsonFileStore, MemoryStore, StateStore};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 1_024;

/// One store per process kind.
#[derive(Clone)]
pub struct HubStores {
    pub auto_update: Arc<dyn StateStore<ClientKey, AutoUpdateState>>,
    pub fetch: Arc<dyn StateStore<ClientKey, FetchState>>,
    pub token_monitor: Arc<dyn StateStore<SessionId, TokenMonitorState>>,
    pub sessions: Arc<dyn StateStore<UserScope, ActiveSessions>>,
    pub janitor: Arc<dyn StateStore<JanitorScope, JanitorState>>,
}

impl HubStores {
    /// Volatile stores; state is lost with the process.
    pub fn in_memory() -> Self {
        Self {
            auto_update: Arc::new(MemoryStore::new()),
            fetch: Arc::new(MemoryStore::new()),
            token_monitor: Arc::new(MemoryStore::new()),
            sessions: Arc::new(MemoryStore::new()),
            janitor: Arc::new(MemoryStore::new()),
        }
    }

    /// One `<kind>.json` file per process kind under `dir`.
    ///
    /// # Errors
    ///
    /// Returns the store error of the first file that cannot be opened.
    pub fn json_dir(dir: &Path) -> Result<Self> {
        fn open<P: Process + serde::Serialize + serde::de::DeserializeOwned>(
            dir: &Path,
        ) -> Result<JsonFileStore<P::Key, P>>
        where
            P::Key: serde::Serialize + serde::de::DeserializeOwned,
        {
            JsonFileStore::open(dir.join(format!("{}.json", P::KIND)))
        }

        Ok(Self {
            auto_update: Arc::new(open::<AutoUpdateState>(dir)?),
            fetch: Arc::new(open::<FetchState>(dir)?),
            token_monitor: Arc::new(open::<TokenMonitorState>(dir)?),
            sessions: Arc::new(open::<ActiveSessions>(dir)?),
            janitor: Arc::new(open::<JanitorState>(dir)?),
        })
    }

    /// Stores selected by the `[state]` config section.
    ///
    /// # Errors
    ///
    /// See [`HubStores::json_dir`].
    pub fn from_config(config: &StateConfig) -> Result<Self> {
        match &config.dir {
            Some(dir) => Self::json_dir(dir),
            None => Ok(Self::in_memory()),
        }
    }
}

/// Outcome of [`SyncHub::request_fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchDecision {
    /// A fetch was started for mentions updated after `since`.
    Started { since: Timestamp },
    /// The request was refused; nothing was started.
    Rejected(FetchRejection),
}

/// Outcome of [`SyncHub::verify_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionVerdict {
    Verified,
    Failed,
}

/// Number of instances each tick reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickFanout {
    pub auto_update: usize,
    pub token_monitor: usize,
    pub janitor: usize,
}

/// Handles shared by the hub and its router tasks.
#[derive(Clone)]
struct Wiring {
    auto_update: ActorRegistry<AutoUpdateState>,
    fetch: ActorRegistry<FetchState>,
    token_monitor: ActorRegistry<TokenMonitorState>,
    sessions: ActorRegistry<ActiveSessions>,
    janitor: ActorRegistry<JanitorState>,
    events: broadcast::Sender<SyncEvent>,
    collab: Collaborators,
}

struct HubInner {
    wiring: Wiring,
    cancel: CancellationToken,
}

impl Drop for HubInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The coordination hub. Cheap to clone.
///
/// Router tasks stop when the last handle is dropped or on
/// [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct SyncHub {
    inner: Arc<HubInner>,
}

impl SyncHub {
    /// Build the registries, restore persisted state, and start the routers.
    ///
    /// Fetches that were in flight when the previous process stopped can never
    /// report back; they are closed as failed so the client is not blocked.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a store error if persisted state cannot be listed.
    pub async fn start(
        config: &SyncConfig,
        collab: Collaborators,
        stores: HubStores,
    ) -> Result<Self> {
        let cancel = CancellationToken::new();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let (auto_tx, auto_rx) = mpsc::unbounded_channel();
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        let (token_tx, token_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (janitor_tx, janitor_rx) = mpsc::unbounded_channel();

        let schedule = &config.schedule;
        let wiring = Wiring {
            auto_update: ActorRegistry::new(
                schedule.auto_update_policy(),
                stores.auto_update,
                auto_tx,
            ),
            fetch: ActorRegistry::new((), stores.fetch, fetch_tx),
            token_monitor: ActorRegistry::new(
                schedule.token_monitor_policy(),
                stores.token_monitor,
                token_tx,
            ),
            sessions: ActorRegistry::new((), stores.sessions, session_tx),
            janitor: ActorRegistry::new(schedule.janitor_policy(), stores.janitor, janitor_tx),
            events,
            collab,
        };

        wiring.auto_update.restore()?;
        wiring.fetch.restore()?;
        wiring.token_monitor.restore()?;
        wiring.sessions.restore()?;
        wiring.janitor.restore()?;
        for scope in config.janitor.scope_keys() {
            wiring.janitor.ensure(&scope);
        }

        spawn_router(auto_rx, cancel.clone(), {
            let wiring = wiring.clone();
            move |e| wiring.route_auto_update(e)
        });
        spawn_router(fetch_rx, cancel.clone(), {
            let wiring = wiring.clone();
            move |e| wiring.route_fetch(e)
        });
        spawn_router(token_rx, cancel.clone(), {
            let wiring = wiring.clone();
            move |e| wiring.route_token(e)
        });
        spawn_router(session_rx, cancel.clone(), {
            let wiring = wiring.clone();
            move |e| wiring.route_session(e)
        });
        spawn_router(janitor_rx, cancel.clone(), {
            let wiring = wiring.clone();
            move |e| wiring.route_janitor(e)
        });

        for key in wiring.fetch.keys() {
            if let Some(started_at) = wiring
                .fetch
                .state(&key)
                .await?
                .and_then(|s| s.fetch_started_at)
            {
                warn!(client = %key, %started_at, "closing fetch interrupted by restart");
                wiring.fetch.deliver(
                    &key,
                    FetchInput::FetchFailed {
                        started_at,
                        status_code: None,
                    },
                );
            }
        }

        info!(
            clients = wiring.auto_update.len(),
            sessions = wiring.token_monitor.len(),
            janitors = wiring.janitor.len(),
            "sync hub started"
        );
        Ok(Self {
            inner: Arc::new(HubInner { wiring, cancel }),
        })
    }

    fn wiring(&self) -> &Wiring {
        &self.inner.wiring
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.wiring().events.subscribe()
    }

    /// Fan one tick out to every registered scheduler, monitor, and janitor.
    ///
    /// Each registry's key set is snapshotted on receipt.
    pub fn on_tick(&self, tick: TimePassed) -> TickFanout {
        let w = self.wiring();
        let fanout = TickFanout {
            auto_update: w.auto_update.deliver_all(|| AutoUpdateInput::Tick(tick.time)),
            token_monitor: w
                .token_monitor
                .deliver_all(|| TokenMonitorInput::Tick(tick.time)),
            janitor: w.janitor.deliver_all(|| JanitorInput::Tick(tick.time)),
        };
        debug!(time = %tick.time, ?fanout, "tick delivered");
        fanout
    }

    /// Consume ticks until the channel closes or the hub shuts down.
    pub async fn run(&self, mut ticks: mpsc::Receiver<TimePassed>) {
        let cancel = self.inner.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                tick = ticks.recv() => match tick {
                    Some(tick) => {
                        self.on_tick(tick);
                    }
                    None => {
                        info!("tick channel closed");
                        break;
                    }
                },
            }
        }
    }

    /// Record a credential for `username` and start scheduling its fetches.
    pub fn credentials_available(&self, username: &str, access_token: Secret) {
        let client = ClientKey::from_username(username);
        let w = self.wiring();
        w.fetch.deliver(
            &client,
            FetchInput::CredentialsUpdated {
                token: access_token,
            },
        );
        w.auto_update
            .deliver(&client, AutoUpdateInput::CredentialsAvailable);
    }

    /// Stop scheduling fetches for `username`.
    pub fn credentials_revoked(&self, username: &str) {
        let client = ClientKey::from_username(username);
        self.wiring()
            .auto_update
            .deliver(&client, AutoUpdateInput::CredentialsRevoked);
    }

    /// Start a fetch for `client` unless one is already running.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Channel`] if the fetch actor is gone.
    pub async fn request_fetch(
        &self,
        client: &ClientKey,
        time: Timestamp,
    ) -> Result<FetchDecision> {
        let outputs = self
            .wiring()
            .fetch
            .ask(client, FetchInput::RequestFetch { time })
            .await?;
        let decision = outputs.into_iter().find_map(|output| match output {
            FetchOutput::FetchStarted { since, .. } => Some(FetchDecision::Started { since }),
            FetchOutput::Rejected(rejection) => Some(FetchDecision::Rejected(rejection)),
            _ => None,
        });
        Ok(decision.unwrap_or(FetchDecision::Rejected(FetchRejection::NoCredentials)))
    }

    /// Evaluate `session`'s monitor at `time` as if a tick arrived.
    ///
    /// Returns `true` when a refresh was requested.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Channel`] if the monitor actor is gone.
    pub async fn request_token_refresh(
        &self,
        session: &SessionId,
        time: Timestamp,
    ) -> Result<bool> {
        let outputs = self
            .wiring()
            .token_monitor
            .ask(session, TokenMonitorInput::Tick(time))
            .await?;
        Ok(outputs
            .iter()
            .any(|o| matches!(o, TokenMonitorOutput::RefreshRequested { .. })))
    }

    /// A session logged in with `token`.
    ///
    /// Starts monitoring the session's token, hands the access token to the
    /// user's fetches, and registers the session. Scheduling starts once the
    /// session set reports it opened.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Channel`] if an actor is gone.
    pub async fn login(
        &self,
        scope: &UserScope,
        session: &SessionId,
        token: IssuedToken,
    ) -> Result<()> {
        let w = self.wiring();
        let access_token = token.access_token.clone();
        w.token_monitor
            .ask(
                session,
                TokenMonitorInput::LoggedIn {
                    scope: scope.clone(),
                    token,
                },
            )
            .await?;
        w.fetch.deliver(
            &ClientKey::from_username(scope.as_str()),
            FetchInput::CredentialsUpdated {
                token: access_token,
            },
        );
        w.sessions
            .ask(scope, SessionInput::Login(session.clone()))
            .await?;
        info!(%scope, %session, "session logged in");
        Ok(())
    }

    /// The user logged `session` out.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Channel`] if an actor is gone.
    pub async fn logout(&self, scope: &UserScope, session: &SessionId) -> Result<()> {
        self.wiring()
            .end_session(scope, session, TokenMonitorInput::LoggedOut)
            .await
    }

    /// `session` expired and can no longer be used.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Channel`] if an actor is gone.
    pub async fn expire_session(&self, scope: &UserScope, session: &SessionId) -> Result<()> {
        self.wiring()
            .end_session(scope, session, TokenMonitorInput::SessionExpired)
            .await
    }

    /// Check whether `session` is active for `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Channel`] if the tracker actor is gone.
    pub async fn verify_session(
        &self,
        scope: &UserScope,
        session: &SessionId,
    ) -> Result<SessionVerdict> {
        let outputs = self
            .wiring()
            .sessions
            .ask(scope, SessionInput::Verify(session.clone()))
            .await?;
        let verified = outputs
            .iter()
            .any(|o| matches!(o, SessionOutput::Verified(_)));
        Ok(if verified {
            SessionVerdict::Verified
        } else {
            SessionVerdict::Failed
        })
    }

    /// Current fetch state of `client`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Channel`] if the actor is gone.
    pub async fn fetch_state(&self, client: &ClientKey) -> Result<Option<FetchState>> {
        self.wiring().fetch.state(client).await
    }

    /// Current auto-update state of `client`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Channel`] if the actor is gone.
    pub async fn auto_update_state(&self, client: &ClientKey) -> Result<Option<AutoUpdateState>> {
        self.wiring().auto_update.state(client).await
    }

    /// Current monitor state of `session`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Channel`] if the actor is gone.
    pub async fn token_state(&self, session: &SessionId) -> Result<Option<TokenMonitorState>> {
        self.wiring().token_monitor.state(session).await
    }

    /// Active sessions of `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Channel`] if the actor is gone.
    pub async fn active_sessions(&self, scope: &UserScope) -> Result<Option<ActiveSessions>> {
        self.wiring().sessions.state(scope).await
    }

    /// Current janitor state of `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Channel`] if the actor is gone.
    pub async fn janitor_state(&self, scope: &JanitorScope) -> Result<Option<JanitorState>> {
        self.wiring().janitor.state(scope).await
    }

    /// Stop the routers and the tick loop. Outstanding collaborator calls
    /// run to completion but their results are no longer published.
    pub fn shutdown(&self) {
        info!("sync hub shutting down");
        self.inner.cancel.cancel();
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

fn spawn_router<P: Process>(
    mut rx: mpsc::UnboundedReceiver<Emitted<P>>,
    cancel: CancellationToken,
    mut route: impl FnMut(Emitted<P>) + Send + 'static,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                emitted = rx.recv() => match emitted {
                    Some(emitted) => route(emitted),
                    None => break,
                },
            }
        }
        debug!("{} router stopped", P::KIND);
    });
}

impl Wiring {
    fn publish(&self, event: SyncEvent) {
        debug!(event = event.name(), key = event.key(), "publishing event");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn route_auto_update(&self, Emitted { key, output }: Emitted<AutoUpdateState>) {
        match output {
            AutoUpdateOutput::SchedulingStarted => {
                info!(client = %key, "auto-update scheduling started");
                self.publish(SyncEvent::SchedulingStarted { client: key });
            }
            AutoUpdateOutput::FetchRequested { time } => {
                self.fetch.deliver(&key, FetchInput::RequestFetch { time });
                self.publish(SyncEvent::FetchRequested { client: key, time });
            }
        }
    }

    fn route_fetch(&self, Emitted { key, output }: Emitted<FetchState>) {
        match output {
            FetchOutput::Rejected(rejection) => {
                debug!(client = %key, %rejection, "fetch request rejected");
            }
            FetchOutput::FetchStarted {
                time,
                since,
                credential,
            } => {
                self.publish(SyncEvent::FetchStarted {
                    client: key.clone(),
                    time,
                    since,
                });
                let wiring = self.clone();
                tokio::spawn(async move {
                    let result = wiring
                        .collab
                        .mentions
                        .fetch_items(&key, credential.expose(), since)
                        .await;
                    let input = match result {
                        Ok(items) => FetchInput::FetchSucceeded {
                            started_at: time,
                            items,
                        },
                        Err(failure) => {
                            warn!(client = %key, "{failure}");
                            FetchInput::FetchFailed {
                                started_at: time,
                                status_code: failure.status_code,
                            }
                        }
                    };
                    wiring.fetch.deliver(&key, input);
                });
            }
            FetchOutput::ItemObserved(mention) => {
                self.publish(SyncEvent::ItemObserved {
                    client: key,
                    mention,
                });
            }
            FetchOutput::FetchCompleted { time, items } => {
                info!(client = %key, items, "fetch completed");
                self.publish(SyncEvent::FetchCompleted {
                    client: key,
                    time,
                    items,
                });
            }
            FetchOutput::FetchFailed { status_code } => {
                self.publish(SyncEvent::FetchFailed {
                    client: key,
                    status_code,
                });
            }
        }
    }

    fn route_token(&self, Emitted { key, output }: Emitted<TokenMonitorState>) {
        match output {
            TokenMonitorOutput::RefreshRequested {
                time,
                refresh_token,
                scope,
            } => {
                self.publish(SyncEvent::TokenRefreshRequested {
                    session: key.clone(),
                    time,
                });
                let wiring = self.clone();
                tokio::spawn(async move {
                    let outcome = wiring
                        .collab
                        .refresher
                        .refresh(&key, refresh_token.expose())
                        .await;
                    match outcome {
                        RefreshOutcome::Refreshed(token) => {
                            wiring
                                .token_monitor
                                .deliver(&key, TokenMonitorInput::RefreshCompleted { token });
                        }
                        RefreshOutcome::Failed(reason) => {
                            warn!(session = %key, "token refresh failed: {reason}");
                        }
                        RefreshOutcome::Revoked => {
                            warn!(session = %key, "refresh token revoked, expiring session");
                            if let Err(e) = wiring
                                .end_session(&scope, &key, TokenMonitorInput::SessionExpired)
                                .await
                            {
                                warn!(session = %key, "cannot expire session: {e}");
                            }
                        }
                    }
                });
            }
            TokenMonitorOutput::ExpiryUpdated {
                expires,
                access_token,
                scope,
            } => {
                let client = ClientKey::from_username(scope.as_str());
                self.fetch.deliver(
                    &client,
                    FetchInput::CredentialsUpdated {
                        token: access_token,
                    },
                );
                self.publish(SyncEvent::TokenExpiryUpdated {
                    session: key,
                    expires,
                });
            }
            TokenMonitorOutput::Terminated => {
                info!(session = %key, "token monitoring terminated");
                self.publish(SyncEvent::MonitoringTerminated { session: key });
            }
        }
    }

    /// Scheduling follows the session set: its actor decides when the first
    /// session opens and the last one closes, so logins and logouts racing
    /// on one user reach auto-update in the order they were applied.
    fn route_session(&self, Emitted { key, output }: Emitted<ActiveSessions>) {
        let event = match output {
            SessionOutput::Opened(session) => {
                debug!(scope = %key, %session, "session opened");
                self.auto_update.deliver(
                    &ClientKey::from_username(key.as_str()),
                    AutoUpdateInput::CredentialsAvailable,
                );
                return;
            }
            SessionOutput::AllClosed => {
                info!(scope = %key, "last session closed, stopping auto-update");
                self.auto_update.deliver(
                    &ClientKey::from_username(key.as_str()),
                    AutoUpdateInput::CredentialsRevoked,
                );
                return;
            }
            SessionOutput::Verified(session) => SyncEvent::SessionVerified {
                scope: key,
                session,
            },
            SessionOutput::VerificationFailed(session) => SyncEvent::SessionVerificationFailed {
                scope: key,
                session,
            },
        };
        self.publish(event);
    }

    fn route_janitor(&self, Emitted { key, output }: Emitted<JanitorState>) {
        let JanitorOutput::PurgeDue { time } = output;
        let wiring = self.clone();
        tokio::spawn(async move {
            match wiring.collab.purger.purge_archived(&key).await {
                Ok(purged) => {
                    info!(scope = %key, purged, "archived storage purged");
                    wiring.publish(SyncEvent::StoragePurged {
                        scope: key,
                        time,
                        purged,
                    });
                }
                Err(e) => warn!(scope = %key, "purge failed: {e}"),
            }
        });
    }

    /// Terminate monitoring and drop the session. Removing the last one
    /// stops scheduling through [`Self::route_session`].
    async fn end_session(
        &self,
        scope: &UserScope,
        session: &SessionId,
        reason: TokenMonitorInput,
    ) -> Result<()> {
        let removal = match reason {
            TokenMonitorInput::LoggedOut => SessionInput::Logout(session.clone()),
            _ => SessionInput::Expired(session.clone()),
        };
        self.token_monitor.ask(session, reason).await?;
        self.sessions.ask(scope, removal).await?;
        info!(%scope, %session, "session ended");
        Ok(())
    }
}

//! Per-conversation session state machine.
//!
//! One `ConvoSession` exists per conversation while it is on screen. It
//! owns the transport connection, publishes every state change through a
//! [`SnapshotStore`], and registers itself with the [`EventRouter`] while
//! live. All transitions for one session are serialized behind a single
//! mutex; connect attempts, retry timers, and the receive loop run as
//! spawned tasks whose completions are guarded by an attempt-generation
//! counter, so anything that finishes after `background()` is a no-op.

pub mod backoff;
pub mod log;
pub mod traits;

pub use traits::SessionControl;

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{SessionConfig, SessionTuning};
use crate::router::EventRouter;
use crate::snapshot::{SnapshotStore, Subscription};
use crate::transport::{
    ConversationId, Cursor, InboundEvent, Message, OutboundSignal, Transport, TransportError,
    TransportEvent,
};

use log::{Applied, ConvoLog, PendingBuffer};

/// The externally observed session state. Exactly one value is current per
/// session at any instant; observers only ever see committed snapshots.
///
/// `Backgrounded`, `Connecting`, and `Errored` carry the last-known log so
/// a resumed screen can render stale-but-present content while the
/// connection comes back.
#[derive(Debug, Clone)]
pub enum ConvoState {
    Uninitialized,
    Backgrounded {
        log: Vec<Message>,
    },
    Connecting {
        log: Vec<Message>,
    },
    Ready {
        log: Vec<Message>,
        cursor: Cursor,
        /// Highest sequence any remote actor has read.
        read_to: Option<u64>,
        /// Remote actors currently typing.
        typing: BTreeSet<String>,
    },
    Errored {
        cause: TransportError,
        /// Scheduled time of the next automatic reconnect. `None` means the
        /// failure was fatal (expired credentials); the session waits for an
        /// explicit `resume()` after the host refreshes them.
        retry_at: Option<DateTime<Utc>>,
        log: Vec<Message>,
    },
}

impl ConvoState {
    /// Connecting or ready; a live state holds (or is acquiring) network
    /// resources.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting { .. } | Self::Ready { .. })
    }

    pub fn log(&self) -> &[Message] {
        match self {
            Self::Uninitialized => &[],
            Self::Backgrounded { log }
            | Self::Connecting { log }
            | Self::Ready { log, .. }
            | Self::Errored { log, .. } => log,
        }
    }

    pub fn phase(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Backgrounded { .. } => "backgrounded",
            Self::Connecting { .. } => "connecting",
            Self::Ready { .. } => "ready",
            Self::Errored { .. } => "errored",
        }
    }
}

/// Contract violations surfaced to the caller. Transport failures never
/// appear here; those become `Errored` snapshots.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session has been disposed")]
    Disposed,
    #[error("session is not ready")]
    NotReady,
}

struct Inner {
    /// Attempt generation. Bumped by every `resume()`/`background()`; task
    /// completions carrying an older generation are ignored.
    generation: u64,
    /// Consecutive connect failures, drives the backoff curve.
    failures: u32,
    disposed: bool,
    log: ConvoLog,
    pending: PendingBuffer,
    read_to: Option<u64>,
    typing: BTreeSet<String>,
    outbound: Option<mpsc::Sender<OutboundSignal>>,
    tasks: Vec<JoinHandle<()>>,
    reorder_flush: Option<JoinHandle<()>>,
}

/// Live sync session for one conversation.
pub struct ConvoSession {
    config: SessionConfig,
    tuning: SessionTuning,
    transport: Arc<dyn Transport>,
    router: Arc<EventRouter>,
    store: Arc<SnapshotStore<ConvoState>>,
    inner: Mutex<Inner>,
    me: Weak<ConvoSession>,
}

impl ConvoSession {
    pub fn new(
        config: SessionConfig,
        tuning: SessionTuning,
        transport: Arc<dyn Transport>,
        router: Arc<EventRouter>,
    ) -> Arc<Self> {
        let inner = Inner {
            generation: 0,
            failures: 0,
            disposed: false,
            log: ConvoLog::new(tuning.reorder_window),
            pending: PendingBuffer::new(tuning.pending_buffer_cap),
            read_to: None,
            typing: BTreeSet::new(),
            outbound: None,
            tasks: Vec::new(),
            reorder_flush: None,
        };
        Arc::new_cyclic(|me| Self {
            config,
            tuning,
            transport,
            router,
            store: SnapshotStore::new(ConvoState::Uninitialized),
            inner: Mutex::new(inner),
            me: me.clone(),
        })
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.config.conversation_id
    }

    /// Synchronous, non-blocking read of the current state.
    pub fn snapshot(&self) -> Arc<ConvoState> {
        self.store.snapshot()
    }

    /// Register an observer for state transitions. See
    /// [`SnapshotStore::subscribe`] for the delivery contract.
    pub fn subscribe(&self, observer: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.store.subscribe(observer)
    }

    /// Bring the session live. Idempotent: a no-op while connecting or
    /// ready. Returns immediately; completion is observed as a state
    /// transition. Must be called from within a tokio runtime.
    pub fn resume(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(SessionError::Disposed);
        }
        self.resume_locked(&mut inner);
        Ok(())
    }

    /// Tear down the transport, cancel every pending timer, and go
    /// `Backgrounded`. Idempotent. The last-known log is preserved for the
    /// next resume.
    pub fn background(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return Err(SessionError::Disposed);
        }
        self.background_locked(&mut inner);
        Ok(())
    }

    /// Background the session and invalidate it. Every operation afterwards
    /// returns [`SessionError::Disposed`]. Idempotent.
    pub fn dispose(&self) {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return;
        }
        self.background_locked(&mut inner);
        inner.disposed = true;
        debug!(conversation = %self.config.conversation_id, "session disposed");
    }

    /// Queue a message send. Requires a live connection; the key identifies
    /// the send for server-side deduplication.
    pub fn send_message(&self, text: impl Into<String>) -> Result<Uuid, SessionError> {
        let key = Uuid::new_v4();
        self.send_signal(OutboundSignal::SendMessage {
            idempotency_key: key,
            text: text.into(),
        })?;
        Ok(key)
    }

    /// Signal the local user's typing state.
    pub fn set_typing(&self, active: bool) -> Result<(), SessionError> {
        self.send_signal(OutboundSignal::Typing { active })
    }

    /// Acknowledge messages up to `seq` as read.
    pub fn mark_read(&self, seq: u64) -> Result<(), SessionError> {
        self.send_signal(OutboundSignal::ReadReceipt { seq })
    }

    fn send_signal(&self, signal: OutboundSignal) -> Result<(), SessionError> {
        let inner = self.inner.lock();
        if inner.disposed {
            return Err(SessionError::Disposed);
        }
        let Some(outbound) = &inner.outbound else {
            return Err(SessionError::NotReady);
        };
        outbound.try_send(signal).map_err(|_| {
            warn!(conversation = %self.config.conversation_id, "outbound channel unavailable");
            SessionError::NotReady
        })
    }

    /// Inbound delivery from the router. Buffered while not ready, merged
    /// into the log otherwise.
    pub(crate) fn apply_inbound(&self, event: InboundEvent) {
        let mut inner = self.inner.lock();
        if inner.disposed {
            return;
        }
        if !matches!(&*self.store.snapshot(), ConvoState::Ready { .. }) {
            if inner.pending.push(event) {
                warn!(
                    conversation = %self.config.conversation_id,
                    "pre-ready buffer overflowed; next connect resyncs from scratch"
                );
            }
            return;
        }
        if self.merge_event(&mut inner, event) {
            self.commit_ready(&inner);
        }
        self.maybe_schedule_reorder_flush(&mut inner);
    }

    // ---- transitions (all run with the inner lock held) ----

    fn resume_locked(&self, inner: &mut Inner) {
        if self.store.snapshot().is_live() {
            debug!(conversation = %self.config.conversation_id, "resume while live is a no-op");
            return;
        }
        let generation = self.begin_generation(inner);
        let full_resync = inner.pending.overflowed();
        let cursor = if full_resync {
            None
        } else {
            inner.log.resume_cursor()
        };
        self.store.commit(ConvoState::Connecting {
            log: inner.log.snapshot_entries(),
        });
        info!(
            conversation = %self.config.conversation_id,
            resuming = cursor.is_some(),
            "session connecting"
        );

        // Tasks hold only a weak handle so a session dropped by its owner
        // can actually drop.
        let me = self.me.clone();
        let transport = self.transport.clone();
        let endpoint = self.config.service_endpoint.clone();
        let conversation = self.config.conversation_id.clone();
        let actor = self.config.actor.clone();
        inner.tasks.push(tokio::spawn(async move {
            let result = transport
                .connect(&endpoint, &conversation, &actor, cursor)
                .await;
            if let Some(session) = me.upgrade() {
                session.finish_connect(generation, full_resync, result);
            }
        }));
    }

    fn background_locked(&self, inner: &mut Inner) {
        self.begin_generation(inner);
        self.router
            .unregister(&self.config.conversation_id, &self.me);
        inner.typing.clear();
        if !matches!(&*self.store.snapshot(), ConvoState::Backgrounded { .. }) {
            info!(conversation = %self.config.conversation_id, "session backgrounded");
            self.store.commit(ConvoState::Backgrounded {
                log: inner.log.snapshot_entries(),
            });
        }
    }

    /// Start a new attempt generation: cancel every outstanding task and
    /// timer, release the outbound channel. Late completions from the old
    /// generation become no-ops.
    fn begin_generation(&self, inner: &mut Inner) -> u64 {
        inner.generation += 1;
        for task in inner.tasks.drain(..) {
            task.abort();
        }
        if let Some(task) = inner.reorder_flush.take() {
            task.abort();
        }
        inner.outbound = None;
        inner.generation
    }

    fn finish_connect(
        &self,
        generation: u64,
        full_resync: bool,
        result: Result<crate::transport::TransportSession, TransportError>,
    ) {
        let mut inner = self.inner.lock();
        if inner.disposed || inner.generation != generation {
            debug!(conversation = %self.config.conversation_id, "stale connect completion ignored");
            return;
        }
        match result {
            Ok(conn) => {
                inner.failures = 0;
                if full_resync {
                    info!(conversation = %self.config.conversation_id, "full resync after missed events");
                    inner.log.reset(conn.backfill, conn.cursor);
                    inner.pending.clear_overflow();
                } else {
                    inner.log.merge_backfill(conn.backfill, conn.cursor);
                }
                inner.outbound = Some(conn.outbound);

                let me = self.me.clone();
                let router = self.router.clone();
                let mut events = conn.events;
                inner.tasks.push(tokio::spawn(async move {
                    let mut cause = None;
                    while let Some(item) = events.recv().await {
                        match item {
                            TransportEvent::Event(event) => router.deliver(event),
                            TransportEvent::Dropped(err) => {
                                cause = Some(err);
                                break;
                            }
                        }
                    }
                    let cause = cause
                        .unwrap_or_else(|| TransportError::Network("event stream closed".to_string()));
                    if let Some(session) = me.upgrade() {
                        session.handle_drop(generation, cause);
                    }
                }));

                // Replay buffered events before observers see the ready
                // snapshot, so they land exactly once and in order.
                let replay = inner.pending.drain();
                for event in replay {
                    self.merge_event(&mut inner, event);
                }

                self.router
                    .register(self.config.conversation_id.clone(), self.me.clone());
                self.commit_ready(&inner);
                self.maybe_schedule_reorder_flush(&mut inner);
                info!(
                    conversation = %self.config.conversation_id,
                    cursor = inner.log.cursor().0,
                    "session ready"
                );
            }
            Err(cause) => self.fail(&mut inner, generation, cause),
        }
    }

    /// Transport drop reported by the receive loop.
    fn handle_drop(&self, generation: u64, cause: TransportError) {
        let mut inner = self.inner.lock();
        if inner.disposed || inner.generation != generation {
            debug!(conversation = %self.config.conversation_id, "stale transport drop ignored");
            return;
        }
        if !matches!(&*self.store.snapshot(), ConvoState::Ready { .. }) {
            return;
        }
        self.fail(&mut inner, generation, cause);
    }

    fn fail(&self, inner: &mut Inner, generation: u64, cause: TransportError) {
        inner.outbound = None;
        inner.typing.clear();
        if cause.is_retryable() {
            let attempt = inner.failures;
            inner.failures += 1;
            let delay = backoff::delay(attempt, &self.tuning);
            let retry_at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
            warn!(
                conversation = %self.config.conversation_id,
                error = %cause,
                retry_in_ms = delay.as_millis() as u64,
                "transport failed; reconnect scheduled"
            );
            self.store.commit(ConvoState::Errored {
                cause,
                retry_at: Some(retry_at),
                log: inner.log.snapshot_entries(),
            });
            let me = self.me.clone();
            inner.tasks.push(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(session) = me.upgrade() {
                    session.fire_retry(generation);
                }
            }));
        } else {
            warn!(
                conversation = %self.config.conversation_id,
                error = %cause,
                "fatal transport failure; waiting for explicit resume"
            );
            self.store.commit(ConvoState::Errored {
                cause,
                retry_at: None,
                log: inner.log.snapshot_entries(),
            });
        }
    }

    fn fire_retry(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.disposed || inner.generation != generation {
            return;
        }
        if !matches!(&*self.store.snapshot(), ConvoState::Errored { .. }) {
            return;
        }
        debug!(conversation = %self.config.conversation_id, "retry timer fired");
        self.resume_locked(&mut inner);
    }

    fn merge_event(&self, inner: &mut Inner, event: InboundEvent) -> bool {
        match event {
            InboundEvent::MessageCreated { message, .. } => {
                match inner.log.apply_message(message) {
                    Applied::Committed => true,
                    Applied::Held => false,
                    Applied::Ignored => {
                        debug!(conversation = %self.config.conversation_id, "duplicate message ignored");
                        false
                    }
                }
            }
            InboundEvent::ReadReceipt { seq, .. } => {
                if !inner.read_to.is_some_and(|read_to| seq <= read_to) {
                    inner.read_to = Some(seq);
                    true
                } else {
                    false
                }
            }
            InboundEvent::Typing {
                actor_id, active, ..
            } => {
                if active {
                    inner.typing.insert(actor_id)
                } else {
                    inner.typing.remove(&actor_id)
                }
            }
        }
    }

    fn commit_ready(&self, inner: &Inner) {
        self.store.commit(ConvoState::Ready {
            log: inner.log.snapshot_entries(),
            cursor: inner.log.cursor(),
            read_to: inner.read_to,
            typing: inner.typing.clone(),
        });
    }

    /// Arm the straggler flush timer when the reorder window is holding
    /// events and no timer is pending.
    fn maybe_schedule_reorder_flush(&self, inner: &mut Inner) {
        if !inner.log.has_held() || inner.reorder_flush.is_some() {
            return;
        }
        let me = self.me.clone();
        let generation = inner.generation;
        let delay = std::time::Duration::from_millis(self.tuning.reorder_flush_ms);
        inner.reorder_flush = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(session) = me.upgrade() {
                session.flush_held(generation);
            }
        }));
    }

    fn flush_held(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.disposed || inner.generation != generation {
            return;
        }
        inner.reorder_flush = None;
        if inner.log.flush_reorder() {
            warn!(
                conversation = %self.config.conversation_id,
                "reorder window flushed with sequence gaps"
            );
            self.commit_ready(&inner);
        }
    }
}

impl SessionControl for ConvoSession {
    fn resume(&self) -> Result<(), SessionError> {
        ConvoSession::resume(self)
    }

    fn background(&self) -> Result<(), SessionError> {
        ConvoSession::background(self)
    }
}

impl Drop for ConvoSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

//! Transcript state machine.
//!
//! The controller owns the conversation. `send` appends the user message and
//! an empty assistant placeholder, then a single driving task applies the
//! stream's frames to that placeholder until a terminal frame, a closed
//! stream, or a cancellation ends it:
//!
//! ```text
//! Idle -> Sending -> Streaming -> Completed | Failed | Cancelled -> Idle
//! ```
//!
//! `send` is only accepted in `Idle`, so at most one stream is ever bound to
//! the transcript.
//!
//! Snapshots are copied under the lock and written after it is released.
//! Each copy carries a sequence number and an older copy never overwrites a
//! newer one in the store.

use crate::persistence::TranscriptStore;
use crate::protocol::Frame;
use crate::state::{ChatMessage, MessageMeta};
use crate::transport::{ChatRequest, FrameSource, TransportEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Messages appended, waiting for the backend to accept the request.
    Sending,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl Phase {
    pub fn is_busy(self) -> bool {
        matches!(self, Phase::Sending | Phase::Streaming)
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Sending => "sending",
            Phase::Streaming => "streaming",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
            Phase::Cancelled => "cancelled",
        }
    }
}

/// How a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl StreamOutcome {
    fn phase(self) -> Phase {
        match self {
            StreamOutcome::Completed => Phase::Completed,
            StreamOutcome::Failed => Phase::Failed,
            StreamOutcome::Cancelled => Phase::Cancelled,
        }
    }
}

/// Change notifications for subscribers (UI re-render, printers)
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
    PhaseChanged(Phase),
    MessageAppended { index: usize },
    ContentAppended { index: usize, delta: String },
    ContentReplaced { index: usize },
    MetaMerged { index: usize },
    Finished(StreamOutcome),
    Cleared,
}

/// Binds the outstanding request to its placeholder
struct StreamSession {
    id: u64,
    placeholder: usize,
    cancel: CancellationToken,
}

struct Inner {
    messages: Vec<ChatMessage>,
    phase: Phase,
    session: Option<StreamSession>,
    next_session_id: u64,
    last_outcome: Option<StreamOutcome>,
    context_id: Option<String>,
    snapshot_seq: u64,
}

/// Transcript copy taken under the lock and written after it is released
struct Snapshot {
    seq: u64,
    messages: Vec<ChatMessage>,
}

struct Shared {
    inner: Mutex<Inner>,
    source: Arc<dyn FrameSource>,
    store: Arc<dyn TranscriptStore>,
    events: broadcast::Sender<TranscriptEvent>,
    /// Sequence number of the newest snapshot written to `store`
    persisted_seq: Mutex<u64>,
}

/// Awaitable end of one accepted `send`
pub struct StreamHandle {
    task: JoinHandle<StreamOutcome>,
}

impl StreamHandle {
    pub async fn finished(self) -> StreamOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Stream task ended abnormally");
                StreamOutcome::Cancelled
            }
        }
    }
}

/// Single source of truth for the conversation. Cloning shares the same
/// transcript.
#[derive(Clone)]
pub struct TranscriptController {
    shared: Arc<Shared>,
}

impl TranscriptController {
    /// Restores the transcript from `store` and binds sends to `source`.
    pub fn new(source: Arc<dyn FrameSource>, store: Arc<dyn TranscriptStore>) -> Self {
        let messages = store.load();
        tracing::debug!(restored = messages.len(), "Transcript controller ready");
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    messages,
                    phase: Phase::Idle,
                    session: None,
                    next_session_id: 0,
                    last_outcome: None,
                    context_id: None,
                    snapshot_seq: 0,
                }),
                source,
                store,
                events,
                persisted_seq: Mutex::new(0),
            }),
        }
    }

    pub fn with_context_id(self, context_id: Option<String>) -> Self {
        self.set_context_id(context_id);
        self
    }

    /// Context sent with subsequent requests
    pub fn set_context_id(&self, context_id: Option<String>) {
        self.shared.inner.lock().context_id = context_id;
    }

    pub fn context_id(&self) -> Option<String> {
        self.shared.inner.lock().context_id.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.shared.events.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.shared.inner.lock().phase
    }

    pub fn last_outcome(&self) -> Option<StreamOutcome> {
        self.shared.inner.lock().last_outcome
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.shared.inner.lock().messages.clone()
    }

    /// Borrow the transcript without cloning it
    pub fn read<R>(&self, f: impl FnOnce(&[ChatMessage]) -> R) -> R {
        f(&self.shared.inner.lock().messages)
    }

    /// Start a stream for `text`.
    ///
    /// Returns `None` and leaves the transcript untouched when a stream is
    /// already in flight or `text` is blank. Must be called from within a
    /// Tokio runtime.
    pub fn send(&self, text: &str) -> Option<StreamHandle> {
        if text.trim().is_empty() {
            return None;
        }

        let (request, session_id, cancel) = {
            let mut inner = self.shared.inner.lock();
            if inner.phase != Phase::Idle {
                tracing::debug!(phase = inner.phase.label(), "Rejecting send while a stream is active");
                return None;
            }

            inner.messages.push(ChatMessage::user(text));
            let history = inner.messages.clone();
            inner.messages.push(ChatMessage::assistant(""));
            let placeholder = inner.messages.len() - 1;

            let id = inner.next_session_id;
            inner.next_session_id += 1;
            let cancel = CancellationToken::new();
            inner.session = Some(StreamSession {
                id,
                placeholder,
                cancel: cancel.clone(),
            });

            self.shared.emit(TranscriptEvent::MessageAppended { index: placeholder - 1 });
            self.shared.emit(TranscriptEvent::MessageAppended { index: placeholder });
            self.shared.set_phase(&mut inner, Phase::Sending);

            (
                ChatRequest::new(inner.context_id.clone(), history),
                id,
                cancel,
            )
        };

        tracing::info!(session = session_id, "Starting co-pilot stream");
        let rx = self.shared.source.open(request, cancel.clone());
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move { shared.drive(session_id, rx, cancel).await });

        Some(StreamHandle { task })
    }

    /// Abort the active stream, keeping whatever content already arrived.
    /// Returns `false` when nothing was streaming.
    pub fn cancel(&self) -> bool {
        let inner = self.shared.inner.lock();
        match &inner.session {
            Some(session) => {
                tracing::info!(session = session.id, "Cancelling co-pilot stream");
                session.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop the whole transcript, cancelling any active stream.
    pub fn clear(&self) {
        let snapshot = {
            let mut inner = self.shared.inner.lock();
            if let Some(session) = inner.session.take() {
                session.cancel.cancel();
            }
            inner.messages.clear();
            if inner.phase != Phase::Idle {
                self.shared.set_phase(&mut inner, Phase::Idle);
            }
            self.shared.emit(TranscriptEvent::Cleared);
            Shared::snapshot(&mut inner)
        };
        self.shared.persist(snapshot);
    }
}

impl Shared {
    fn emit(&self, event: TranscriptEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_phase(&self, inner: &mut Inner, phase: Phase) {
        inner.phase = phase;
        self.emit(TranscriptEvent::PhaseChanged(phase));
    }

    async fn drive(
        self: Arc<Self>,
        session_id: u64,
        mut rx: mpsc::Receiver<TransportEvent>,
        cancel: CancellationToken,
    ) -> StreamOutcome {
        let outcome = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StreamOutcome::Cancelled,
                event = rx.recv() => event,
            };

            match event {
                // Closed without a terminator: keep what arrived.
                None => break StreamOutcome::Completed,
                Some(event) => {
                    if let Some(outcome) = self.apply(session_id, event) {
                        break outcome;
                    }
                }
            }
        };

        // The read loop may be parked on a body that never ends after `[DONE]`.
        cancel.cancel();
        drop(rx);
        self.finish(session_id, outcome);
        outcome
    }

    /// Apply one event to the placeholder. Returns the outcome once the
    /// stream has ended.
    fn apply(&self, session_id: u64, event: TransportEvent) -> Option<StreamOutcome> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let index = match &inner.session {
            Some(session) if session.id == session_id && !session.cancel.is_cancelled() => {
                session.placeholder
            }
            _ => return Some(StreamOutcome::Cancelled),
        };

        let frame = match event {
            TransportEvent::Connected => {
                if inner.phase == Phase::Sending {
                    self.set_phase(inner, Phase::Streaming);
                }
                return None;
            }
            TransportEvent::Frame(frame) => frame,
        };

        if inner.phase == Phase::Sending && matches!(frame, Frame::Token(_) | Frame::Meta(_)) {
            self.set_phase(inner, Phase::Streaming);
        }

        let Some(placeholder) = inner.messages.get_mut(index) else {
            return Some(StreamOutcome::Cancelled);
        };

        match frame {
            Frame::Token(text) => {
                placeholder.content.push_str(&text);
                self.emit(TranscriptEvent::ContentAppended { index, delta: text });
                None
            }
            Frame::Meta(meta) => {
                tracing::debug!(intent = ?meta.intent, task_type = ?meta.task_type, "Stream metadata");
                placeholder
                    .meta
                    .get_or_insert_with(MessageMeta::default)
                    .merge(meta);
                self.emit(TranscriptEvent::MetaMerged { index });
                None
            }
            Frame::Error(message) => {
                tracing::warn!(error = %message, "Co-pilot stream failed");
                placeholder.content = format!("Error: {message}");
                placeholder.failed = true;
                self.emit(TranscriptEvent::ContentReplaced { index });
                Some(StreamOutcome::Failed)
            }
            Frame::Done => Some(StreamOutcome::Completed),
        }
    }

    /// Enter the terminal phase, return to `Idle`, then write the snapshot
    /// taken at the terminal phase.
    fn finish(&self, session_id: u64, outcome: StreamOutcome) {
        let snapshot = {
            let mut inner = self.inner.lock();
            if !inner.session.as_ref().is_some_and(|s| s.id == session_id) {
                // Cleared while streaming; nothing left to finalize.
                return;
            }
            inner.session = None;
            inner.last_outcome = Some(outcome);

            self.set_phase(&mut inner, outcome.phase());
            self.emit(TranscriptEvent::Finished(outcome));
            let snapshot = Self::snapshot(&mut inner);
            self.set_phase(&mut inner, Phase::Idle);
            snapshot
        };

        self.persist(snapshot);
        tracing::info!(session = session_id, outcome = ?outcome, "Co-pilot stream finished");
    }

    fn snapshot(inner: &mut Inner) -> Snapshot {
        inner.snapshot_seq += 1;
        Snapshot {
            seq: inner.snapshot_seq,
            messages: inner.messages.clone(),
        }
    }

    /// Write `snapshot` unless a newer one already reached the store.
    fn persist(&self, snapshot: Snapshot) {
        let mut persisted = self.persisted_seq.lock();
        if snapshot.seq <= *persisted {
            tracing::debug!(seq = snapshot.seq, newest = *persisted, "Skipping stale transcript snapshot");
            return;
        }
        self.store.save(&snapshot.messages);
        *persisted = snapshot.seq;
    }
}

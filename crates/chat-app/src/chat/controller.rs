use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::watch;
use vayal_llm::{
    EndpointSession, Part, SessionEpoch, StreamEvent, StreamEventPayload, StreamSessionId,
    StreamTarget,
};

use crate::chat::events::Submit;
use crate::chat::message::{Conversation, Message, MessageId, StreamOutcome};
use crate::i18n::Language;

/// Surfaced when a submission arrives before any session exists.
pub const SESSION_NOT_READY_ERROR: &str = "Chat session is not initialized.";

/// Immutable view of controller state handed to observers.
///
/// A fresh value is published on every mutation, fragment by fragment;
/// nothing is batched or deferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub language: Language,
    pub messages: Vec<Message>,
    pub loading: bool,
    pub last_error: Option<String>,
    pub session_ready: bool,
}

/// Everything the service needs to dispatch one accepted submission.
#[derive(Clone)]
pub struct SubmitStart {
    pub target: StreamTarget,
    pub assistant_message_id: MessageId,
    pub session: EndpointSession,
    pub parts: Vec<Part>,
}

/// Why a submission did not start a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejection {
    /// Blank text and no image. Silently ignored, never surfaced.
    EmptyInput,
    /// No session yet; already surfaced through `last_error`.
    SessionNotReady,
}

/// Streaming conversation state core.
///
/// Owns the conversation, the session handle and the UI-reactive flags.
/// All methods are synchronous; endpoint IO lives in the service layer.
/// Stream events are routed by the target captured at submit time, so a
/// late event from an abandoned stream cheaply no-ops.
pub struct ChatController {
    language: Language,
    epoch: SessionEpoch,
    session: Option<EndpointSession>,
    conversation: Conversation,
    loading: bool,
    last_error: Option<String>,
    active_streams: HashMap<StreamTarget, MessageId>,
    next_message_id: u64,
    next_stream_id: u64,
    snapshot_tx: watch::Sender<ChatSnapshot>,
}

impl ChatController {
    pub fn new(language: Language) -> Self {
        let initial = ChatSnapshot {
            language,
            messages: Vec::new(),
            loading: false,
            last_error: None,
            session_ready: false,
        };
        let (snapshot_tx, _snapshot_rx) = watch::channel(initial);

        Self {
            language,
            epoch: SessionEpoch::new(0),
            session: None,
            conversation: Conversation::new(),
            loading: false,
            last_error: None,
            active_streams: HashMap::new(),
            next_message_id: 1,
            next_stream_id: 1,
            snapshot_tx,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            language: self.language,
            messages: self.conversation.messages.clone(),
            loading: self.loading,
            last_error: self.last_error.clone(),
            session_ready: self.session.is_some(),
        }
    }

    /// Hands out a change stream any presentation toolkit can adapt to.
    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshot_tx.subscribe()
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    /// Starts a new session generation for `language`.
    ///
    /// Clears the conversation, drops the session and orphans every
    /// in-flight stream; their late events no longer match the epoch.
    /// Returns the new epoch so the caller can guard session installation.
    pub fn begin_reinitialize(&mut self, language: Language) -> SessionEpoch {
        self.epoch = SessionEpoch::new(self.epoch.0.saturating_add(1));
        self.language = language;
        self.session = None;
        self.conversation = Conversation::new();
        self.loading = false;
        self.last_error = None;
        self.active_streams.clear();
        self.publish();

        tracing::debug!(
            epoch = self.epoch.0,
            language = language.tag(),
            "conversation re-initialized"
        );
        self.epoch
    }

    /// Installs a freshly created session, unless the epoch moved on.
    pub fn install_session(&mut self, epoch: SessionEpoch, session: EndpointSession) {
        if epoch != self.epoch {
            tracing::debug!(
                stale_epoch = epoch.0,
                current_epoch = self.epoch.0,
                "dropping session created for an abandoned epoch"
            );
            return;
        }

        self.session = Some(session);
        self.publish();
    }

    /// Surfaces a failed session creation, unless the epoch moved on.
    pub fn fail_session_init(&mut self, epoch: SessionEpoch, message: String) {
        if epoch != self.epoch {
            return;
        }

        tracing::error!(error = %message, "failed to initialize chat session");
        self.last_error = Some(message);
        self.publish();
    }

    /// Applies the synchronous half of a submission: appends the finalized
    /// user message and the empty assistant placeholder, flips the flags
    /// and registers the stream target.
    ///
    /// Part order is fixed to image first, then text, and the text part is
    /// omitted when the text is empty.
    pub fn begin_submit(&mut self, submit: Submit) -> Result<SubmitStart, SubmitRejection> {
        if submit.is_blank() {
            return Err(SubmitRejection::EmptyInput);
        }

        let Some(session) = self.session.clone() else {
            self.last_error = Some(SESSION_NOT_READY_ERROR.to_string());
            self.publish();
            return Err(SubmitRejection::SessionNotReady);
        };

        let timestamp = Utc::now();
        let user_message_id = self.alloc_message_id();
        let assistant_message_id = self.alloc_message_id();
        let target = StreamTarget::new(self.epoch, self.alloc_stream_id());

        let mut parts = Vec::new();
        if let Some(image) = &submit.image {
            parts.push(image.as_part());
        }
        if !submit.text.is_empty() {
            parts.push(Part::text(submit.text.clone()));
        }

        self.conversation.push(Message::user(
            user_message_id,
            submit.text,
            submit.image,
            timestamp,
        ));
        self.conversation
            .push(Message::assistant_streaming(
                assistant_message_id,
                target.stream,
                timestamp,
            ));

        self.active_streams.insert(target, assistant_message_id);
        self.loading = true;
        self.last_error = None;
        self.publish();

        Ok(SubmitStart {
            target,
            assistant_message_id,
            session,
            parts,
        })
    }

    /// Folds one stream event into the conversation.
    ///
    /// Events are routed to the placeholder registered for their target;
    /// anything else is stale and dropped.
    pub fn apply_stream_event(&mut self, event: StreamEvent) {
        if !self.stream_event_is_current(event.target) {
            tracing::debug!(target = ?event.target, "dropping stale stream event");
            return;
        }

        let Some(&message_id) = self.active_streams.get(&event.target) else {
            return;
        };

        match event.payload {
            StreamEventPayload::Delta(chunk) => {
                let _ = self.conversation.apply_fragment(message_id, &chunk);
                self.publish();
            }
            StreamEventPayload::Done => {
                let _ = self
                    .conversation
                    .finalize(message_id, StreamOutcome::Completed);
                self.retire_stream(event.target);
            }
            StreamEventPayload::Error(message) => {
                let _ = self
                    .conversation
                    .finalize(message_id, StreamOutcome::Failed(message.clone()));
                self.last_error = Some(message);
                self.retire_stream(event.target);
            }
        }
    }

    /// Clears the error banner.
    pub fn dismiss_error(&mut self) {
        if self.last_error.take().is_some() {
            self.publish();
        }
    }

    fn retire_stream(&mut self, target: StreamTarget) {
        self.active_streams.remove(&target);
        self.loading = !self.active_streams.is_empty();
        self.publish();
    }

    fn stream_event_is_current(&self, target: StreamTarget) -> bool {
        target.epoch == self.epoch && self.active_streams.contains_key(&target)
    }

    fn alloc_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id = self.next_message_id.saturating_add(1);
        id
    }

    fn alloc_stream_id(&mut self) -> StreamSessionId {
        let id = StreamSessionId::new(self.next_stream_id);
        self.next_stream_id = self.next_stream_id.saturating_add(1);
        id
    }
}

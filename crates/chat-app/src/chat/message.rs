use chrono::{DateTime, Utc};
use vayal_llm::{Part, StreamSessionId};

/// Stable identifier for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle status for one message.
///
/// Content is append-only while `Streaming`; any other status is terminal
/// and freezes the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Streaming(StreamSessionId),
    Done,
    Error(String),
}

/// Raw image bytes with their declared media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub data: Vec<u8>,
    pub media_type: String,
}

impl ImageAttachment {
    pub fn new(data: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            data,
            media_type: media_type.into(),
        }
    }

    /// Converts the attachment into an outgoing request part.
    pub fn as_part(&self) -> Part {
        Part::inline_image(self.data.clone(), self.media_type.clone())
    }
}

/// Core message model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub image: Option<ImageAttachment>,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
}

impl Message {
    /// Creates a message with explicit status.
    pub fn new(
        id: MessageId,
        role: Role,
        content: impl Into<String>,
        image: Option<ImageAttachment>,
        timestamp: DateTime<Utc>,
        status: MessageStatus,
    ) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            image,
            timestamp,
            status,
        }
    }

    /// Creates a finalized user message.
    pub fn user(
        id: MessageId,
        content: impl Into<String>,
        image: Option<ImageAttachment>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(id, Role::User, content, image, timestamp, MessageStatus::Done)
    }

    /// Creates an assistant placeholder while streaming.
    pub fn assistant_streaming(
        id: MessageId,
        stream: StreamSessionId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(
            id,
            Role::Assistant,
            String::new(),
            None,
            timestamp,
            MessageStatus::Streaming(stream),
        )
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.status, MessageStatus::Streaming(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.status, MessageStatus::Error(_))
    }
}

/// How one streaming generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed(String),
}

/// Rejection reason for illegal fold operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldRejection {
    UnknownMessage { id: MessageId },
    NotStreaming { id: MessageId },
}

/// Conversation aggregate: messages totally ordered by append.
///
/// All mutation goes through `push`, `apply_fragment` and `finalize`, which
/// enforce the append-only-while-streaming and immutable-once-final
/// invariants deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Creates an empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    fn find_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|message| message.id == id)
    }

    /// Concatenates one fragment onto a streaming message.
    pub fn apply_fragment(&mut self, id: MessageId, chunk: &str) -> Result<(), FoldRejection> {
        let Some(message) = self.find_mut(id) else {
            return Err(FoldRejection::UnknownMessage { id });
        };

        if !message.is_streaming() {
            return Err(FoldRejection::NotStreaming { id });
        }

        message.content.push_str(chunk);
        Ok(())
    }

    /// Freezes a streaming message with its terminal outcome.
    ///
    /// Failure REPLACES the accumulated content with an error-annotated
    /// string; partial fragments are discarded rather than shown half-done.
    pub fn finalize(&mut self, id: MessageId, outcome: StreamOutcome) -> Result<(), FoldRejection> {
        let Some(message) = self.find_mut(id) else {
            return Err(FoldRejection::UnknownMessage { id });
        };

        if !message.is_streaming() {
            return Err(FoldRejection::NotStreaming { id });
        }

        match outcome {
            StreamOutcome::Completed => {
                message.status = MessageStatus::Done;
            }
            StreamOutcome::Failed(error_text) => {
                message.content = format!("Error: {error_text}");
                message.status = MessageStatus::Error(error_text);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming_message(id: u64) -> Message {
        Message::assistant_streaming(MessageId::new(id), StreamSessionId::new(1), Utc::now())
    }

    #[test]
    fn fragments_concatenate_in_arrival_order() {
        let mut conversation = Conversation::new();
        conversation.push(streaming_message(1));

        for chunk in ["Hi", " there", "!"] {
            conversation
                .apply_fragment(MessageId::new(1), chunk)
                .unwrap();
        }

        assert_eq!(conversation.messages[0].content, "Hi there!");
    }

    #[test]
    fn fragment_after_finalize_is_rejected() {
        let mut conversation = Conversation::new();
        conversation.push(streaming_message(1));
        conversation
            .finalize(MessageId::new(1), StreamOutcome::Completed)
            .unwrap();

        assert_eq!(
            conversation.apply_fragment(MessageId::new(1), "late"),
            Err(FoldRejection::NotStreaming {
                id: MessageId::new(1)
            })
        );
        assert_eq!(conversation.messages[0].content, "");
    }

    #[test]
    fn fragment_for_unknown_message_is_rejected() {
        let mut conversation = Conversation::new();
        assert_eq!(
            conversation.apply_fragment(MessageId::new(9), "x"),
            Err(FoldRejection::UnknownMessage {
                id: MessageId::new(9)
            })
        );
    }

    #[test]
    fn failure_replaces_partial_content() {
        let mut conversation = Conversation::new();
        conversation.push(streaming_message(1));
        conversation.apply_fragment(MessageId::new(1), "ab").unwrap();

        conversation
            .finalize(
                MessageId::new(1),
                StreamOutcome::Failed("quota exceeded".to_string()),
            )
            .unwrap();

        let message = &conversation.messages[0];
        assert_eq!(message.content, "Error: quota exceeded");
        assert!(message.is_error());
    }

    #[test]
    fn double_finalize_is_rejected() {
        let mut conversation = Conversation::new();
        conversation.push(streaming_message(1));
        conversation
            .finalize(MessageId::new(1), StreamOutcome::Completed)
            .unwrap();

        assert_eq!(
            conversation.finalize(MessageId::new(1), StreamOutcome::Completed),
            Err(FoldRejection::NotStreaming {
                id: MessageId::new(1)
            })
        );
    }
}

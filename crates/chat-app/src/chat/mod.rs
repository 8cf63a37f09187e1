/// Streaming lifecycle state core.
pub mod controller;
pub mod events;
/// Domain entities and deterministic fold invariants.
pub mod message;
pub mod service;

pub use controller::{
    ChatController, ChatSnapshot, SESSION_NOT_READY_ERROR, SubmitRejection, SubmitStart,
};
pub use events::{StreamEvent, StreamEventPayload, Submit};
pub use message::{
    Conversation, FoldRejection, ImageAttachment, Message, MessageId, MessageStatus, Role,
    StreamOutcome,
};
pub use service::{ChatService, STREAM_ENDED_EARLY_ERROR};

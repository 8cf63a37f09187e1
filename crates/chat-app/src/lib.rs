#![deny(unsafe_code)]

/// Streaming conversation core for the Farmers Friend assistant.
///
/// This crate owns the chat session lifecycle, folds streamed response
/// fragments into the conversation model and maps endpoint failures into
/// user-visible state. Presentation layers subscribe to snapshots and call
/// the service operations; they never mutate chat state directly.
pub mod chat;
/// Bilingual translation catalog and per-language system instructions.
pub mod i18n;
/// Theme and language persistence.
pub mod settings;
/// Tracing bootstrap for embedding hosts.
pub mod telemetry;

/// Returns a stable marker used by integration smoke tests.
pub fn smoke_marker() -> &'static str {
    "vayal"
}

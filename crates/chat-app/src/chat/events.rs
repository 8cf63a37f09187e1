pub use vayal_llm::{StreamEvent, StreamEventPayload};

use crate::chat::message::ImageAttachment;

/// Emitted when the user submits a prompt to generate a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submit {
    pub text: String,
    pub image: Option<ImageAttachment>,
}

impl Submit {
    /// Creates a submit event from raw input.
    pub fn new(text: impl Into<String>, image: Option<ImageAttachment>) -> Self {
        Self {
            text: text.into(),
            image,
        }
    }

    /// True when there is nothing to send: blank text and no image.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && self.image.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blankness_considers_whitespace_and_attachment() {
        assert!(Submit::new("   ", None).is_blank());
        assert!(!Submit::new("hi", None).is_blank());
        assert!(!Submit::new("", Some(ImageAttachment::new(vec![1], "image/png"))).is_blank());
    }
}

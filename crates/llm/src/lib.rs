use std::sync::Arc;

mod endpoint;
mod gemini;

pub use endpoint::{
    BoxFuture, ChatEndpoint, EndpointConfig, EndpointError, EndpointEventStream, EndpointResult,
    EndpointSession, EndpointStreamHandle, EndpointWorker, Part, SessionEpoch, SessionTurn,
    StreamEvent, StreamEventPayload, StreamRequest, StreamSessionId, StreamTarget, TurnRole,
    make_event_stream,
};
pub use gemini::{DEFAULT_GEMINI_MODEL, GEMINI_BASE_URL, GEMINI_ENDPOINT_ID, GeminiEndpoint};

pub fn create_endpoint(mut config: EndpointConfig) -> EndpointResult<Arc<dyn ChatEndpoint>> {
    if config.endpoint_id.trim().is_empty() {
        config.endpoint_id = GEMINI_ENDPOINT_ID.to_string();
    }

    match config.endpoint_id.as_str() {
        GEMINI_ENDPOINT_ID => Ok(Arc::new(GeminiEndpoint::new(config)?)),
        _ => Err(EndpointError::UnsupportedEndpoint {
            stage: "create-endpoint",
            endpoint_id: config.endpoint_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_endpoint_id_defaults_to_gemini() {
        let endpoint =
            create_endpoint(EndpointConfig::new("", "test-key", "", "")).expect("must build");
        assert_eq!(endpoint.id(), GEMINI_ENDPOINT_ID);
    }

    #[test]
    fn unknown_endpoint_id_is_rejected() {
        let error = create_endpoint(EndpointConfig::new("openai", "test-key", "", ""))
            .err()
            .expect("must fail");
        assert!(matches!(error, EndpointError::UnsupportedEndpoint { .. }));
    }
}

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use snafu::ensure;
use tokio::sync::{mpsc, oneshot};

use crate::endpoint::{
    BoxFuture, ChatEndpoint, EmptyPartsSnafu, EndpointConfig, EndpointError, EndpointResult,
    EndpointSession, EndpointStreamHandle, EndpointWorker, MissingApiKeySnafu, Part, SessionTurn,
    StreamEvent, StreamEventPayload, StreamRequest, StreamTarget, TurnRole, make_event_stream,
};

pub const GEMINI_ENDPOINT_ID: &str = "gemini";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Adapter speaking the Gemini `streamGenerateContent` SSE protocol.
pub struct GeminiEndpoint {
    config: EndpointConfig,
    client: reqwest::Client,
}

impl GeminiEndpoint {
    pub fn new(config: EndpointConfig) -> EndpointResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "gemini-endpoint-new",
                endpoint_id: config.endpoint_id.clone(),
            }
        );

        Ok(Self {
            config,
            client: reqwest::Client::new(),
        })
    }

    fn stream_url(config: &EndpointConfig) -> String {
        let base_url = if config.base_url.is_empty() {
            GEMINI_BASE_URL
        } else {
            config.base_url.as_str()
        };
        let model_id = if config.model_id.is_empty() {
            DEFAULT_GEMINI_MODEL
        } else {
            config.model_id.as_str()
        };

        format!(
            "{base_url}/{model_id}:streamGenerateContent?alt=sse&key={api_key}",
            api_key = config.api_key
        )
    }

    fn wire_part(part: &Part) -> WirePart {
        match part {
            Part::Text(text) => WirePart::Text { text: text.clone() },
            Part::InlineImage { data, media_type } => WirePart::InlineData {
                inline_data: InlineDataPayload {
                    mime_type: media_type.clone(),
                    data: BASE64_STANDARD.encode(data),
                },
            },
        }
    }

    fn wire_turn(turn: &SessionTurn) -> WireContent {
        let role = match turn.role {
            TurnRole::User => "user",
            TurnRole::Model => "model",
        };
        WireContent {
            role: role.to_string(),
            parts: turn.parts.iter().map(Self::wire_part).collect(),
        }
    }

    /// Replays the session history, then appends the new user turn.
    fn build_request_body(session: &EndpointSession, parts: &[Part]) -> GenerateContentRequest {
        let mut contents = session
            .history_snapshot()
            .iter()
            .map(Self::wire_turn)
            .collect::<Vec<_>>();

        contents.push(WireContent {
            role: "user".to_string(),
            parts: parts.iter().map(Self::wire_part).collect(),
        });

        GenerateContentRequest {
            contents,
            system_instruction: Some(WireContent {
                role: "system".to_string(),
                parts: vec![WirePart::Text {
                    text: session.system_instruction().to_string(),
                }],
            }),
        }
    }

    /// Extracts the fragment text carried by one SSE chunk.
    fn chunk_text(response: GenerateContentResponse) -> String {
        response
            .candidates
            .and_then(|mut candidates| {
                if candidates.is_empty() {
                    None
                } else {
                    Some(candidates.swap_remove(0))
                }
            })
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    /// Prefers the structured API error message over the raw body.
    fn error_message(body: &str) -> String {
        if let Ok(wrapper) = serde_json::from_str::<ErrorWrapper>(body)
            && let Some(message) = wrapper.error.message
            && !message.trim().is_empty()
        {
            return message;
        }

        let trimmed = body.trim();
        if trimmed.is_empty() {
            "unknown endpoint error".to_string()
        } else {
            trimmed.to_string()
        }
    }

    fn emit_error_event(
        event_tx: &mpsc::UnboundedSender<StreamEvent>,
        target: StreamTarget,
        error: EndpointError,
    ) {
        let _ = event_tx.send(StreamEvent {
            target,
            payload: StreamEventPayload::Error(error.to_string()),
        });
    }

    async fn run_stream_worker(
        client: reqwest::Client,
        config: EndpointConfig,
        session: EndpointSession,
        request: StreamRequest,
        event_tx: mpsc::UnboundedSender<StreamEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let target = request.target;
        let body = Self::build_request_body(&session, &request.parts);
        let url = Self::stream_url(&config);

        let response = match client.post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(source) => {
                tracing::error!(
                    target = ?target,
                    endpoint_id = %config.endpoint_id,
                    error = %source,
                    "failed to open endpoint stream"
                );
                Self::emit_error_event(
                    &event_tx,
                    target,
                    EndpointError::HttpRequest {
                        stage: "open-stream",
                        source,
                    },
                );
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read endpoint error body".to_string());
            tracing::warn!(
                target = ?target,
                status = status.as_u16(),
                "endpoint rejected stream request"
            );
            Self::emit_error_event(
                &event_tx,
                target,
                EndpointError::EndpointStatus {
                    stage: "stream-http-status",
                    status: status.as_u16(),
                    message: Self::error_message(&body_text),
                },
            );
            return;
        }

        let mut events = response.bytes_stream().eventsource();
        let mut accumulated = String::new();
        let mut cancelled = false;
        let mut stream_failed = false;

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    cancelled = true;
                    tracing::debug!(target = ?target, "endpoint stream cancelled");
                    break;
                }
                next_event = events.next() => {
                    match next_event {
                        Some(Ok(event)) => {
                            match serde_json::from_str::<GenerateContentResponse>(&event.data) {
                                Ok(chunk) => {
                                    let text = Self::chunk_text(chunk);
                                    if text.is_empty() {
                                        continue;
                                    }
                                    accumulated.push_str(&text);
                                    let delta = StreamEvent {
                                        target,
                                        payload: StreamEventPayload::Delta(text),
                                    };
                                    if event_tx.send(delta).is_err() {
                                        return;
                                    }
                                }
                                Err(source) => {
                                    stream_failed = true;
                                    tracing::warn!(
                                        target = ?target,
                                        error = %source,
                                        "endpoint stream carried a malformed chunk"
                                    );
                                    Self::emit_error_event(
                                        &event_tx,
                                        target,
                                        EndpointError::ResponseParse {
                                            stage: "decode-stream-chunk",
                                            details: source.to_string(),
                                        },
                                    );
                                    break;
                                }
                            }
                        }
                        Some(Err(source)) => {
                            stream_failed = true;
                            tracing::warn!(
                                target = ?target,
                                error = %source,
                                "endpoint stream emitted an error chunk"
                            );
                            Self::emit_error_event(
                                &event_tx,
                                target,
                                EndpointError::StreamDecode {
                                    stage: "stream-chunk",
                                    source,
                                },
                            );
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if !cancelled && !stream_failed {
            // The exchange joins the session context only after natural completion.
            session.record_exchange(request.parts, accumulated);
            let _ = event_tx.send(StreamEvent {
                target,
                payload: StreamEventPayload::Done,
            });
        }
    }
}

impl ChatEndpoint for GeminiEndpoint {
    fn id(&self) -> &str {
        &self.config.endpoint_id
    }

    fn name(&self) -> &str {
        "Gemini"
    }

    fn create_session<'a>(
        &'a self,
        system_instruction: &'a str,
    ) -> BoxFuture<'a, EndpointResult<EndpointSession>> {
        Box::pin(async move { Ok(EndpointSession::new(system_instruction)) })
    }

    fn stream_message(
        &self,
        session: &EndpointSession,
        request: StreamRequest,
    ) -> EndpointResult<EndpointStreamHandle> {
        ensure!(
            !request.parts.is_empty(),
            EmptyPartsSnafu {
                stage: "stream-message",
                target: request.target,
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream(request.target);
        let worker: EndpointWorker = Box::pin(Self::run_stream_worker(
            self.client.clone(),
            self.config.clone(),
            session.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(EndpointStreamHandle { stream, worker })
    }
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<WireContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
}

#[derive(Debug, Serialize)]
struct WireContent {
    role: String,
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WirePart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineDataPayload,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataPayload {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{SessionEpoch, StreamSessionId};

    fn target() -> StreamTarget {
        StreamTarget::new(SessionEpoch::new(1), StreamSessionId::new(1))
    }

    fn test_config() -> EndpointConfig {
        EndpointConfig::new(GEMINI_ENDPOINT_ID, "test-key", "", "")
    }

    #[test]
    fn missing_api_key_fails_construction() {
        let config = EndpointConfig::new(GEMINI_ENDPOINT_ID, "  ", "", "");
        let error = GeminiEndpoint::new(config).err().expect("must fail");
        assert!(matches!(error, EndpointError::MissingApiKey { .. }));
    }

    #[test]
    fn empty_parts_are_rejected_before_any_network_call() {
        let endpoint = GeminiEndpoint::new(test_config()).unwrap();
        let session = EndpointSession::new("instruction");
        let error = endpoint
            .stream_message(&session, StreamRequest::new(target(), Vec::new()))
            .err()
            .expect("must fail");
        assert!(matches!(error, EndpointError::EmptyParts { .. }));
        assert_eq!(error.to_string(), "Cannot send an empty message.");
    }

    #[test]
    fn request_body_keeps_image_part_before_text_part() {
        let session = EndpointSession::new("advise farmers");
        let parts = vec![
            Part::inline_image(vec![1, 2], "image/png"),
            Part::text("what is this?"),
        ];

        let body = GeminiEndpoint::build_request_body(&session, &parts);
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(
            value["contents"][0]["parts"][0]["inlineData"]["mimeType"],
            "image/png"
        );
        assert_eq!(value["contents"][0]["parts"][0]["inlineData"]["data"], "AQI=");
        assert_eq!(value["contents"][0]["parts"][1]["text"], "what is this?");
        assert_eq!(
            value["systemInstruction"]["parts"][0]["text"],
            "advise farmers"
        );
    }

    #[test]
    fn request_body_replays_recorded_history_first() {
        let session = EndpointSession::new("advise farmers");
        session.record_exchange(vec![Part::text("hello")], "hi there".to_string());

        let body = GeminiEndpoint::build_request_body(&session, &[Part::text("next")]);
        let value = serde_json::to_value(&body).unwrap();
        let contents = value["contents"].as_array().unwrap();

        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["text"], "hello");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "hi there");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(contents[2]["parts"][0]["text"], "next");
    }

    #[test]
    fn chunk_text_concatenates_candidate_parts() {
        let chunk: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hi"},{"text":" there"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(GeminiEndpoint::chunk_text(chunk), "Hi there");
    }

    #[test]
    fn chunk_without_candidates_yields_empty_text() {
        let chunk: GenerateContentResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert_eq!(GeminiEndpoint::chunk_text(chunk), "");
    }

    #[test]
    fn error_message_prefers_structured_api_error() {
        let body = r#"{"error":{"code":429,"message":"quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(GeminiEndpoint::error_message(body), "quota exceeded");
        assert_eq!(GeminiEndpoint::error_message("plain failure"), "plain failure");
        assert_eq!(GeminiEndpoint::error_message("  "), "unknown endpoint error");
    }

    #[test]
    fn stream_url_falls_back_to_defaults() {
        let url = GeminiEndpoint::stream_url(&test_config());
        assert_eq!(
            url,
            format!(
                "{GEMINI_BASE_URL}/{DEFAULT_GEMINI_MODEL}:streamGenerateContent?alt=sse&key=test-key"
            )
        );
    }
}

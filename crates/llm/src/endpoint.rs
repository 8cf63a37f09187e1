use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

use crate::gemini::{DEFAULT_GEMINI_MODEL, GEMINI_BASE_URL, GEMINI_ENDPOINT_ID};

/// Generation of the controller-side session; bumped on every re-initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionEpoch(pub u64);

impl SessionEpoch {
    /// Creates a typed session epoch.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier for one streaming generation.
///
/// This must change on every submit so stale fragments can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    /// Creates a typed stream session identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Stream routing key used for stale-fragment rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub epoch: SessionEpoch,
    pub stream: StreamSessionId,
}

impl StreamTarget {
    /// Builds a full stream target from epoch and stream IDs.
    pub const fn new(epoch: SessionEpoch, stream: StreamSessionId) -> Self {
        Self { epoch, stream }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub endpoint_id: String,
    pub api_key: String,
    pub base_url: String,
    pub model_id: String,
}

impl EndpointConfig {
    pub fn new(
        endpoint_id: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            base_url: base_url.into().trim().to_string(),
            model_id: model_id.into().trim().to_string(),
        }
    }

    /// Reads the endpoint credential and overrides from the process environment.
    ///
    /// A missing `GEMINI_API_KEY` fails construction before any session exists.
    pub fn from_env() -> EndpointResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let Some(api_key) = api_key else {
            return MissingApiKeySnafu {
                stage: "config-from-env",
                endpoint_id: GEMINI_ENDPOINT_ID.to_string(),
            }
            .fail();
        };

        let model_id = std::env::var("GEMINI_MODEL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());

        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| GEMINI_BASE_URL.to_string());

        Ok(Self::new(GEMINI_ENDPOINT_ID, api_key, base_url, model_id))
    }
}

/// One piece of a multimodal prompt.
///
/// The controller fixes part order to image parts first, then the text part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    InlineImage { data: Vec<u8>, media_type: String },
}

impl Part {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    pub fn inline_image(data: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self::InlineImage {
            data,
            media_type: media_type.into(),
        }
    }
}

/// Speaker of one recorded session turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnRole {
    User,
    Model,
}

/// One completed exchange half kept inside the session context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTurn {
    pub role: TurnRole,
    pub parts: Vec<Part>,
}

struct SessionInner {
    system_instruction: String,
    history: Mutex<Vec<SessionTurn>>,
}

/// Opaque conversational context bound to one system instruction.
///
/// History accumulates inside the handle and is replayed on every request;
/// callers never read it back. A failed stream records nothing, so a retry
/// is not contaminated by a half-answer.
#[derive(Clone)]
pub struct EndpointSession {
    inner: Arc<SessionInner>,
}

impl EndpointSession {
    pub fn new(system_instruction: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                system_instruction: system_instruction.into(),
                history: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn system_instruction(&self) -> &str {
        &self.inner.system_instruction
    }

    /// Copies the recorded turns for request building.
    pub fn history_snapshot(&self) -> Vec<SessionTurn> {
        self.inner
            .history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    /// Records one successful user/model exchange.
    ///
    /// Called by adapters after natural stream completion only.
    pub fn record_exchange(&self, user_parts: Vec<Part>, model_text: String) {
        if let Ok(mut history) = self.inner.history.lock() {
            history.push(SessionTurn {
                role: TurnRole::User,
                parts: user_parts,
            });
            history.push(SessionTurn {
                role: TurnRole::Model,
                parts: vec![Part::Text(model_text)],
            });
        }
    }
}

/// One streamed request against a session context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub target: StreamTarget,
    pub parts: Vec<Part>,
}

impl StreamRequest {
    pub fn new(target: StreamTarget, parts: Vec<Part>) -> Self {
        Self { target, parts }
    }
}

/// Endpoint stream payload mapped into domain language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    Delta(String),
    Done,
    Error(String),
}

/// Emitted by adapter workers, routed by target on the consuming side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type EndpointWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type EndpointResult<T> = Result<T, EndpointError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EndpointError {
    #[snafu(display("missing API key for endpoint '{endpoint_id}'"))]
    MissingApiKey {
        stage: &'static str,
        endpoint_id: String,
    },
    #[snafu(display("endpoint '{endpoint_id}' is not supported"))]
    UnsupportedEndpoint {
        stage: &'static str,
        endpoint_id: String,
    },
    #[snafu(display("Cannot send an empty message."))]
    EmptyParts {
        stage: &'static str,
        target: StreamTarget,
    },
    #[snafu(display("endpoint request failed on `{stage}`, {source}"))]
    HttpRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("endpoint returned status {status}: {message}"))]
    EndpointStatus {
        stage: &'static str,
        status: u16,
        message: String,
    },
    #[snafu(display("endpoint stream decode failed on `{stage}`, {source}"))]
    StreamDecode {
        stage: &'static str,
        source: eventsource_stream::EventStreamError<reqwest::Error>,
    },
    #[snafu(display("failed to parse endpoint response: {details}"))]
    ResponseParse {
        stage: &'static str,
        details: String,
    },
}

pub struct EndpointEventStream {
    target: StreamTarget,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct EndpointStreamHandle {
    pub stream: EndpointEventStream,
    pub worker: EndpointWorker,
}

impl EndpointEventStream {
    fn new(
        target: StreamTarget,
        events: mpsc::UnboundedReceiver<StreamEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            target,
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub fn target(&self) -> StreamTarget {
        self.target
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        self.events.try_recv().ok()
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for EndpointEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Remote chat endpoint contract.
///
/// `create_session` binds a system instruction to a fresh opaque context;
/// `stream_message` produces a finite, non-restartable sequence of text
/// fragments terminated by `Done` or a single `Error` event.
pub trait ChatEndpoint: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn create_session<'a>(
        &'a self,
        system_instruction: &'a str,
    ) -> BoxFuture<'a, EndpointResult<EndpointSession>>;
    fn stream_message(
        &self,
        session: &EndpointSession,
        request: StreamRequest,
    ) -> EndpointResult<EndpointStreamHandle>;
}

/// Wires up the channel triple adapter workers feed.
///
/// Dropping the returned stream fires the cancel signal, so abandoning a
/// consumer stops endpoint IO promptly.
pub fn make_event_stream(
    target: StreamTarget,
) -> (
    mpsc::UnboundedSender<StreamEvent>,
    EndpointEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        EndpointEventStream::new(target, event_rx, cancel_tx),
        cancel_rx,
    )
}

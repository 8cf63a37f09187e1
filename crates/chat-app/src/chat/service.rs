use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use vayal_llm::{
    ChatEndpoint, EndpointConfig, EndpointEventStream, EndpointResult, EndpointStreamHandle,
    StreamEvent, StreamEventPayload, StreamRequest, create_endpoint,
};

use crate::chat::controller::{ChatController, ChatSnapshot, SubmitRejection};
use crate::chat::events::Submit;
use crate::i18n::{Language, system_instruction};

/// Mapped to a stream failure when the event channel closes silently.
pub const STREAM_ENDED_EARLY_ERROR: &str = "endpoint stream ended before a terminal event";

struct StreamTasks {
    worker: JoinHandle<()>,
    reader: JoinHandle<()>,
}

/// Async orchestration shell around [`ChatController`].
///
/// Owns the endpoint, creates sessions per language and spawns the
/// worker/reader pair for each accepted submission. Dropping the reader
/// drops the event stream, which signals cancellation to the worker, so
/// re-initialization doubles as implicit stream cancellation.
pub struct ChatService {
    endpoint: Arc<dyn ChatEndpoint>,
    controller: Arc<Mutex<ChatController>>,
    stream_tasks: Mutex<Vec<StreamTasks>>,
}

impl ChatService {
    pub fn new(endpoint: Arc<dyn ChatEndpoint>, language: Language) -> Self {
        Self {
            endpoint,
            controller: Arc::new(Mutex::new(ChatController::new(language))),
            stream_tasks: Mutex::new(Vec::new()),
        }
    }

    /// Builds the service against the environment-configured endpoint.
    ///
    /// Fails loudly when the credential is absent, before any UI exists.
    pub fn from_env(language: Language) -> EndpointResult<Self> {
        let config = EndpointConfig::from_env()?;
        let endpoint = create_endpoint(config)?;
        Ok(Self::new(endpoint, language))
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.with_controller(|controller| controller.snapshot())
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.with_controller(|controller| controller.subscribe())
    }

    /// Creates the session for the current language.
    pub async fn initialize(&self) {
        let language = self.with_controller(|controller| controller.language());
        self.set_language(language).await;
    }

    /// Re-initializes for `language`: fresh session, empty conversation.
    ///
    /// In-flight streams are aborted; their late events would be rejected
    /// by the epoch guard anyway.
    pub async fn set_language(&self, language: Language) {
        self.abort_stream_tasks();
        let epoch = self.with_controller(|controller| controller.begin_reinitialize(language));

        match self
            .endpoint
            .create_session(system_instruction(language))
            .await
        {
            Ok(session) => {
                tracing::info!(language = language.tag(), "chat session created");
                self.with_controller(|controller| controller.install_session(epoch, session));
            }
            Err(error) => {
                tracing::error!(
                    language = language.tag(),
                    error = %error,
                    "chat session creation failed"
                );
                self.with_controller(|controller| {
                    controller.fail_session_init(epoch, error.to_string())
                });
            }
        }
    }

    /// Submits user input and starts streaming the response.
    ///
    /// Returns once the request is dispatched; fragments arrive through the
    /// snapshot subscription as they are folded in.
    pub async fn submit(&self, submit: Submit) {
        self.prune_finished_tasks();

        let start = match self.with_controller(|controller| controller.begin_submit(submit)) {
            Ok(start) => start,
            // UI-level guards normally prevent this; stay silent.
            Err(SubmitRejection::EmptyInput) => return,
            // Already surfaced through `last_error`.
            Err(SubmitRejection::SessionNotReady) => return,
        };

        let request = StreamRequest::new(start.target, start.parts);
        match self.endpoint.stream_message(&start.session, request) {
            Ok(handle) => self.spawn_stream_pipeline(handle),
            Err(error) => {
                self.with_controller(|controller| {
                    controller.apply_stream_event(StreamEvent {
                        target: start.target,
                        payload: StreamEventPayload::Error(error.to_string()),
                    })
                });
            }
        }
    }

    /// Clears the error banner.
    pub fn dismiss_error(&self) {
        self.with_controller(|controller| controller.dismiss_error());
    }

    fn spawn_stream_pipeline(&self, handle: EndpointStreamHandle) {
        let worker = tokio::spawn(handle.worker);
        let reader = tokio::spawn(Self::run_stream_reader(
            self.controller.clone(),
            handle.stream,
        ));

        lock_ignoring_poison(&self.stream_tasks).push(StreamTasks { worker, reader });
    }

    async fn run_stream_reader(
        controller: Arc<Mutex<ChatController>>,
        mut stream: EndpointEventStream,
    ) {
        let target = stream.target();
        let mut saw_terminal = false;

        while let Some(event) = stream.recv().await {
            if matches!(
                event.payload,
                StreamEventPayload::Done | StreamEventPayload::Error(_)
            ) {
                saw_terminal = true;
            }
            lock_ignoring_poison(&controller).apply_stream_event(event);
        }

        if !saw_terminal {
            // The stale-event guard makes this a no-op for abandoned streams.
            lock_ignoring_poison(&controller).apply_stream_event(StreamEvent {
                target,
                payload: StreamEventPayload::Error(STREAM_ENDED_EARLY_ERROR.to_string()),
            });
        }
    }

    fn abort_stream_tasks(&self) {
        let tasks = {
            let mut stream_tasks = lock_ignoring_poison(&self.stream_tasks);
            std::mem::take(&mut *stream_tasks)
        };

        for task in tasks {
            // Aborting the reader drops the event stream, which cancels the
            // worker's endpoint IO through the oneshot signal.
            task.reader.abort();
            task.worker.abort();
        }
    }

    fn prune_finished_tasks(&self) {
        lock_ignoring_poison(&self.stream_tasks)
            .retain(|task| !(task.reader.is_finished() && task.worker.is_finished()));
    }

    fn with_controller<R>(&self, f: impl FnOnce(&mut ChatController) -> R) -> R {
        f(&mut lock_ignoring_poison(&self.controller))
    }
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use tokio::sync::Notify;
    use vayal_llm::{
        BoxFuture, EndpointSession, EndpointStreamHandle, EndpointWorker, make_event_stream,
    };

    use super::*;
    use crate::chat::controller::SESSION_NOT_READY_ERROR;
    use crate::chat::message::{ImageAttachment, MessageStatus, Role};

    #[derive(Clone)]
    enum StreamScript {
        Fragments(Vec<&'static str>),
        FailAfter(Vec<&'static str>, &'static str),
        Gated {
            gate: Arc<Notify>,
            fragments: Vec<&'static str>,
        },
    }

    /// In-memory endpoint producing scripted event streams, in the same
    /// worker/channel shape as the real adapter.
    struct ScriptedEndpoint {
        scripts: Mutex<VecDeque<StreamScript>>,
    }

    impl ScriptedEndpoint {
        fn new(scripts: Vec<StreamScript>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
            })
        }

        fn next_script(&self) -> StreamScript {
            lock_ignoring_poison(&self.scripts)
                .pop_front()
                .unwrap_or(StreamScript::Fragments(Vec::new()))
        }
    }

    impl ChatEndpoint for ScriptedEndpoint {
        fn id(&self) -> &str {
            "scripted"
        }

        fn name(&self) -> &str {
            "Scripted"
        }

        fn create_session<'a>(
            &'a self,
            system_instruction: &'a str,
        ) -> BoxFuture<'a, EndpointResult<EndpointSession>> {
            Box::pin(async move { Ok(EndpointSession::new(system_instruction)) })
        }

        fn stream_message(
            &self,
            _session: &EndpointSession,
            request: StreamRequest,
        ) -> EndpointResult<EndpointStreamHandle> {
            let script = self.next_script();
            let target = request.target;
            let (event_tx, stream, _cancel_rx) = make_event_stream(target);

            let worker: EndpointWorker = Box::pin(async move {
                let send = |payload: StreamEventPayload| {
                    event_tx.send(StreamEvent { target, payload }).is_ok()
                };

                match script {
                    StreamScript::Fragments(fragments) => {
                        for fragment in fragments {
                            if !send(StreamEventPayload::Delta(fragment.to_string())) {
                                return;
                            }
                        }
                        send(StreamEventPayload::Done);
                    }
                    StreamScript::FailAfter(fragments, message) => {
                        for fragment in fragments {
                            if !send(StreamEventPayload::Delta(fragment.to_string())) {
                                return;
                            }
                        }
                        send(StreamEventPayload::Error(message.to_string()));
                    }
                    StreamScript::Gated { gate, fragments } => {
                        gate.notified().await;
                        for fragment in fragments {
                            if !send(StreamEventPayload::Delta(fragment.to_string())) {
                                return;
                            }
                        }
                        send(StreamEventPayload::Done);
                    }
                }
            });

            Ok(EndpointStreamHandle { stream, worker })
        }
    }

    async fn wait_for(
        observer: &mut watch::Receiver<ChatSnapshot>,
        predicate: impl Fn(&ChatSnapshot) -> bool,
    ) -> ChatSnapshot {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                {
                    let snapshot = observer.borrow_and_update();
                    if predicate(&snapshot) {
                        return snapshot.clone();
                    }
                }
                observer.changed().await.expect("snapshot channel closed");
            }
        })
        .await
        .expect("condition not reached in time")
    }

    #[tokio::test]
    async fn happy_path_streams_fragments_to_completion() {
        let endpoint = ScriptedEndpoint::new(vec![StreamScript::Fragments(vec![
            "Hi", " there", "!",
        ])]);
        let service = ChatService::new(endpoint, Language::En);
        service.initialize().await;
        let mut observer = service.subscribe();

        service.submit(Submit::new("Hello", None)).await;
        let snapshot = wait_for(&mut observer, |snapshot| {
            !snapshot.loading && snapshot.messages.len() == 2
        })
        .await;

        assert_eq!(snapshot.messages[0].role, Role::User);
        assert_eq!(snapshot.messages[0].content, "Hello");
        let assistant = &snapshot.messages[1];
        assert_eq!(assistant.role, Role::Assistant);
        assert_eq!(assistant.content, "Hi there!");
        assert_eq!(assistant.status, MessageStatus::Done);
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test]
    async fn immediate_failure_marks_the_placeholder() {
        let endpoint = ScriptedEndpoint::new(vec![StreamScript::FailAfter(
            Vec::new(),
            "quota exceeded",
        )]);
        let service = ChatService::new(endpoint, Language::En);
        service.initialize().await;
        let mut observer = service.subscribe();

        let image = ImageAttachment::new(vec![0xFF, 0xD8], "image/jpeg");
        service.submit(Submit::new("", Some(image))).await;
        let snapshot = wait_for(&mut observer, |snapshot| {
            !snapshot.loading && snapshot.messages.len() == 2
        })
        .await;

        let assistant = &snapshot.messages[1];
        assert_eq!(assistant.content, "Error: quota exceeded");
        assert!(assistant.is_error());
        assert_eq!(snapshot.last_error.as_deref(), Some("quota exceeded"));
    }

    #[tokio::test]
    async fn failure_after_partial_fragments_replaces_content() {
        let endpoint =
            ScriptedEndpoint::new(vec![StreamScript::FailAfter(vec!["ab"], "boom")]);
        let service = ChatService::new(endpoint, Language::En);
        service.initialize().await;
        let mut observer = service.subscribe();

        service.submit(Submit::new("q", None)).await;
        let snapshot = wait_for(&mut observer, |snapshot| !snapshot.loading).await;

        assert_eq!(snapshot.messages[1].content, "Error: boom");
    }

    #[tokio::test]
    async fn submit_before_initialize_surfaces_session_not_ready() {
        let endpoint = ScriptedEndpoint::new(Vec::new());
        let service = ChatService::new(endpoint, Language::En);

        service.submit(Submit::new("x", None)).await;

        let snapshot = service.snapshot();
        assert_eq!(
            snapshot.last_error.as_deref(),
            Some(SESSION_NOT_READY_ERROR)
        );
        assert!(snapshot.messages.is_empty());
        assert!(!snapshot.loading);
    }

    #[tokio::test]
    async fn blank_submit_is_silently_ignored() {
        let endpoint = ScriptedEndpoint::new(Vec::new());
        let service = ChatService::new(endpoint, Language::En);
        service.initialize().await;

        service.submit(Submit::new("   ", None)).await;

        let snapshot = service.snapshot();
        assert!(snapshot.messages.is_empty());
        assert!(!snapshot.loading);
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test]
    async fn language_change_mid_stream_starts_an_empty_conversation() {
        let gate = Arc::new(Notify::new());
        let endpoint = ScriptedEndpoint::new(vec![StreamScript::Gated {
            gate: gate.clone(),
            fragments: vec!["late"],
        }]);
        let service = ChatService::new(endpoint, Language::En);
        service.initialize().await;
        let mut observer = service.subscribe();

        service.submit(Submit::new("Hello", None)).await;
        wait_for(&mut observer, |snapshot| snapshot.messages.len() == 2).await;

        service.set_language(Language::Ta).await;
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = service.snapshot();
        assert_eq!(snapshot.language, Language::Ta);
        assert!(snapshot.messages.is_empty());
        assert!(!snapshot.loading);
        assert!(snapshot.session_ready);
    }
}

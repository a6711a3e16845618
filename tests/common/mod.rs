#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ Arc, Mutex };
use tokio::sync::{ mpsc, Notify };

use roboki_studio::events::EventBus;
use roboki_studio::llm::{ FragmentStream, GenerationClient, GenerationError };
use roboki_studio::models::decision::Decision;
use roboki_studio::models::document::CanvasTool;
use roboki_studio::models::source::Source;
use roboki_studio::models::websocket::ServerMessage;
use roboki_studio::workspace::Workspace;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Classify {
        prompt: String,
        sources: usize,
    },
    StreamText {
        prompt: String,
    },
    StreamVisualization {
        content: String,
        tool: CanvasTool,
        sources: usize,
    },
}

#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Fail,
    /// Waits until `ScriptedClient::release` is called.
    Wait,
}

pub fn text_steps(parts: &[&str]) -> Vec<Step> {
    parts
        .iter()
        .map(|p| Step::Text(p.to_string()))
        .collect()
}

/// A generation client that replays canned answers and records each call.
#[derive(Default)]
pub struct ScriptedClient {
    decisions: Mutex<VecDeque<Result<Decision, GenerationError>>>,
    text: Mutex<VecDeque<Vec<Step>>>,
    markup: Mutex<VecDeque<Vec<Step>>>,
    calls: Mutex<Vec<Call>>,
    gate: Arc<Notify>,
    panic_on_stream: AtomicBool,
}

impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_decision(&self, decision: Decision) {
        self.decisions.lock().unwrap().push_back(Ok(decision));
    }

    pub fn push_classify_failure(&self) {
        self.decisions.lock().unwrap().push_back(
            Err(GenerationError::Api {
                status: 503,
                message: "unavailable".into(),
            })
        );
    }

    pub fn push_classify_error(&self, error: GenerationError) {
        self.decisions.lock().unwrap().push_back(Err(error));
    }

    /// The next stream request panics inside the caller's task.
    pub fn panic_on_next_stream(&self) {
        self.panic_on_stream.store(true, Ordering::SeqCst);
    }

    fn maybe_panic(&self) {
        if self.panic_on_stream.swap(false, Ordering::SeqCst) {
            panic!("scripted stream failure");
        }
    }

    pub fn push_text(&self, steps: Vec<Step>) {
        self.text.lock().unwrap().push_back(steps);
    }

    pub fn push_markup(&self, steps: Vec<Step>) {
        self.markup.lock().unwrap().push_back(steps);
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn replay(&self, steps: Vec<Step>) -> FragmentStream {
        let (tx, rx) = mpsc::channel(8);
        let gate = Arc::clone(&self.gate);
        tokio::spawn(async move {
            for step in steps {
                let item = match step {
                    Step::Text(text) => Ok(text),
                    Step::Fail => Err(GenerationError::InvalidResponse("stream broke".into())),
                    Step::Wait => {
                        gate.notified().await;
                        continue;
                    }
                };
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });
        tokio_stream::wrappers::ReceiverStream::new(rx).boxed()
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn classify(&self, prompt: &str, sources: &[Source]) -> Result<Decision, GenerationError> {
        self.calls.lock().unwrap().push(Call::Classify {
            prompt: prompt.to_string(),
            sources: sources.len(),
        });
        self.decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Decision::fallback()))
    }

    async fn stream_text(&self, prompt: &str) -> Result<FragmentStream, GenerationError> {
        self.calls.lock().unwrap().push(Call::StreamText { prompt: prompt.to_string() });
        self.maybe_panic();
        let steps = self.text.lock().unwrap().pop_front().unwrap_or_default();
        Ok(self.replay(steps))
    }

    async fn stream_visualization(
        &self,
        content: &str,
        tool: CanvasTool,
        sources: &[Source]
    ) -> Result<FragmentStream, GenerationError> {
        self.calls.lock().unwrap().push(Call::StreamVisualization {
            content: content.to_string(),
            tool,
            sources: sources.len(),
        });
        self.maybe_panic();
        let steps = self.markup.lock().unwrap().pop_front().unwrap_or_default();
        Ok(self.replay(steps))
    }

    fn get_model(&self) -> String {
        "scripted".to_string()
    }
}

pub struct Harness {
    pub client: Arc<ScriptedClient>,
    pub workspace: Arc<Workspace>,
    pub bus: EventBus,
    pub events: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Harness {
    pub fn new() -> Self {
        let client = ScriptedClient::new();
        let (bus, events) = EventBus::channel();
        let workspace = Arc::new(Workspace::new(client.clone(), bus.clone()));
        Self { client, workspace, bus, events }
    }

    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

pub fn create_document(title: &str, summary: &str, response_text: &str) -> Decision {
    Decision::CreateDocument {
        response_text: response_text.into(),
        title: title.into(),
        summary: summary.into(),
    }
}

/// Polls until `check` holds, failing after roughly a second.
pub async fn wait_until<F, Fut>(mut check: F)
    where F: FnMut() -> Fut, Fut: std::future::Future<Output = bool>
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

use async_trait::async_trait;
use chrono::Utc;
use log::{ error, info, warn };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::citations;
use crate::events::EventBus;
use crate::llm::GenerationClient;
use crate::models::chat::{ DocumentLink, Message };
use crate::models::decision::Decision;
use crate::models::document::DocumentId;
use crate::models::source::{ Source, SourceSummary };
use crate::models::websocket::ServerMessage;
use crate::registry::DocumentRegistry;
use crate::studio::StudioError;

pub const APOLOGY_TEXT: &str = "I'm sorry, I ran into an issue. Please try again.";

/// Creates a document for `title`, opens it and streams its content.
/// Resolves with the new id only once streaming has finished.
#[async_trait]
pub trait DocumentCreator: Send + Sync {
    async fn create_and_stream(
        &self,
        prompt: &str,
        title: &str,
        summary: &str
    ) -> Result<DocumentId, StudioError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("a message is already being processed")]
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank prompt; nothing was appended.
    Ignored,
    Replied,
    DocumentCreated(DocumentId),
    /// The apology message was appended.
    Failed,
}

struct ConversationState {
    messages: Vec<Message>,
    sources: Vec<Source>,
}

/// Clears the loading flag on drop, even if the turn panics.
struct LoadingGuard<'a> {
    loading: &'a AtomicBool,
    events: &'a EventBus,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.loading.store(false, Ordering::SeqCst);
        self.events.publish(ServerMessage::Loading { active: false });
    }
}

pub struct ConversationController {
    client: Arc<dyn GenerationClient>,
    registry: Arc<DocumentRegistry>,
    creator: Arc<dyn DocumentCreator>,
    events: EventBus,
    state: Mutex<ConversationState>,
    loading: AtomicBool,
}

impl ConversationController {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        registry: Arc<DocumentRegistry>,
        creator: Arc<dyn DocumentCreator>,
        events: EventBus
    ) -> Self {
        Self {
            client,
            registry,
            creator,
            events,
            state: Mutex::new(ConversationState {
                messages: Vec::new(),
                sources: Vec::new(),
            }),
            loading: AtomicBool::new(false),
        }
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.messages.clone()
    }

    pub async fn sources(&self) -> Vec<Source> {
        self.state.lock().await.sources.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub async fn add_source(&self, source: Source) {
        let mut state = self.state.lock().await;
        info!("Adding source '{}' ({}, {} bytes)", source.name, source.mime_type, source.data.len());
        state.sources.push(source);
        self.publish_sources(&state.sources);
    }

    /// Removes by position. Out-of-range indices are ignored.
    pub async fn remove_source(&self, index: usize) -> Option<Source> {
        let mut state = self.state.lock().await;
        if index >= state.sources.len() {
            warn!("No source at index {} ({} attached)", index, state.sources.len());
            return None;
        }
        let removed = state.sources.remove(index);
        self.publish_sources(&state.sources);
        Some(removed)
    }

    pub async fn clear_chat(&self) {
        let mut state = self.state.lock().await;
        state.messages.clear();
        state.sources.clear();
        self.events.publish(ServerMessage::ChatCleared);
        self.publish_sources(&state.sources);
    }

    /// Runs one conversation turn. The user message is appended before the
    /// first generation call; the loading flag is cleared on every exit path.
    pub async fn send_message(&self, prompt: &str) -> Result<SendOutcome, ConversationError> {
        if prompt.trim().is_empty() {
            return Ok(SendOutcome::Ignored);
        }

        if self.loading.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(ConversationError::Busy);
        }
        let _guard = LoadingGuard { loading: &self.loading, events: &self.events };

        let sources = {
            let mut state = self.state.lock().await;
            let message = Message::user(prompt);
            state.messages.push(message.clone());
            self.events.publish(ServerMessage::MessageAppended { message });
            self.events.publish(ServerMessage::Loading { active: true });
            state.sources.clone()
        };

        Ok(self.run_turn(prompt, &sources).await)
    }

    async fn run_turn(&self, prompt: &str, sources: &[Source]) -> SendOutcome {
        let decision = match self.client.classify(prompt, sources).await {
            Ok(decision) => decision,
            Err(e) if e.is_transport() => {
                warn!("Classification call failed: {}", e);
                self.append(Message::model(APOLOGY_TEXT)).await;
                return SendOutcome::Failed;
            }
            Err(e) => {
                error!("Classification could not be attempted: {}", e);
                self.append(Message::model(APOLOGY_TEXT)).await;
                return SendOutcome::Failed;
            }
        };

        match decision {
            Decision::CreateDocument { response_text, title, summary } => {
                let doc_id = match self.creator.create_and_stream(prompt, &title, &summary).await {
                    Ok(id) => id,
                    Err(e) => {
                        error!("Document creation for '{}' failed: {}", title, e);
                        self.append(Message::model(APOLOGY_TEXT)).await;
                        return SendOutcome::Failed;
                    }
                };

                if !self.registry.contains(&doc_id).await {
                    warn!("Document {} left the registry before its card was posted", doc_id);
                    self.append(Message::model(response_text)).await;
                    return SendOutcome::Replied;
                }

                let link = DocumentLink {
                    id: doc_id.clone(),
                    title,
                    summary,
                    created_at: Utc::now(),
                };
                self.append(Message::model(response_text).with_document(link)).await;
                SendOutcome::DocumentCreated(doc_id)
            }
            Decision::Chat { response_text, citations } => {
                let citations = if citations.is_empty() {
                    citations
                } else {
                    citations::reconcile(&response_text, citations).citations
                };
                self.append(Message::model(response_text).with_citations(citations)).await;
                SendOutcome::Replied
            }
        }
    }

    async fn append(&self, message: Message) {
        self.state.lock().await.messages.push(message.clone());
        self.events.publish(ServerMessage::MessageAppended { message });
    }

    fn publish_sources(&self, sources: &[Source]) {
        self.events.publish(ServerMessage::SourcesChanged {
            sources: sources.iter().map(Source::summary).collect::<Vec<SourceSummary>>(),
        });
    }
}

//! Composition root for one session: the document registry, the
//! conversation, the studio, and the callback that lets a conversation turn
//! create a document and stream it into the studio.

use async_trait::async_trait;
use log::{ info, warn };
use std::sync::Arc;
use thiserror::Error;

use crate::conversation::{ ConversationController, ConversationError, DocumentCreator, SendOutcome };
use crate::events::EventBus;
use crate::llm::GenerationClient;
use crate::models::document::{ CanvasTool, DocumentId, GeneratedDocument, UNTITLED_DOCUMENT };
use crate::models::source::Source;
use crate::registry::DocumentRegistry;
use crate::studio::{ DocumentSink, SessionOutcome, StudioController, StudioError, StudioPhase };

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("unknown document '{0}'")]
    UnknownDocument(DocumentId),

    #[error(transparent)]
    Studio(#[from] StudioError),

    #[error(transparent)]
    Conversation(#[from] ConversationError),
}

/// Allocates documents in the registry and streams them through the studio.
pub struct DocumentFactory {
    registry: Arc<DocumentRegistry>,
    studio: Arc<StudioController>,
}

#[async_trait]
impl DocumentCreator for DocumentFactory {
    async fn create_and_stream(
        &self,
        prompt: &str,
        title: &str,
        summary: &str
    ) -> Result<DocumentId, StudioError> {
        let phase = self.studio.phase().await;
        if phase != StudioPhase::Idle {
            return Err(StudioError::Busy(phase));
        }

        let doc = self.registry.create(title).await;
        info!("Document {} requested: {}", doc.id, summary);

        let doc_id = doc.id.clone();
        if let Err(e) = self.studio.stream_document_content(doc, prompt).await {
            // Lost the race for the studio; drop the empty document.
            self.registry.remove(&doc_id).await;
            return Err(e);
        }
        Ok(doc_id)
    }
}

pub struct Workspace {
    registry: Arc<DocumentRegistry>,
    studio: Arc<StudioController>,
    conversation: Arc<ConversationController>,
}

impl Workspace {
    pub fn new(client: Arc<dyn GenerationClient>, events: EventBus) -> Self {
        let registry = Arc::new(DocumentRegistry::new());
        let sink: Arc<dyn DocumentSink> = registry.clone();
        let studio = Arc::new(StudioController::new(Arc::clone(&client), sink, events.clone()));
        let factory = Arc::new(DocumentFactory {
            registry: Arc::clone(&registry),
            studio: Arc::clone(&studio),
        });
        let conversation = Arc::new(
            ConversationController::new(client, Arc::clone(&registry), factory, events)
        );

        Self { registry, studio, conversation }
    }

    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }

    pub fn studio(&self) -> &Arc<StudioController> {
        &self.studio
    }

    pub fn conversation(&self) -> &Arc<ConversationController> {
        &self.conversation
    }

    pub async fn send_message(&self, prompt: &str) -> Result<SendOutcome, WorkspaceError> {
        Ok(self.conversation.send_message(prompt).await?)
    }

    pub async fn add_source(&self, source: Source) {
        self.conversation.add_source(source).await;
    }

    pub async fn remove_source(&self, index: usize) -> Option<Source> {
        self.conversation.remove_source(index).await
    }

    pub async fn clear_chat(&self) {
        self.conversation.clear_chat().await;
    }

    /// Opens the registry's copy of `id` in the studio.
    pub async fn open_document(&self, id: &DocumentId) -> Result<GeneratedDocument, WorkspaceError> {
        let doc = self.registry
            .get(id).await
            .ok_or_else(|| WorkspaceError::UnknownDocument(id.clone()))?;
        self.studio.open_document(doc.clone()).await;
        Ok(doc)
    }

    /// Creates an empty document and opens it, for writing by hand.
    pub async fn new_canvas(&self) -> GeneratedDocument {
        let doc = self.registry.create(UNTITLED_DOCUMENT).await;
        self.studio.open_document(doc.clone()).await;
        doc
    }

    pub async fn edit_content(&self, content: &str) -> Result<DocumentId, WorkspaceError> {
        Ok(self.studio.edit_active_content(content).await?)
    }

    /// Visualizes with whatever sources are attached right now.
    pub async fn generate_visualization(
        &self,
        doc_id: &DocumentId,
        content: &str,
        tool: CanvasTool
    ) -> Result<SessionOutcome, WorkspaceError> {
        let sources = self.conversation.sources().await;
        Ok(self.studio.generate_visualization(doc_id, content, tool, &sources).await?)
    }

    /// Drops history, sources, the open document and every stored document.
    pub async fn new_chat(&self) {
        if self.studio.is_busy().await {
            warn!("Starting a new chat while a generation is still running");
        }
        self.conversation.clear_chat().await;
        self.studio.clear().await;
        self.registry.clear().await;
    }
}

//! The studio: the single active document and the two streaming operations
//! that fill it (content draft, then visualization markup).
//!
//! The studio never writes the document registry itself. Durable updates go
//! through the `DocumentSink` handed in by the composition root; the studio
//! only owns its working copy of the active document.

use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, error, info };
use std::sync::{ Arc, Mutex as PhaseLock, MutexGuard, PoisonError };
use thiserror::Error;
use tokio::sync::Mutex;

use crate::events::EventBus;
use crate::llm::{ GenerationClient, GenerationError };
use crate::models::document::{ CanvasTool, DocumentId, GeneratedDocument };
use crate::models::source::Source;
use crate::models::websocket::ServerMessage;

pub const CONTENT_ERROR_TEXT: &str = "Sorry, an error occurred while generating the content.";
pub const VISUALIZATION_ERROR_MARKUP: &str =
    "<p class='p-4 text-red-500'>Sorry, an error occurred while generating the content.</p>";

const HTML_FENCE_OPEN: &str = "```html";
const FENCE_CLOSE: &str = "```";

/// Receives durable document updates from the studio.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn content_updated(&self, id: &DocumentId, content: &str);
    async fn generation_completed(&self, id: &DocumentId, markup: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudioPhase {
    Idle,
    Streaming {
        document_id: DocumentId,
    },
    Generating {
        document_id: DocumentId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed,
    /// The generation call failed and the fixed error text was stored instead.
    Failed,
    /// The request named a document that is no longer active; nothing happened.
    Stale,
}

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("studio is busy ({0:?}); wait for the current generation to finish")]
    Busy(StudioPhase),

    #[error("no document is open in the studio")]
    NoActiveDocument,
}

/// Removes ```` ```html ```` openers and ```` ``` ```` closers around generated
/// markup, repeating until neither is left so the result is a fixed point.
pub fn strip_code_fence(html: &str) -> &str {
    let mut cleaned = html.trim();
    loop {
        let before = cleaned.len();
        if let Some(rest) = cleaned.strip_prefix(HTML_FENCE_OPEN) {
            cleaned = rest.trim();
        }
        if let Some(rest) = cleaned.strip_suffix(FENCE_CLOSE) {
            cleaned = rest.trim();
        }
        if cleaned.len() == before {
            return cleaned;
        }
    }
}

/// Returns the studio to Idle on drop, even if the session panics, and
/// publishes the matching "finished" event.
struct PhaseGuard<'a> {
    phase: &'a PhaseLock<StudioPhase>,
    events: &'a EventBus,
    finished: ServerMessage,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = StudioPhase::Idle;
        self.events.publish(self.finished.clone());
    }
}

pub struct StudioController {
    client: Arc<dyn GenerationClient>,
    sink: Arc<dyn DocumentSink>,
    events: EventBus,
    current: Mutex<Option<GeneratedDocument>>,
    /// Only locked briefly, never across an await.
    phase: PhaseLock<StudioPhase>,
}

impl StudioController {
    pub fn new(client: Arc<dyn GenerationClient>, sink: Arc<dyn DocumentSink>, events: EventBus) -> Self {
        Self {
            client,
            sink,
            events,
            current: Mutex::new(None),
            phase: PhaseLock::new(StudioPhase::Idle),
        }
    }

    pub async fn current_document(&self) -> Option<GeneratedDocument> {
        self.current.lock().await.clone()
    }

    pub async fn phase(&self) -> StudioPhase {
        self.lock_phase().clone()
    }

    fn lock_phase(&self) -> MutexGuard<'_, StudioPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn is_streaming(&self) -> bool {
        matches!(self.phase().await, StudioPhase::Streaming { .. })
    }

    pub async fn is_generating(&self) -> bool {
        matches!(self.phase().await, StudioPhase::Generating { .. })
    }

    pub async fn is_busy(&self) -> bool {
        self.phase().await != StudioPhase::Idle
    }

    /// Replaces the active document wholesale.
    pub async fn open_document(&self, doc: GeneratedDocument) {
        info!("Opening document {} in studio", doc.id);
        *self.current.lock().await = Some(doc.clone());
        self.events.publish(ServerMessage::DocumentOpened { document: doc });
    }

    pub async fn clear(&self) {
        *self.current.lock().await = None;
        self.events.publish(ServerMessage::StudioCleared);
    }

    /// Streams a content draft for `doc` into the active document and the sink.
    /// Stream failures are recorded as `CONTENT_ERROR_TEXT`, never returned.
    pub async fn stream_document_content(
        &self,
        doc: GeneratedDocument,
        prompt: &str
    ) -> Result<SessionOutcome, StudioError> {
        let doc_id = doc.id.clone();
        {
            let mut current = self.current.lock().await;
            let mut phase = self.lock_phase();
            if *phase != StudioPhase::Idle {
                return Err(StudioError::Busy(phase.clone()));
            }
            *phase = StudioPhase::Streaming { document_id: doc_id.clone() };
            *current = Some(doc.clone());
        }
        let _guard = PhaseGuard {
            phase: &self.phase,
            events: &self.events,
            finished: ServerMessage::Streaming { active: false },
        };
        self.events.publish(ServerMessage::DocumentOpened { document: doc });
        self.events.publish(ServerMessage::Streaming { active: true });
        info!("Streaming content for document {}", doc_id);

        let outcome = match self.pump_content(&doc_id, prompt).await {
            Ok(len) => {
                info!("Content stream for {} finished ({} bytes)", doc_id, len);
                SessionOutcome::Completed
            }
            Err(e) => {
                error!("Failed to stream document content for {}: {}", doc_id, e);
                self.publish_content(&doc_id, CONTENT_ERROR_TEXT).await;
                SessionOutcome::Failed
            }
        };

        Ok(outcome)
    }

    async fn pump_content(&self, doc_id: &DocumentId, prompt: &str) -> Result<usize, GenerationError> {
        let mut stream = self.client.stream_text(prompt).await?;
        let mut text = String::new();
        while let Some(fragment) = stream.next().await {
            text.push_str(&fragment?);
            self.publish_content(doc_id, &text).await;
        }
        Ok(text.len())
    }

    /// Local copy first, then the sink, then observers; same text everywhere.
    async fn publish_content(&self, doc_id: &DocumentId, content: &str) {
        self.update_active(doc_id, |doc| {
            doc.content = content.to_string();
        }).await;
        self.sink.content_updated(doc_id, content).await;
        self.events.publish(ServerMessage::ContentUpdated {
            document_id: doc_id.clone(),
            content: content.to_string(),
        });
    }

    /// Renders `content` with `tool` into markup for the active document.
    /// A request for any other document is dropped as `Stale`.
    pub async fn generate_visualization(
        &self,
        doc_id: &DocumentId,
        content: &str,
        tool: CanvasTool,
        sources: &[Source]
    ) -> Result<SessionOutcome, StudioError> {
        {
            let mut current = self.current.lock().await;
            let Some(doc) = current.as_mut().filter(|doc| &doc.id == doc_id) else {
                debug!("Ignoring visualization request for inactive document {}", doc_id);
                return Ok(SessionOutcome::Stale);
            };
            let mut phase = self.lock_phase();
            if *phase != StudioPhase::Idle {
                return Err(StudioError::Busy(phase.clone()));
            }
            *phase = StudioPhase::Generating { document_id: doc_id.clone() };
            doc.generated_html.clear();
        }
        let _guard = PhaseGuard {
            phase: &self.phase,
            events: &self.events,
            finished: ServerMessage::Generating { active: false },
        };
        self.events.publish(ServerMessage::Generating { active: true });
        self.events.publish(ServerMessage::MarkupUpdated {
            document_id: doc_id.clone(),
            markup: String::new(),
        });
        info!("Generating {} for document {}", tool.key(), doc_id);

        let (markup, outcome) = match self.pump_markup(doc_id, content, tool, sources).await {
            Ok(markup) => (markup, SessionOutcome::Completed),
            Err(e) => {
                error!("Failed to generate visualization for {}: {}", doc_id, e);
                (VISUALIZATION_ERROR_MARKUP.to_string(), SessionOutcome::Failed)
            }
        };

        self.update_active(doc_id, |doc| {
            doc.generated_html = markup.clone();
        }).await;
        self.sink.generation_completed(doc_id, &markup).await;
        self.events.publish(ServerMessage::GenerationComplete {
            document_id: doc_id.clone(),
            markup,
        });

        Ok(outcome)
    }

    /// Every fragment republishes the fence-stripped buffer so a live preview
    /// never shows a partial fence.
    async fn pump_markup(
        &self,
        doc_id: &DocumentId,
        content: &str,
        tool: CanvasTool,
        sources: &[Source]
    ) -> Result<String, GenerationError> {
        let mut stream = self.client.stream_visualization(content, tool, sources).await?;
        let mut raw = String::new();
        while let Some(fragment) = stream.next().await {
            raw.push_str(&fragment?);
            let cleaned = strip_code_fence(&raw).to_string();
            self.update_active(doc_id, |doc| {
                doc.generated_html = cleaned.clone();
            }).await;
            self.events.publish(ServerMessage::MarkupUpdated {
                document_id: doc_id.clone(),
                markup: cleaned,
            });
        }
        Ok(strip_code_fence(&raw).to_string())
    }

    /// User edit of the active document's text.
    pub async fn edit_active_content(&self, content: &str) -> Result<DocumentId, StudioError> {
        let doc_id = {
            let mut current = self.current.lock().await;
            let doc = current.as_mut().ok_or(StudioError::NoActiveDocument)?;
            {
                let phase = self.lock_phase();
                if let StudioPhase::Streaming { document_id } = &*phase {
                    if *document_id == doc.id {
                        return Err(StudioError::Busy(phase.clone()));
                    }
                }
            }
            doc.content = content.to_string();
            doc.id.clone()
        };
        self.sink.content_updated(&doc_id, content).await;
        self.events.publish(ServerMessage::ContentUpdated {
            document_id: doc_id.clone(),
            content: content.to_string(),
        });
        Ok(doc_id)
    }

    /// Applies `f` to the working copy only while `doc_id` is still the one open.
    async fn update_active<F>(&self, doc_id: &DocumentId, f: F)
        where F: FnOnce(&mut GeneratedDocument)
    {
        let mut current = self.current.lock().await;
        if let Some(doc) = current.as_mut().filter(|doc| &doc.id == doc_id) {
            f(doc);
        }
    }
}

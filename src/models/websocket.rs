use serde::{ Serialize, Deserialize };

use crate::models::chat::Message;
use crate::models::document::{ CanvasTool, DocumentId, GeneratedDocument };
use crate::models::source::SourceSummary;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SendMessage {
        content: String,
    },
    AddSource {
        name: String,
        mime_type: String,
        /// Base64 payload, optionally as a data URL.
        data: String,
    },
    RemoveSource {
        index: usize,
    },
    ClearChat,
    NewChat,
    OpenDocument {
        document_id: DocumentId,
    },
    NewCanvas,
    EditContent {
        content: String,
    },
    GenerateVisualization {
        document_id: DocumentId,
        content: String,
        tool: CanvasTool,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Loading {
        active: bool,
    },
    MessageAppended {
        message: Message,
    },
    SourcesChanged {
        sources: Vec<SourceSummary>,
    },
    ChatCleared,
    DocumentOpened {
        document: GeneratedDocument,
    },
    StudioCleared,
    Streaming {
        active: bool,
    },
    ContentUpdated {
        document_id: DocumentId,
        content: String,
    },
    Generating {
        active: bool,
    },
    MarkupUpdated {
        document_id: DocumentId,
        markup: String,
    },
    GenerationComplete {
        document_id: DocumentId,
        markup: String,
    },
    Error {
        message: String,
    },
}

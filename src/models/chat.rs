use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Serialize };

use crate::citations::{ split_segments, Segment };
use crate::models::document::DocumentId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Number used by the `[n]` marker in the message text.
    pub index: u32,
    /// Verbatim quote from the source backing the marked sentence.
    pub text: String,
}

/// Card data for a message that announced a generated document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLink {
    pub id: DocumentId,
    pub title: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentLink>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            text: text.into(),
            citations: Vec::new(),
            document: None,
            timestamp: Utc::now(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Model,
            text: text.into(),
            citations: Vec::new(),
            document: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }

    pub fn with_document(mut self, link: DocumentLink) -> Self {
        self.timestamp = link.created_at;
        self.document = Some(link);
        self
    }

    pub fn document_id(&self) -> Option<&DocumentId> {
        self.document.as_ref().map(|link| &link.id)
    }

    /// Splits the text into plain runs and resolved citation markers.
    pub fn segments(&self) -> Vec<Segment<'_>> {
        split_segments(&self.text, &self.citations)
    }
}

use chrono::{ DateTime, Utc };
use serde::{ Deserialize, Serialize };
use std::fmt;
use std::str::FromStr;

pub const UNTITLED_DOCUMENT: &str = "Untitled Document";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn from_sequence(seq: u64) -> Self {
        DocumentId(format!("doc_{}", seq))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        DocumentId(value.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedDocument {
    pub id: DocumentId,
    pub title: String,
    pub content: String,
    pub generated_html: String,
    pub created_at: DateTime<Utc>,
}

impl GeneratedDocument {
    pub fn new(id: DocumentId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            content: String::new(),
            generated_html: String::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanvasTool {
    Infographic,
    Quiz,
    Flashcards,
    MindMap,
}

impl CanvasTool {
    /// Key used for tool-specific prompt lookup and on the wire.
    pub fn key(&self) -> &'static str {
        match self {
            CanvasTool::Infographic => "infographic",
            CanvasTool::Quiz => "quiz",
            CanvasTool::Flashcards => "flashcards",
            CanvasTool::MindMap => "mind_map",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CanvasTool::Infographic => "Infographic",
            CanvasTool::Quiz => "Quiz",
            CanvasTool::Flashcards => "Flashcards",
            CanvasTool::MindMap => "Mind Map",
        }
    }
}

impl fmt::Display for CanvasTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseCanvasToolError {
    message: String,
}

impl fmt::Display for ParseCanvasToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseCanvasToolError {}

impl FromStr for CanvasTool {
    type Err = ParseCanvasToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "infographic" => Ok(CanvasTool::Infographic),
            "quiz" => Ok(CanvasTool::Quiz),
            "flashcards" | "flashcard" => Ok(CanvasTool::Flashcards),
            "mind_map" | "mindmap" => Ok(CanvasTool::MindMap),
            _ =>
                Err(ParseCanvasToolError {
                    message: format!("Invalid canvas tool: '{}'", s),
                }),
        }
    }
}

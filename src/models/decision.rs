use serde::Deserialize;

use crate::models::chat::Citation;

pub const FALLBACK_RESPONSE: &str =
    "I'm having a little trouble with that request. Could you try rephrasing it?";

/// Outcome of one classification call, validated at the client boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Chat {
        response_text: String,
        citations: Vec<Citation>,
    },
    CreateDocument {
        response_text: String,
        title: String,
        summary: String,
    },
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Chat,
    CreateDocument,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawCitation {
    pub source_index: u32,
    pub source_text: String,
}

/// Shape the model is asked to produce; optional fields are checked in `validate`.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawDecision {
    pub action: DecisionAction,
    pub response_text: String,
    #[serde(default)]
    pub document_title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub citations: Option<Vec<RawCitation>>,
}

impl RawDecision {
    pub fn validate(self) -> Decision {
        let title = self.document_title.filter(|t| !t.trim().is_empty());
        let summary = self.summary.filter(|s| !s.trim().is_empty());

        match (self.action, title, summary) {
            (DecisionAction::CreateDocument, Some(title), Some(summary)) =>
                Decision::CreateDocument {
                    response_text: self.response_text,
                    title,
                    summary,
                },
            _ =>
                Decision::Chat {
                    response_text: self.response_text,
                    citations: self.citations
                        .unwrap_or_default()
                        .into_iter()
                        .map(|c| Citation { index: c.source_index, text: c.source_text })
                        .collect(),
                },
        }
    }
}

impl Decision {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawDecision = serde_json::from_str(text.trim())?;
        Ok(raw.validate())
    }

    pub fn fallback() -> Self {
        Decision::chat(FALLBACK_RESPONSE)
    }

    pub fn chat(response_text: impl Into<String>) -> Self {
        Decision::Chat { response_text: response_text.into(), citations: Vec::new() }
    }
}

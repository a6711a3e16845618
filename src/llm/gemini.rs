use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use serde_json::{ json, Value as JsonValue };
use std::sync::Arc;
use std::time::Duration;
use log::{ info, warn };
use url::Url;

use super::{ http_stream_generate, FragmentStream, GenerationClient, GenerationError, LlmConfig };
use crate::config::prompt::{ self, PromptStore };
use crate::models::decision::Decision;
use crate::models::document::CanvasTool;
use crate::models::source::Source;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<JsonValue>,
}

#[derive(Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiBlob,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiBlob {
    mime_type: String,
    data: String,
}

#[derive(Deserialize, Debug, Default)]
struct GoogleResponse {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
}

#[derive(Deserialize, Debug)]
struct GoogleCandidate {
    #[serde(default)]
    content: Option<GoogleContent>,
}

#[derive(Deserialize, Debug)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize, Debug)]
struct GooglePart {
    #[serde(default)]
    text: Option<String>,
}

impl GoogleResponse {
    /// Concatenated text parts of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

impl GeminiContent {
    fn instruction(text: &str) -> Self {
        Self {
            role: None,
            parts: vec![GeminiPart::Text { text: text.to_string() }],
        }
    }

    /// Prompt text followed by one inline part per attached source, in list order.
    fn user(prompt: &str, sources: &[Source]) -> Self {
        let mut parts = vec![GeminiPart::Text { text: prompt.to_string() }];
        parts.extend(
            sources.iter().map(|source| GeminiPart::InlineData {
                inline_data: GeminiBlob {
                    mime_type: source.mime_type.clone(),
                    data: source.base64_data(),
                },
            })
        );
        Self { role: Some("user"), parts }
    }
}

fn decision_schema() -> JsonValue {
    json!({
        "type": "OBJECT",
        "properties": {
            "action": {
                "type": "STRING",
                "enum": ["chat", "create_document"],
                "description": "Whether the user wants a simple conversation or a new complex document."
            },
            "responseText": {
                "type": "STRING",
                "description": "For \"chat\", the full answer. For \"create_document\", the text shown on the document card."
            },
            "documentTitle": {
                "type": "STRING",
                "description": "A concise title for the document when action is \"create_document\"."
            },
            "summary": {
                "type": "STRING",
                "description": "A one-sentence summary of the document to be created."
            },
            "citations": {
                "type": "ARRAY",
                "description": "Verbatim quotes from the sources backing each [n] marker in responseText.",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "sourceIndex": {
                            "type": "INTEGER",
                            "description": "The number used in the marker, e.g. 1 for [1]."
                        },
                        "sourceText": {
                            "type": "STRING",
                            "description": "The exact quote from the source document."
                        }
                    },
                    "required": ["sourceIndex", "sourceText"]
                }
            }
        },
        "required": ["action", "responseText"]
    })
}

/// Parses one line of a `streamGenerateContent?alt=sse` body.
fn parse_gemini_line(line: &str) -> Option<String> {
    let line = line.trim();
    let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    if payload.is_empty() || !payload.starts_with('{') {
        return None;
    }

    serde_json
        ::from_str::<GoogleResponse>(payload)
        .ok()
        .map(|chunk| chunk.text())
        .filter(|text| !text.is_empty())
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    prompts: Arc<PromptStore>,
}

impl GeminiClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        prompts: Arc<PromptStore>
    ) -> Result<Self, GenerationError> {
        if api_key.trim().is_empty() {
            return Err(GenerationError::MissingApiKey);
        }
        let model = model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Url::parse(&base_url).map_err(|e| GenerationError::InvalidBaseUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;

        let http = reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;

        Ok(Self {
            http,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            prompts,
        })
    }

    pub fn from_config(
        config: &LlmConfig,
        prompts: Arc<PromptStore>
    ) -> Result<Self, GenerationError> {
        let api_key = config.api_key.clone().ok_or(GenerationError::MissingApiKey)?;
        Self::new(api_key, config.model.clone(), config.base_url.clone(), prompts)
    }

    fn endpoint(&self, method: &str) -> Result<Url, GenerationError> {
        let raw = format!("{}/models/{}:{}", self.base_url, self.model, method);
        Url::parse(&raw).map_err(|e| GenerationError::InvalidBaseUrl {
            url: raw,
            reason: e.to_string(),
        })
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            (API_KEY_HEADER.to_string(), self.api_key.clone())
        ]
    }

    async fn stream(&self, request: GeminiRequest) -> Result<FragmentStream, GenerationError> {
        let mut url = self.endpoint("streamGenerateContent")?;
        url.query_pairs_mut().append_pair("alt", "sse");
        http_stream_generate(&self.http, url, request, parse_gemini_line, self.headers()).await
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn classify(&self, prompt: &str, sources: &[Source]) -> Result<Decision, GenerationError> {
        info!(
            "GeminiClient::classify() → model={} sources={}",
            self.model,
            sources.len()
        );
        let prompts = self.prompts.current().await;
        let request = GeminiRequest {
            contents: vec![GeminiContent::user(prompt, sources)],
            system_instruction: Some(GeminiContent::instruction(&prompts.decision_instruction)),
            generation_config: Some(json!({
                "responseMimeType": "application/json",
                "responseSchema": decision_schema(),
            })),
        };

        let mut req = self.http.post(self.endpoint("generateContent")?).json(&request);
        for (name, value) in self.headers() {
            req = req.header(name, value);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(GenerationError::Api { status: status.as_u16(), message: body });
        }

        let text = match serde_json::from_str::<GoogleResponse>(&body) {
            Ok(parsed) => parsed.text(),
            Err(e) => {
                warn!("Unreadable classification response envelope: {}", e);
                return Ok(Decision::fallback());
            }
        };

        match Decision::from_json(&text) {
            Ok(decision) => Ok(decision),
            Err(e) => {
                warn!("Classification output failed validation, using fallback: {}", e);
                Ok(Decision::fallback())
            }
        }
    }

    async fn stream_text(&self, prompt: &str) -> Result<FragmentStream, GenerationError> {
        info!("GeminiClient::stream_text() → model={}", self.model);
        let prompts = self.prompts.current().await;
        let full_prompt = prompt::get_content_prompt(&prompts, prompt);
        let request = GeminiRequest {
            contents: vec![GeminiContent::user(&full_prompt, &[])],
            system_instruction: None,
            generation_config: None,
        };
        self.stream(request).await
    }

    async fn stream_visualization(
        &self,
        content: &str,
        tool: CanvasTool,
        sources: &[Source]
    ) -> Result<FragmentStream, GenerationError> {
        info!(
            "GeminiClient::stream_visualization() → model={} tool={} sources={}",
            self.model,
            tool.key(),
            sources.len()
        );
        let prompts = self.prompts.current().await;
        let full_prompt = prompt::get_visualization_prompt(&prompts, content, tool);
        let request = GeminiRequest {
            contents: vec![GeminiContent::user(&full_prompt, sources)],
            system_instruction: None,
            generation_config: None,
        };
        self.stream(request).await
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}

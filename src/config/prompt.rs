use serde::{ Deserialize, Serialize };
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{ Path, PathBuf };
use std::sync::Arc;
use std::time::SystemTime;
use log::info;
use tokio::sync::RwLock;

use crate::models::document::{ CanvasTool, ParseCanvasToolError };

const DEFAULT_DECISION_INSTRUCTION: &str = r#"You are an AI assistant named Roboki. Your primary role is to determine the user's intent based on their prompt and any provided files (sources).

- CONTEXT AWARENESS (CRITICAL): If one or more files (sources) are provided with the prompt, answer the user's question from the content of those files. Requests such as "summarize", "what is" or "explain" refer to the provided files and are a "chat" action. Whenever you use information from the files you MUST end the relevant sentence with a citation marker such as [1] or [2]. For EACH marker you MUST add one object to the "citations" array with the marker number as "sourceIndex" and the exact verbatim quote that justifies the statement as "sourceText".
- CHAT ACTION: If the user asks a general question, wants to chat, asks for a short piece of text, OR asks about the provided files, set "action" to "chat" and put the full answer in "responseText".
- CREATE DOCUMENT ACTION: If the user explicitly asks for a *new* document, report, lesson plan, mind map, story or other long structured content that is separate from the provided files, set "action" to "create_document".
- WHEN action is "create_document":
  - "documentTitle" MUST be a suitable title for the new document.
  - "summary" MUST be a compelling one-sentence summary of the document.
  - "responseText" should be a confirmation that includes the title, for example: "Đây là tài liệu bạn yêu cầu: [documentTitle]".
- Respond ONLY in the requested JSON format."#;

const DEFAULT_CONTENT_TEMPLATE: &str =
    "Based on the user's request, generate the text content for the document.\nUser Request: \"{prompt}\"";

const DEFAULT_VISUALIZATION_TEMPLATE: &str =
    "Based on the following text content AND any provided source documents, follow these instructions precisely:\n\n{instructions}\n\nText content:\n---\n{content}\n---";

const DEFAULT_GENERIC_TOOL_INSTRUCTION: &str =
    "Create a visually appealing, single-file HTML document for a \"{tool}\" visualization. The HTML file must be self-contained, with all CSS and JavaScript included internally.";

const DEFAULT_INFOGRAPHIC_INSTRUCTION: &str = r#"CRITICAL TASK: Create a MINIMALIST, CONCISE and SAFE infographic HTML file.

PRIORITY #1, SUMMARIZE: read the text first and distill it into its 3 to 5 most important points or steps. The whole design serves only those points; leave out secondary details and long paragraphs.

DESIGN: clean and minimalist, with ample whitespace, clear typography (import one Google Font) and a simple color palette. No heavy shadows, gradients or decoration.

TECHNICAL REQUIREMENTS (MANDATORY):
1. Wrap everything in a single <div class="infographic-container"> with `max-width: 100%; box-sizing: border-box; overflow-x: hidden;`.
2. Use CSS Flexbox or Grid; the layout must be responsive.
3. Icons may ONLY use basic SVG shapes: <circle>, <rect> and <ellipse>. Multi-point <path> icons are forbidden.
4. Numbers become simple <rect> bar charts or progress steps built from <div> or <circle> elements. No complex charts.
5. Output a single self-contained HTML file: CSS in a <style> tag, minimal JS (if any) in a <script> tag.
6. The response MUST start with <!DOCTYPE html> and contain ONLY HTML code."#;

const DEFAULT_MIND_MAP_INSTRUCTION: &str = r#"Task: Create a clear and organized Mind Map HTML file.
1. Structure: represent the hierarchy with nested HTML elements, from a central topic node out to main ideas and sub-points.
2. Connections: draw the links between nodes with CSS pseudo-elements (::before, ::after) or inline SVG lines.
3. Clarity: clear typography, a distinct color per hierarchy level and enough spacing to stay readable.
4. Self-contained: a single HTML file with all CSS in a <style> tag. JavaScript only for simple interactions such as highlighting a node on hover. Start the response with <!DOCTYPE html> and output ONLY HTML code."#;

#[derive(Debug)]
pub enum PromptError {
    MissingPlaceholder {
        template: String,
        placeholder: String,
    },
    UnknownTool(ParseCanvasToolError),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::MissingPlaceholder { template, placeholder } =>
                write!(f, "Prompt template '{}' is missing placeholder '{}'", template, placeholder),
            PromptError::UnknownTool(e) => write!(f, "Prompt tool_instructions: {}", e),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::UnknownTool(e) => Some(e),
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<ParseCanvasToolError> for PromptError {
    fn from(err: ParseCanvasToolError) -> Self {
        PromptError::UnknownTool(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

/// Every prompt the generation client sends. A JSON file may override any
/// subset of fields; the rest keep their built-in values.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct PromptConfig {
    pub decision_instruction: String,
    pub content_template: String,
    pub visualization_template: String,
    /// Keyed by `CanvasTool::key()`. Tools without an entry use `generic_tool_instruction`.
    pub tool_instructions: HashMap<String, String>,
    pub generic_tool_instruction: String,
    #[serde(skip)]
    pub last_loaded: Option<SystemTime>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        let mut tool_instructions = HashMap::new();
        tool_instructions.insert(
            CanvasTool::Infographic.key().to_string(),
            DEFAULT_INFOGRAPHIC_INSTRUCTION.to_string()
        );
        tool_instructions.insert(
            CanvasTool::MindMap.key().to_string(),
            DEFAULT_MIND_MAP_INSTRUCTION.to_string()
        );

        Self {
            decision_instruction: DEFAULT_DECISION_INSTRUCTION.to_string(),
            content_template: DEFAULT_CONTENT_TEMPLATE.to_string(),
            visualization_template: DEFAULT_VISUALIZATION_TEMPLATE.to_string(),
            tool_instructions,
            generic_tool_instruction: DEFAULT_GENERIC_TOOL_INSTRUCTION.to_string(),
            last_loaded: None,
        }
    }
}

fn require_placeholder(template: &str, name: &str, placeholder: &str) -> Result<(), PromptError> {
    if template.contains(placeholder) {
        Ok(())
    } else {
        Err(PromptError::MissingPlaceholder {
            template: name.to_string(),
            placeholder: placeholder.to_string(),
        })
    }
}

impl PromptConfig {
    pub fn validate(&self) -> Result<(), PromptError> {
        require_placeholder(&self.content_template, "content_template", "{prompt}")?;
        require_placeholder(
            &self.visualization_template,
            "visualization_template",
            "{instructions}"
        )?;
        require_placeholder(&self.visualization_template, "visualization_template", "{content}")?;
        Ok(())
    }

    /// Re-keys `tool_instructions` by `CanvasTool::key()`, so an override file
    /// may name a tool "Mind Map" or "mindmap". Unknown tool names are rejected.
    pub fn normalize_tool_keys(&mut self) -> Result<(), PromptError> {
        let mut normalized = HashMap::with_capacity(self.tool_instructions.len());
        for (name, instructions) in self.tool_instructions.drain() {
            let tool: CanvasTool = name.parse()?;
            normalized.insert(tool.key().to_string(), instructions);
        }
        self.tool_instructions = normalized;
        Ok(())
    }
}

pub fn load_prompts(path: &Path) -> Result<PromptConfig, PromptError> {
    let file_content = fs::read_to_string(path)?;
    let mut config: PromptConfig = serde_json::from_str(&file_content)?;
    config.normalize_tool_keys()?;
    config.validate()?;
    config.last_loaded = Some(SystemTime::now());
    info!("Loaded prompts from {}", path.display());
    Ok(config)
}

pub fn get_content_prompt(config: &PromptConfig, prompt: &str) -> String {
    config.content_template.replace("{prompt}", prompt)
}

pub fn get_tool_instructions(config: &PromptConfig, tool: CanvasTool) -> String {
    match config.tool_instructions.get(tool.key()) {
        Some(instructions) => instructions.clone(),
        None => config.generic_tool_instruction.replace("{tool}", tool.label()),
    }
}

pub fn get_visualization_prompt(config: &PromptConfig, content: &str, tool: CanvasTool) -> String {
    let instructions = get_tool_instructions(config, tool);
    config.visualization_template
        .replace("{instructions}", &instructions)
        .replace("{content}", content)
}

/// Shared, reloadable prompt configuration.
pub struct PromptStore {
    path: Option<PathBuf>,
    current: RwLock<Arc<PromptConfig>>,
}

impl PromptStore {
    pub fn embedded() -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(PromptConfig::default())),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, PromptError> {
        let path = path.into();
        let config = load_prompts(&path)?;
        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(config)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn current(&self) -> Arc<PromptConfig> {
        Arc::clone(&*self.current.read().await)
    }

    /// Re-reads the override file when it changed since the last load.
    /// Embedded prompts never change.
    pub async fn reload_if_changed(&self) -> Result<bool, PromptError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };

        let modified = fs::metadata(path)?.modified()?;
        let last_loaded = self.current.read().await.last_loaded;
        let stale = match last_loaded {
            Some(loaded) => modified > loaded,
            None => true,
        };
        if !stale {
            return Ok(false);
        }

        info!("Prompts file changed, reloading...");
        let config = load_prompts(path)?;
        *self.current.write().await = Arc::new(config);
        Ok(true)
    }
}

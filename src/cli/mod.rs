use clap::Parser;

use crate::llm::gemini::{ DEFAULT_BASE_URL, DEFAULT_MODEL };
use crate::llm::LlmConfig;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Generation API Args ---
    /// API key for the Gemini API. Required; startup aborts without it.
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Model used for classification and both streams.
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Base URL of the Gemini REST API (without the /models/... suffix).
    #[arg(long, env = "GEMINI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Optional JSON file overriding built-in prompts. Reloaded when it changes.
    #[arg(long, env = "PROMPTS_PATH")]
    pub prompts_path: Option<String>,

    // --- Server Args ---
    /// Host address and port for the WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Port for the HTTP API (health, prompt reload). Disabled when unset.
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Optional API Key required for clients to connect to the WebSocket server. If set, clients must provide this key.
    #[arg(long, env = "SERVER_API_KEY")]
    pub server_api_key: Option<String>,

    /// Largest accepted WebSocket frame in bytes. Attachments travel base64-encoded, so keep this generous.
    #[arg(long, env = "MAX_MESSAGE_SIZE", default_value = "26214400")]
    pub max_message_size: usize,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Optional path to the TLS certificate file (PEM format) for enabling WSS. Requires --tls-key.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling WSS. Requires --tls-cert.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

impl Args {
    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            api_key: self.api_key.clone().filter(|k| !k.trim().is_empty()),
            model: Some(self.model.clone()),
            base_url: Some(self.base_url.clone()),
        }
    }

    pub fn log_filter(&self) -> &'static str {
        if self.debug { "debug" } else { "info" }
    }
}

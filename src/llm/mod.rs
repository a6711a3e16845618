pub mod error;
pub mod gemini;

use async_trait::async_trait;
use futures::{ Future, Stream, StreamExt };
use log::debug;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

pub use self::error::GenerationError;
use self::gemini::GeminiClient;
use crate::config::prompt::PromptStore;
use crate::models::decision::Decision;
use crate::models::document::CanvasTool;
use crate::models::source::Source;

/// Lazy, finite sequence of text fragments from one generation call.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Decides between a direct reply and a new document. Output the model
    /// gets wrong comes back as `Decision::fallback()`; only call failures are errors.
    async fn classify(&self, prompt: &str, sources: &[Source]) -> Result<Decision, GenerationError>;

    async fn stream_text(&self, prompt: &str) -> Result<FragmentStream, GenerationError>;

    async fn stream_visualization(
        &self,
        content: &str,
        tool: CanvasTool,
        sources: &[Source]
    ) -> Result<FragmentStream, GenerationError>;

    fn get_model(&self) -> String;
}

pub fn new_client(
    config: &LlmConfig,
    prompts: Arc<PromptStore>
) -> Result<Arc<dyn GenerationClient>, GenerationError> {
    let client = GeminiClient::from_config(config, prompts)?;
    Ok(Arc::new(client))
}

pub fn create_streaming_response<F, Fut>(response_fn: F) -> FragmentStream
    where
        F: FnOnce(mpsc::Sender<Result<String, GenerationError>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

/// POSTs `payload` and turns the line-oriented response body into fragments.
/// Non-success statuses fail the call; body errors end the stream with an error item.
pub async fn http_stream_generate(
    client: &reqwest::Client,
    url: Url,
    payload: impl Serialize + Send + 'static,
    line_parser: fn(&str) -> Option<String>,
    headers: Vec<(String, String)>
) -> Result<FragmentStream, GenerationError> {
    let mut req = client.post(url).json(&payload);
    for (name, value) in headers {
        req = req.header(name, value);
    }

    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        return Err(GenerationError::Api { status: status.as_u16(), message });
    }

    Ok(
        create_streaming_response(move |tx| async move {
            let mut bytes = resp.bytes_stream();
            let mut pending: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(buf) => {
                        pending.extend_from_slice(&buf);
                        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = pending.drain(..=pos).collect();
                            let line = String::from_utf8_lossy(&line);
                            if let Some(tok) = line_parser(&line) {
                                if tx.send(Ok(tok)).await.is_err() {
                                    debug!("Fragment receiver dropped; stopping stream");
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(GenerationError::Network(e))).await;
                        return;
                    }
                }
            }

            if !pending.is_empty() {
                let line = String::from_utf8_lossy(&pending);
                if let Some(tok) = line_parser(&line) {
                    let _ = tx.send(Ok(tok)).await;
                }
            }
        })
    )
}

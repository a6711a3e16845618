pub mod api;
pub mod websocket;

use crate::cli::Args;
use crate::config::prompt::PromptStore;
use crate::llm::GenerationClient;
use std::error::Error;
use std::sync::Arc;

/// Shared by every connection: the generation backend and the prompts it reads.
#[derive(Clone)]
pub struct AppContext {
    pub client: Arc<dyn GenerationClient>,
    pub prompts: Arc<PromptStore>,
}

pub struct Server {
    addr: String,
    context: AppContext,
    args: Args,
}

impl Server {
    pub fn new(addr: String, context: AppContext, args: Args) -> Self {
        Self { addr, context, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(http_port) = self.args.http_port {
            self.start_http_server(http_port).await?;
        }

        self.start_ws_server().await?;

        Ok(())
    }

    async fn start_http_server(&self, http_port: u16) -> Result<(), Box<dyn Error + Send + Sync>> {
        api::start_http_server(http_port, self.context.clone(), self.args.clone()).await
    }

    async fn start_ws_server(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        websocket::start_ws_server(&self.addr, self.context.clone(), self.args.clone()).await
    }
}

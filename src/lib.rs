pub mod citations;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod events;
pub mod llm;
pub mod models;
pub mod registry;
pub mod server;
pub mod studio;
pub mod workspace;

use cli::Args;
use config::prompt::PromptStore;
use llm::GenerationError;
use log::info;
use server::{ AppContext, Server };
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let llm_config = args.llm_config();
    if llm_config.api_key.is_none() {
        return Err(Box::new(GenerationError::MissingApiKey));
    }

    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Model: {}", args.model);
    info!("API Base URL: {}", args.base_url);
    info!("Prompts Path: {}", args.prompts_path.as_deref().unwrap_or("(embedded)"));
    info!("HTTP Port: {}", args.http_port.map_or("disabled".to_string(), |p| p.to_string()));
    info!("Client API Key Required: {}", args.server_api_key.as_deref().is_some_and(|k| !k.is_empty()));
    info!("Max Message Size: {} bytes", args.max_message_size);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let prompts = Arc::new(match &args.prompts_path {
        Some(path) => PromptStore::from_path(path)?,
        None => PromptStore::embedded(),
    });
    let client = llm::new_client(&llm_config, Arc::clone(&prompts))?;
    info!("Generation client ready (model {})", client.get_model());

    let context = AppContext { client, prompts };
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, context, args);
    server.run().await?;

    Ok(())
}

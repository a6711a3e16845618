use clap::Parser;
use dotenv::dotenv;
use roboki_studio::cli::Args;
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenv().ok();
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_filter())).init();

    roboki_studio::run(args).await
}

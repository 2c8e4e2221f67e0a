mod config;
mod handlers;
mod models;
mod render;
mod services;
#[cfg_attr(not(feature = "web-server"), allow(dead_code))]
mod web; // Upload page + axum server

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;

use config::Config;
use handlers::{run_analysis, AnalysisRequest};
use services::Provider;

#[derive(Parser)]
#[command(name = "orange-sweetness", version, about = "Estimate orange sweetness from photos with a vision LLM")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the web front end (default)
    Serve {
        /// Address to listen on, overrides BIND_ADDR
        #[arg(long)]
        bind: Option<String>,
    },
    /// Analyze image files from the command line
    Analyze {
        /// Orange photos (JPG, PNG, WEBP); more than MAX_IMAGES are cut off
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// openai or claude, overrides VISION_PROVIDER
        #[arg(long)]
        provider: Option<Provider>,
        /// API key for the provider; defaults to OPENAI_API_KEY / ANTHROPIC_API_KEY
        #[arg(long, env = "VISION_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables first so RUST_LOG from .env applies
    dotenv().ok();

    // Initialize logger
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Invalid configuration")?;

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => serve(config, bind).await,
        Command::Analyze {
            files,
            provider,
            api_key,
            json,
        } => analyze_files(config, files, provider, api_key, json).await,
    }
}

#[cfg(feature = "web-server")]
async fn serve(mut config: Config, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }

    log::info!("🚀 Starting Orange Sweetness AI...");
    for provider in Provider::ALL {
        if config.api_key_for(provider).is_some() {
            log::info!("🔑 Server key configured for {}", provider);
        }
    }

    let addr = config.bind_addr.clone();
    let app = web::server::create_router(config);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    log::info!("🌐 Web server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("🛑 Shutting down...");
        })
        .await?;

    Ok(())
}

#[cfg(not(feature = "web-server"))]
async fn serve(_config: Config, _bind: Option<String>) -> Result<()> {
    anyhow::bail!("Built without the web-server feature; use the `analyze` command instead")
}

async fn analyze_files(
    config: Config,
    paths: Vec<PathBuf>,
    provider: Option<Provider>,
    api_key: Option<String>,
    json: bool,
) -> Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.push((filename, bytes));
    }

    let request = AnalysisRequest {
        provider: provider.unwrap_or(config.default_provider),
        api_key,
        files,
    };

    let outcome = match run_analysis(request, &config).await {
        Ok(outcome) => outcome,
        Err(e) => {
            if let Some(handlers::RequestError::NoImages { warnings }) =
                handlers::request::request_error(&e)
            {
                for warning in warnings {
                    eprintln!("⚠️  {}", warning);
                }
            }
            anyhow::bail!("{}", render::describe_failure(&e));
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    } else {
        print!("{}", render::render_text(&outcome.report));
    }

    Ok(())
}

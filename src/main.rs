use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bill_extractor::api::{start_server, AppState};
use bill_extractor::config::Settings;
use bill_extractor::services::llm::build_backend;
use bill_extractor::services::processor::{Pipeline, PipelineOptions};
use bill_extractor::services::text_extraction::{collect_documents, DocumentLoader};

#[derive(Parser)]
#[command(name = "bill-extractor", version, about = "Extract line items from medical bills")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Overrides API_HOST
        #[arg(long)]
        host: Option<String>,
        /// Overrides API_PORT
        #[arg(long)]
        port: Option<u16>,
    },
    /// Extract one document, or every bill document in a folder
    Extract {
        /// File path, folder or URL
        input: String,
        /// Write one <name>.json per document here instead of stdout
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bill_extractor=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env().context("Invalid configuration")?;

    let backend = build_backend(&settings).context("LLM backend")?;
    info!(provider = backend.name(), "LLM backend ready");
    let pipeline = Pipeline::new(backend, PipelineOptions::from_settings(&settings));
    let loader = DocumentLoader::new(&settings.ocr_language);

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                settings.api_host = host;
            }
            if let Some(port) = port {
                settings.api_port = port;
            }
            let state = AppState::new(pipeline, Arc::new(loader));
            start_server(&settings.bind_addr(), state)
                .await
                .context("API server")?;
        }
        Command::Extract { input, out_dir } => {
            if let Some(dir) = &out_dir {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Create output dir {}", dir.display()))?;
            }
            for document in documents_for(&input) {
                let result = pipeline.extract_document(&loader, &document).await;
                if !result.is_success {
                    warn!(document = %document, "extraction failed");
                }
                let json = serde_json::to_string_pretty(&result)?;
                match &out_dir {
                    Some(dir) => {
                        let target = output_path(dir, &document);
                        std::fs::write(&target, json)
                            .with_context(|| format!("Write {}", target.display()))?;
                        info!(document = %document, output = %target.display(), "result written");
                    }
                    None => println!("{}", json),
                }
            }
        }
    }

    Ok(())
}

/// A folder expands to the bill documents directly inside it; anything else
/// is passed to the loader as is.
fn documents_for(input: &str) -> Vec<String> {
    let path = Path::new(input);
    if path.is_dir() {
        collect_documents(path)
            .into_iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect()
    } else {
        vec![input.to_string()]
    }
}

fn output_path(dir: &Path, document: &str) -> PathBuf {
    let name = document
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .and_then(|last| last.split(['?', '#']).next())
        .and_then(|last| Path::new(last).file_stem().map(|s| s.to_string_lossy().to_string()))
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "document".to_string());
    dir.join(format!("{}.json", name))
}

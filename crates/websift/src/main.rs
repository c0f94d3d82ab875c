use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use websift_core::{PipelineConfig, QueryRun};
use websift_local::pipeline::Pipeline;

#[derive(Parser, Debug)]
#[command(name = "websift")]
#[command(about = "Search the web, extract readable text, and summarize it", long_about = None)]
struct Cli {
    /// Configuration file (JSON). Missing or malformed files fall back to defaults.
    #[arg(long, env = "WEBSIFT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one query end to end and print the result as JSON.
    Query(QueryCmd),
    /// Serve the pipeline over HTTP (POST /search?query=...).
    Serve(ServeCmd),
}

#[derive(clap::Args, Debug)]
struct QueryCmd {
    /// The search query to process.
    query: String,
    /// Print the full run record (URLs and per-page outcomes), not just the summary.
    #[arg(long, default_value_t = false)]
    full: bool,
}

#[derive(clap::Args, Debug)]
struct ServeCmd {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: SocketAddr,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Read the JSON config file, tolerating every failure mode: a missing,
/// unreadable, or malformed file yields the defaults with a log line, never an
/// error. Per-field validation happens in `PipelineConfig::from_json_value`.
fn load_config(path: Option<&Path>) -> PipelineConfig {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let raw = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no config file; using defaults");
            return PipelineConfig::default();
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "config unreadable; using defaults");
            return PipelineConfig::default();
        }
    };
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(v) => PipelineConfig::from_json_value(&v),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "config is not valid JSON; using defaults");
            PipelineConfig::default()
        }
    }
}

fn build_pipeline(config: PipelineConfig) -> Result<Pipeline> {
    let client = websift_local::http_client(websift_local::DEFAULT_USER_AGENT)?;
    Ok(Pipeline::local(client, config))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
}

/// Wire shape of the API result: `summary` is null exactly when no summary
/// could be produced, and `message` appears only in that case.
#[derive(Debug, Serialize)]
struct SearchBody {
    query: String,
    summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

fn search_body(run: &QueryRun) -> SearchBody {
    if run.summary.is_empty() {
        SearchBody {
            query: run.query.clone(),
            summary: None,
            message: Some("Could not generate a summary for this query.".to_string()),
        }
    } else {
        SearchBody {
            query: run.query.clone(),
            summary: Some(run.summary.clone()),
            message: None,
        }
    }
}

async fn search_handler(
    State(pipeline): State<Arc<Pipeline>>,
    Query(params): Query<SearchParams>,
) -> Response {
    if params.query.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "message": "query must not be empty" })),
        )
            .into_response();
    }
    tracing::info!(query = %params.query, "search request");
    // The pipeline absorbs its own failures; an empty summary is the soft
    // failure surface and still a 200.
    let run = pipeline.run(&params.query).await;
    Json(search_body(&run)).into_response()
}

async fn serve(pipeline: Pipeline, bind: SocketAddr) -> Result<()> {
    let app = Router::new()
        .route("/search", post(search_handler))
        .with_state(Arc::new(pipeline));
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Query(cmd) => {
            let pipeline = build_pipeline(config)?;
            let run = pipeline.run(&cmd.query).await;
            let out = if cmd.full {
                serde_json::to_string_pretty(&run)?
            } else {
                serde_json::to_string_pretty(&search_body(&run))?
            };
            println!("{out}");
            Ok(())
        }
        Commands::Serve(cmd) => {
            let pipeline = build_pipeline(config)?;
            serve(pipeline, cmd.bind).await
        }
    }
}

use anyhow::{Context, Result, bail};
use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use comment_analyzer::client::AnalyzerClient;
use comment_analyzer::completion::HttpCompletionService;
use comment_analyzer::config::{
    BatchConfig, Cli, Command, ControllerConfig, ServerConfig, TOKEN_ENV, WorkerConfig,
    split_comments,
};
use comment_analyzer::engine::ClassificationEngine;
use comment_analyzer::registry::ToolRegistry;
use comment_analyzer::samples;
use comment_analyzer::server::{self, AppState};
use comment_analyzer::templates::TemplateStore;
use comment_analyzer::types::{AnalysisResult, Statistics};
use comment_analyzer::worker::Worker;

const SMOKE_COMMENT: &str = "The hotel room was dirty and uncomfortable";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json, !matches!(cli.command, Command::Worker(_)));

    match cli.command {
        Command::Worker(config) => run_worker(config).await,
        Command::Serve(config) => run_server(config).await,
        Command::Samples { set } => {
            for (i, comment) in samples::comments_for(&set)?.iter().enumerate() {
                println!("{}. {comment}", i + 1);
            }
            Ok(())
        }
        // controller commands block on the worker pipe
        command => tokio::task::spawn_blocking(move || run_controller(command)).await?,
    }
}

fn init_tracing(json: bool, ansi: bool) {
    // stdout carries relay frames in worker mode, so logs always go to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,comment_analyzer=debug".into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(ansi);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_worker(config: WorkerConfig) -> Result<()> {
    let Some(token) = config.api_token.clone().filter(|t| !t.trim().is_empty()) else {
        bail!(
            "{TOKEN_ENV} environment variable is required. \
             Get your token from https://huggingface.co/settings/tokens"
        );
    };
    tracing::info!(model = %config.model, base_url = %config.base_url, "Starting worker");

    let completion =
        HttpCompletionService::with_base_url(token, config.model.clone(), config.base_url.clone())
            .with_timeout(config.completion_timeout())?;
    let store = match &config.prompts_dir {
        Some(dir) => TemplateStore::from_dir(dir),
        None => TemplateStore::builtin(),
    };
    let engine = ClassificationEngine::new(Arc::new(completion), &store, config.generation_params())
        .context("Failed to load prompt templates")?;

    Worker::new(ToolRegistry::new(engine))
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await
}

async fn run_server(config: ServerConfig) -> Result<()> {
    let mut client = AnalyzerClient::new(config.controller.relay_config()?);
    if config.connect_on_start {
        client = tokio::task::spawn_blocking(move || {
            if let Err(e) = client.connect() {
                tracing::warn!(error = %e, "Worker not connected; use POST /connect");
            }
            client
        })
        .await?;
    }

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = server::router(AppState::new(client))
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(prometheus_layer),
        );

    let listener = TcpListener::bind(&config.server_address()).await?;
    tracing::info!("Server running on http://{}", config.server_address());

    axum::serve(listener, app).await?;
    Ok(())
}

fn run_controller(command: Command) -> Result<()> {
    match command {
        Command::Smoke(controller) => {
            let mut client = connect(&controller)?;
            for tool in client.list_tools()? {
                println!("tool: {} - {}", tool.name, tool.description);
            }
            let result = client.analyze(SMOKE_COMMENT)?;
            print_result(1, &result);
            client.disconnect();
            println!("Disconnected");
            Ok(())
        }
        Command::Analyze {
            comment,
            controller,
        } => {
            let result = connect(&controller)?.analyze(&comment)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Command::Batch(config) => run_batch(config),
        Command::Stats { input, controller } => {
            let results: Vec<AnalysisResult> = serde_json::from_str(
                &std::fs::read_to_string(&input)
                    .with_context(|| format!("Failed to read {}", input.display()))?,
            )
            .with_context(|| format!("{} is not a JSON array of analysis results", input.display()))?;
            if results.is_empty() {
                bail!("{} holds no results", input.display());
            }
            let stats = connect(&controller)?.statistics(&results)?;
            print_statistics(&stats);
            Ok(())
        }
        Command::Worker(_) | Command::Serve(_) | Command::Samples { .. } => {
            bail!("not a controller command")
        }
    }
}

fn connect(controller: &ControllerConfig) -> Result<AnalyzerClient> {
    let config = controller.relay_config()?;
    AnalyzerClient::connected(config).context("Failed to connect to worker")
}

fn run_batch(config: BatchConfig) -> Result<()> {
    let comments = match (&config.input, &config.sample) {
        (Some(path), _) => split_comments(
            &std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        ),
        (None, Some(set)) => samples::comments_for(set)?
            .into_iter()
            .map(str::to_string)
            .collect(),
        (None, None) => bail!("Pass --input FILE or --sample SET"),
    };
    if comments.is_empty() {
        bail!("No comments to analyze");
    }

    let batch_id = uuid::Uuid::new_v4().simple().to_string();
    tracing::info!(%batch_id, count = comments.len(), "Running batch analysis");

    let mut client = connect(&config.controller)?;
    let results = client.analyze_batch(&comments)?;
    for (i, result) in results.iter().enumerate() {
        print_result(i + 1, result);
    }
    print_statistics(&client.statistics(&results)?);

    if let Some(output) = &config.output {
        write_results(output, &results)?;
        println!("Results written to {}", output.display());
    }
    Ok(())
}

fn write_results(path: &Path, results: &[AnalysisResult]) -> Result<()> {
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn print_result(index: usize, result: &AnalysisResult) {
    let status = match &result.error {
        None => "ok".to_string(),
        Some(error) => format!("failed ({error})"),
    };
    println!(
        "{index:>3}. {:<13} {:<8} [{status}] {}",
        result.category, result.sentiment, result.comment
    );
}

fn print_statistics(stats: &Statistics) {
    println!("\nTotal comments: {}", stats.total_comments);
    println!("Category distribution:");
    for (label, share) in &stats.category_distribution {
        println!("  {:<13} {:>4} {:>6.1}%", label, share.count, share.percentage);
    }
    println!("Sentiment distribution:");
    for (label, share) in &stats.sentiment_distribution {
        println!("  {:<13} {:>4} {:>6.1}%", label, share.count, share.percentage);
    }
}

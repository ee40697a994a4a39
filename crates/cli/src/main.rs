//! flowdispatch entry point.
//!
//! This binary is the composition root:
//!
//! 1. **Load configuration**: read `flowdispatch.toml` (or `--config`), apply
//!    flag and environment overrides, validate.
//! 2. **Wire observability**: `tracing-subscriber` with an env filter, JSON or
//!    text output, and an optional OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: the Gemini client, the datastore and
//!    session resolver (REST or in-memory), and the article fetcher, injected
//!    into one shared [`dispatcher::ExecutionOrchestrator`].
//! 4. **Serve** the [`server`] router until Ctrl-C.

mod config;
mod telemetry;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;

use dispatcher::{Collaborators, DispatchSettings, ExecutionOrchestrator};
use llm::{FetcherConfig, GeminiClient, GeminiConfig, HttpContentFetcher};
use pipeline::{AccountDirectory, ContentFetcher, ExecutionStore, ModelClient, SessionResolver};
use server::{AppState, RouterOptions};
use store::{BearerIdentityResolver, GoTrueSessionResolver, MemoryStore, RestConfig, RestStore};

use crate::config::{Cli, Config};

pub const TRACING_TARGET_STARTUP: &str = "flowdispatch::startup";
pub const TRACING_TARGET_CONFIG: &str = "flowdispatch::config";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_STARTUP,
            error = %format!("{error:#}"),
            "flowdispatch terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }
    process::exit(1);
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_found = cli.config.exists();
    let mut config = Config::load(&cli.config)?;
    config.apply(&cli)?;
    config.validate()?;

    let _telemetry = telemetry::init(&config.telemetry)?;
    tracing::info!(
        target: TRACING_TARGET_STARTUP,
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        config_found,
        "starting flowdispatch"
    );
    config.log();

    let orchestrator = build_orchestrator(&config).context("failed to construct dispatcher")?;
    let app = server::router(
        AppState::new(Arc::new(orchestrator)),
        &RouterOptions {
            allowed_origins: config.server.cors_allowed_origins.clone(),
            max_body_bytes: config.server.max_body_bytes,
        },
    );

    let address = config.server.socket_addr();
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    server::serve(listener, app).await.context("server error")?;

    tracing::info!(target: TRACING_TARGET_STARTUP, "flowdispatch stopped");
    Ok(())
}

/// Builds the orchestrator and every adapter it depends on.
fn build_orchestrator(config: &Config) -> anyhow::Result<ExecutionOrchestrator> {
    let model: Option<Arc<dyn ModelClient>> = match config.model.api_key() {
        Some(key) => {
            let client = GeminiClient::new(
                GeminiConfig::new(key)
                    .with_model(config.model.model.clone())
                    .with_base_url(config.model.base_url.clone())
                    .with_timeout(config.model.timeout()),
            )
            .context("failed to build Gemini client")?;
            Some(Arc::new(client))
        }
        None => {
            tracing::warn!(
                target: TRACING_TARGET_STARTUP,
                "no Gemini API key; executions will be refused"
            );
            None
        }
    };

    let (store, accounts, sessions): (
        Arc<dyn ExecutionStore>,
        Arc<dyn AccountDirectory>,
        Arc<dyn SessionResolver>,
    ) = match &config.store {
        Some(section) => {
            let rest = Arc::new(
                RestStore::new(RestConfig {
                    timeout: section.timeout(),
                    ..RestConfig::new(section.url.clone(), section.service_key.clone())
                })
                .context("failed to build REST store")?,
            );
            let sessions =
                GoTrueSessionResolver::new(&section.url, section.anon_key(), section.timeout())
                    .context("failed to build session resolver")?;
            (rest.clone(), rest, Arc::new(sessions))
        }
        None => {
            tracing::warn!(
                target: TRACING_TARGET_STARTUP,
                "no store configured; using the in-memory store and treating bearer tokens as user ids"
            );
            let memory = Arc::new(MemoryStore::new());
            (memory.clone(), memory, Arc::new(BearerIdentityResolver))
        }
    };

    let fetcher: Option<Arc<dyn ContentFetcher>> = if config.dispatch.fetch_content {
        let fetcher = HttpContentFetcher::new(FetcherConfig {
            timeout: Duration::from_secs(config.dispatch.fetch_timeout_secs),
            ..FetcherConfig::default()
        })
        .context("failed to build content fetcher")?;
        Some(Arc::new(fetcher))
    } else {
        None
    };

    Ok(ExecutionOrchestrator::new(
        Collaborators {
            model,
            store,
            accounts,
            sessions,
            fetcher,
        },
        DispatchSettings {
            quota: config.quota.policy(),
            content_budget: config.dispatch.content_budget,
        },
    ))
}

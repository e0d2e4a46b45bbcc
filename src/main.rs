#![forbid(unsafe_code)]

//! `acp-agent` - tool-calling LLM agent server.
//!
//! Loads configuration, builds the tool registry and language model, and
//! serves the Agent Client Protocol over TCP or stdio.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use acp_agent::agent::AgentContext;
use acp_agent::config::GlobalConfig;
use acp_agent::mode::TransportMode;
use acp_agent::tools::ToolRegistry;
use acp_agent::{llm, transport, AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "acp-agent", about = "Tool-calling LLM agent over the Agent Client Protocol", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serve a single client over stdin/stdout instead of TCP.
    #[arg(long)]
    stdio: bool,

    /// Override `listen_addr` from the configuration.
    #[arg(long)]
    listen: Option<String>,

    /// Log output format (text or json). Logs always go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("acp-agent bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if args.stdio {
        config.transport = TransportMode::Stdio;
    }
    config.validate()?;
    info!(
        transport = ?config.transport,
        provider = ?config.llm.provider,
        max_turns = config.agent.max_turns,
        "configuration loaded"
    );

    // ── Build collaborators ─────────────────────────────
    let api_key = config.load_llm_api_key().await?;
    let model = llm::from_config(&config.llm, api_key)?;
    let registry = Arc::new(ToolRegistry::with_builtin_tools());
    info!(tools = ?registry.names(), "tool registry ready");
    let context = AgentContext::new(registry, model, Arc::new(config));

    // ── Serve ───────────────────────────────────────────
    let ct = CancellationToken::new();
    let serve_ct = ct.clone();
    let mut server = match context.config.transport {
        TransportMode::Tcp => {
            let listener = transport::bind(context.config.listen_addr()?).await?;
            tokio::spawn(async move { transport::serve_tcp(listener, context, serve_ct).await })
        }
        TransportMode::Stdio => {
            tokio::spawn(async move { transport::serve_stdio(context, serve_ct).await })
        }
    };

    let finished = tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
            None
        }
        finished = &mut server => Some(finished),
    };
    let outcome = match finished {
        Some(outcome) => outcome,
        None => server.await,
    };
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(%err, "transport failed"),
        Err(err) => error!(%err, "transport task panicked"),
    }

    info!("acp-agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                if let Err(err) = ctrl_c.await {
                    tracing::error!(%err, "ctrl-c signal handler failed");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the protocol in stdio mode.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

#![forbid(unsafe_code)]

//! `acp-agent-chat` - line-oriented terminal client for `acp-agent`.
//!
//! Connects over TCP, serves the agent's file-system requests from a local
//! workspace directory, and prints streamed updates as they arrive. Type a
//! prompt and press enter; `/cancel` interrupts the running prompt and
//! `/quit` exits.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use acp_agent::client::workspace::DEFAULT_MAX_GREP_RESULTS;
use acp_agent::client::{AcpClient, ClientOptions, Workspace};
use acp_agent::protocol::{SessionNotification, StopReason, UpdateKind};
use acp_agent::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "acp-agent-chat",
    about = "Terminal chat client for acp-agent",
    version,
    long_about = None
)]
struct Cli {
    /// Agent address.
    #[arg(default_value = "127.0.0.1:9090")]
    addr: String,

    /// Directory the agent may read and write; defaults to the current one.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Cap on matches returned for one grep search.
    #[arg(long, default_value_t = DEFAULT_MAX_GREP_RESULTS)]
    max_grep_results: usize,

    /// Log output format (text or json). Logs go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let root = match args.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let workspace = Workspace::new(&root)?.with_max_grep_results(args.max_grep_results);
    let cwd = workspace.root().to_path_buf();

    let stream = TcpStream::connect(&args.addr)
        .await
        .map_err(|err| AppError::Io(format!("failed to connect to {}: {err}", args.addr)))?;
    let (reader, writer) = stream.into_split();
    let (client, updates) = AcpClient::connect(reader, writer, workspace, ClientOptions::default());

    let init = client.initialize().await?;
    let agent = init.agent_info.as_ref().map_or_else(
        || "agent".to_owned(),
        |info| format!("{} {}", info.name, info.version),
    );
    let session_id = client.new_session(Some(cwd.clone())).await?;
    info!(session_id = %session_id, workspace = %cwd.display(), "session ready");
    println!("Connected to {agent} (protocol v{}). Workspace: {}", init.protocol_version, cwd.display());
    println!("Type a prompt, /cancel to interrupt, /quit to exit.");

    let printer = tokio::spawn(print_updates(updates));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt_marker().await;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        match text {
            "" | "/cancel" => continue,
            "/quit" => break,
            _ => {}
        }

        let prompt = client.prompt(&session_id, text);
        tokio::pin!(prompt);
        let mut stdin_open = true;
        let outcome = loop {
            tokio::select! {
                outcome = &mut prompt => break outcome,
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) if line.trim() == "/cancel" => client.cancel(&session_id).await?,
                    Ok(Some(line)) => debug!(line = %line, "input ignored while prompt runs"),
                    Ok(None) | Err(_) => stdin_open = false,
                },
            }
        };

        match outcome {
            Ok(StopReason::Done) => println!(),
            Ok(StopReason::Cancelled) => println!("\n[cancelled]"),
            Ok(StopReason::Error) => println!("\n[prompt failed]"),
            Err(err) => {
                eprintln!("prompt failed: {err}");
                if client.is_closed() {
                    break;
                }
            }
        }
        if !stdin_open {
            break;
        }
    }

    client.shutdown().await?;
    printer.abort();
    Ok(())
}

async fn print_updates(mut updates: mpsc::UnboundedReceiver<SessionNotification>) {
    while let Some(notification) = updates.recv().await {
        let update = notification.update;
        match update.kind {
            UpdateKind::AgentMessageChunk => println!("{}", update.content),
            UpdateKind::ToolCall => println!("  [tool] {}", update.content),
            UpdateKind::ToolCallResult => println!("  [result] {}", update.content),
            UpdateKind::Error => eprintln!("  [error] {}", update.content),
        }
    }
}

async fn prompt_marker() {
    let mut stdout = tokio::io::stdout();
    let written = match stdout.write_all(b"> ").await {
        Ok(()) => stdout.flush().await,
        Err(err) => Err(err),
    };
    if let Err(err) = written {
        debug!(%err, "failed to print prompt marker");
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
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

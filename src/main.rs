mod app;
mod cli;
mod config;
mod paths;

use anyhow::Context;
use clap::Parser;
use digest::{ChatError, ChatRequest};
use tokio_util::sync::CancellationToken;

/// Conventional exit status after SIGINT.
const EXIT_CANCELLED: i32 = 130;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let config_path = paths::config_path()?;
    let cfg = config::Config::load_optional(&config_path)?;
    tracing::debug!(?config_path, ?cfg, "resolved config");

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let chat = app::build_chat(&http, cfg.as_ref(), args.proxy_url.clone(), args.stub)?;

    let model = args
        .model
        .clone()
        .or_else(|| cfg.as_ref().and_then(|c| c.model.clone()))
        .unwrap_or_else(|| app::DEFAULT_MODEL.to_string());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("interrupt received; cancelling");
                cancel.cancel();
            }
        });
    }

    match &args.cmd {
        Some(cli::Command::Title { file }) => {
            return match app::cmd_title(&chat, &model, file, cancel).await {
                Ok(t) => {
                    println!("{t}");
                    Ok(())
                }
                Err(e) => exit_on(e),
            };
        }
        Some(cli::Command::Flashcards { file, count }) => {
            return match app::cmd_flashcards(&chat, &model, file, *count, cancel).await {
                Ok(cards) => {
                    println!("{}", serde_json::to_string_pretty(&cards)?);
                    Ok(())
                }
                Err(e) => exit_on(e),
            };
        }
        None => {}
    }

    let prompt = args.prompt.join(" ");
    let configured_prompt = args
        .system
        .clone()
        .or_else(|| cfg.as_ref().and_then(|c| c.system_prompt.clone()));

    let (message, system_prompt) = match &args.file {
        Some(path) => {
            let doc = app::read_document(path)?;
            let instructions = if prompt.trim().is_empty() {
                configured_prompt.unwrap_or_else(|| app::DEFAULT_SYSTEM_PROMPT.to_string())
            } else {
                prompt
            };
            (doc, instructions)
        }
        None => {
            if prompt.trim().is_empty() {
                anyhow::bail!("No input provided. Try: digest -f report.txt or digest \"Hello\"");
            }
            (prompt, configured_prompt.unwrap_or_default())
        }
    };

    let req = ChatRequest::new(model, message)
        .with_system_prompt(system_prompt)
        .with_grounded_search(args.grounded)
        .with_response_mime_type(args.json.then(|| "application/json".to_string()))
        .with_cancel(cancel.clone());

    let mut printer = app::Printer::new(std::io::stdout().lock(), std::io::stderr(), args.ndjson);
    match app::cmd_summarize(&chat, req, &mut printer).await {
        // A stream stopped by the token ends quietly but is still a cancellation.
        Ok(()) if cancel.is_cancelled() => exit_on(ChatError::Cancelled.into()),
        Ok(()) => Ok(()),
        Err(e) => exit_on(e),
    }
}

/// Cancellation exits quietly; everything else is reported.
fn exit_on(e: anyhow::Error) -> anyhow::Result<()> {
    if e
        .downcast_ref::<ChatError>()
        .is_some_and(ChatError::is_cancelled)
    {
        std::process::exit(EXIT_CANCELLED);
    }
    Err(e)
}

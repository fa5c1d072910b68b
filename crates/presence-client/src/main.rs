//! Presence CLI entry point
//!
//! Run with:
//! ```bash
//! cargo run -p presence-client --bin presence-cli -- <topic-id>
//! ```
//!
//! Configuration is loaded from environment variables. `USER_ID`,
//! `DISPLAY_NAME` and `AUTH_TOKEN` identify the local user. Lines read from
//! stdin are sent as messages; `/typing`, `/stop`, `/react <message> <emoji>`
//! and `/who` are commands.

use anyhow::Context;
use presence_client::{HttpHistoryClient, RealtimeClient, TopicHandle};
use presence_common::{try_init_tracing_with_config, AppConfig, TracingConfig};
use presence_core::UserRef;
use presence_engine::TopicUpdate;
use presence_transport::WebSocketConnector;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing
    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run(config).await {
        error!(error = %e, "presence-cli failed");
        std::process::exit(1);
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let topic_id = std::env::args()
        .nth(1)
        .context("usage: presence-cli <topic-id>")?;

    let user_id = std::env::var("USER_ID").unwrap_or_else(|_| "cli".to_string());
    let display_name = std::env::var("DISPLAY_NAME").unwrap_or_else(|_| user_id.clone());
    let token = std::env::var("AUTH_TOKEN").ok();

    info!(
        env = ?config.app.env,
        url = %config.transport.url,
        user_id = %user_id,
        "Configuration loaded"
    );

    let mut connector = WebSocketConnector::new(&config.transport.url);
    let mut history = HttpHistoryClient::from_config(&config.history)?;
    if let Some(token) = token {
        connector = connector.with_token(token.clone());
        history = history.with_token(token);
    }

    let client = RealtimeClient::builder(UserRef::new(user_id, display_name), connector)
        .config(config)
        .history(Arc::new(history))
        .build()?;

    client.connect().await?;
    let mut topic = client.use_topic(topic_id).await?;
    info!(topic_id = %topic.topic_id(), "Joined topic");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => handle_line(&topic, line.trim())?,
                None => break,
            },
            update = topic.next_update() => match update {
                Some(TopicUpdate::Event(event)) => {
                    let payload = event.payload.map(|p| p.to_string()).unwrap_or_default();
                    println!("[{}] {} {} {}", event.seq, event.user_id, event.kind, payload);
                }
                Some(TopicUpdate::ResyncRequired { since }) => println!("-- resyncing after seq {since} --"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    topic.close();
    client.shutdown().await;
    Ok(())
}

fn handle_line(topic: &TopicHandle, line: &str) -> anyhow::Result<()> {
    let mut parts = line.split_whitespace();
    match parts.next() {
        None => {}
        Some("/typing") => topic.start_typing()?,
        Some("/stop") => topic.stop_typing()?,
        Some("/react") => match (parts.next(), parts.next()) {
            (Some(message_id), Some(emoji)) => topic.react(message_id, emoji)?,
            _ => println!("usage: /react <message-id> <emoji>"),
        },
        Some("/who") => {
            for entry in topic.presence() {
                println!("  {} ({})", entry.user.display_name, entry.user_id());
            }
            let typing = topic.typing_users();
            if !typing.is_empty() {
                let names: Vec<String> = typing.iter().map(ToString::to_string).collect();
                println!("  typing: {}", names.join(", "));
            }
            if let Some(err) = topic.last_error() {
                println!("  last error: {} ({})", err.message, err.code);
            }
        }
        Some(_) => topic.send_message(line)?,
    }
    Ok(())
}

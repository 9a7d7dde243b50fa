//! EVOAPP messaging demo CLI.
//!
//! Non-interactive walkthrough of the messaging core against a seeded
//! in-process backend: contact search, opening a chat, sending, directory
//! snapshots and a one-sided conversation erase. Useful for eyeballing the
//! listener traffic and log output.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use evoapp_chat_core::chat::backend::entities::MessageRow;
use evoapp_chat_core::chat::backend::memory::MemoryBackend;
use evoapp_chat_core::chat::client::ChatClient;
use evoapp_chat_core::chat::directory::{ConversationEntry, DirectoryListener};
use evoapp_chat_core::chat::session::MessageListener;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::info;

/// EVOAPP messaging core demo.
#[derive(Parser, Debug)]
#[command(name = "evoapp-cli")]
#[command(about = "EVOAPP messaging core demo against an in-process backend", long_about = None)]
struct Args {
    /// User to run the walkthrough as.
    #[arg(short, long, default_value = "ana")]
    user: String,

    /// Seconds to keep listening for realtime events before exiting.
    #[arg(short, long, default_value = "2")]
    linger: u64,

    /// Log filter (RUST_LOG overrides this when set).
    #[arg(long, default_value = "info,evoapp_chat_core=debug")]
    log_level: String,
}

/// Log to stdout and to a file at the same time.
fn init_logger(log_level: &str) {
    use std::fs::OpenOptions;
    use std::io;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("evoapp-cli.log")
        .expect("failed to create evoapp-cli.log");

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(false)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

struct CliDirectoryListener;

#[async_trait]
impl DirectoryListener for CliDirectoryListener {
    async fn on_conversations_changed(&self, entries: Vec<ConversationEntry>) {
        info!("[CLI/Directory] {} conversations:", entries.len());
        for entry in entries {
            let preview = entry
                .preview
                .map(|m| m.text)
                .unwrap_or_else(|| "(no messages yet)".to_string());
            info!(
                "[CLI/Directory]   {} | unread: {} | {}",
                entry.user.display_name, entry.unread_count, preview
            );
        }
    }
}

struct CliMessageListener;

#[async_trait]
impl MessageListener for CliMessageListener {
    async fn on_session_opened(&self, partner_id: String) {
        info!("[CLI/Session] opened chat with {partner_id}");
    }

    async fn on_message_received(&self, message: MessageRow) {
        info!(
            "[CLI/Session] received from {}: {}",
            message.sender_id, message.text
        );
    }

    async fn on_message_sent(&self, message: MessageRow) {
        info!(
            "[CLI/Session] sent to {}: {}",
            message.receiver_id, message.text
        );
    }

    async fn on_session_closed(&self, partner_id: String) {
        info!("[CLI/Session] closed chat with {partner_id}");
    }

    async fn on_realtime_status_changed(&self, connected: bool, detail: String) {
        info!("[CLI/Session] realtime connected={connected}: {detail}");
    }
}

fn seeded_backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_user("ana", "Ana Silva", "ana");
    backend.add_user("bruno", "Bruno Costa", "bruno");
    backend.add_user("carla", "Carla Dias", "carla");
    backend.add_connection("ana", "bruno");
    backend.add_connection("carla", "ana");
    backend
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level);

    info!("[CLI] EVOAPP messaging core demo, running as {}", args.user);

    let backend = seeded_backend();
    backend.sign_in_as(Some(&args.user));

    let mut client = ChatClient::with_backend(backend.clone());
    client.set_directory_listener(Arc::new(CliDirectoryListener));
    client.set_message_listener(Arc::new(CliMessageListener));
    client.connect().await?;

    let contacts = client.refresh_contacts().await?;
    info!("[CLI] {} contacts available", contacts.len());
    let hits = client.search_contacts("b");
    for hit in &hits {
        info!("[CLI] search hit: {} (@{})", hit.display_name, hit.username);
    }

    let Some(partner) = hits.first().or(contacts.first()).cloned() else {
        info!("[CLI] no contacts to chat with, exiting");
        return Ok(());
    };

    client.open_chat(&partner.id).await?;
    client.set_draft("Oi!").await;
    client.send_draft().await?;
    client.send_message("Tudo bem?").await?;

    client.refresh_conversations().await?;

    info!("[CLI] erasing the conversation with {}", partner.id);
    let report = client.delete_conversation(&partner.id, true).await?;
    info!(
        "[CLI] erased: {} sent and {} received rows hidden",
        report.sent_hidden, report.received_hidden
    );

    sleep(Duration::from_secs(args.linger)).await;
    info!("[CLI] done");
    Ok(())
}

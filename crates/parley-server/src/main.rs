//! # parley-server
//!
//! Two-party chat server.
//!
//! This binary provides:
//! - **REST API** (axum) to resolve conversations, send, clear, delete and
//!   mark messages seen, and download attachments
//! - **WebSocket gateway** for presence, typing and live message delivery
//! - **SQLite persistence** through `parley-store`

mod api;
mod attachments;
mod auth;
mod broadcaster;
mod chat;
mod config;
mod db;
mod error;
mod gateway;
mod presence;

use std::sync::Arc;

use parley_shared::constants::APP_NAME;
use parley_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::attachments::AttachmentStore;
use crate::broadcaster::Broadcaster;
use crate::chat::ChatService;
use crate::config::ServerConfig;
use crate::db::DbHandle;
use crate::presence::PresenceRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,parley_server=debug,parley_store=debug")
            }),
        )
        .init();

    info!("Starting {} chat server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the database
    // -----------------------------------------------------------------------
    let database = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    if let Some(path) = database.path() {
        info!(path = %path.display(), "Database opened");
    }

    // Nobody is connected yet; flags left over from an unclean shutdown are stale.
    let reset = database.reset_presence()?;
    if reset > 0 {
        info!(users = reset, "Cleared stale online flags");
    }

    // -----------------------------------------------------------------------
    // 4. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = DbHandle::new(database, config.db_timeout);

    // Attachment store (creates directory if missing)
    let attachments =
        AttachmentStore::new(config.attachment_path.clone(), config.max_attachment_size).await?;

    let broadcaster = Broadcaster::new(config.outbound_queue);
    let presence = PresenceRegistry::new(db.clone(), broadcaster.clone());
    let chat = ChatService::new(db, broadcaster.clone(), attachments);

    let http_addr = config.http_addr;
    let app_state = AppState {
        chat,
        presence,
        broadcaster,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

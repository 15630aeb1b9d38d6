//! Document library commands: `mg import` and `mg docs`, plus the shared
//! helper every anchor command uses to open a document session.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use marginalia_core::events::TracingSink;
use marginalia_core::{DocumentSession, EventBus};

use crate::config::Config;
use crate::db;
use crate::sqlite_store::{ImportOutcome, SqliteStore};

/// Connect to the database and wrap it in a store.
pub async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let pool = db::connect(config).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

/// Open `document_id` with events logged through `tracing`.
pub async fn open_session(config: &Config, document_id: &str) -> Result<DocumentSession> {
    let store = open_store(config).await?;
    let mut bus = EventBus::new();
    bus.subscribe(Arc::new(TracingSink));
    DocumentSession::open(store, bus, config.render_options(), document_id)
        .await
        .with_context(|| format!("Failed to open document {}", document_id))
}

/// Import a markup file into the library.
pub async fn import_file(
    config: &Config,
    path: &Path,
    title: Option<&str>,
    source_url: Option<&str>,
) -> Result<ImportOutcome> {
    let raw_markup = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;
    let store = open_store(config).await?;
    let outcome = store
        .import_document(&raw_markup, title, source_url)
        .await?;
    store.pool().close().await;
    Ok(outcome)
}

pub async fn run_import(
    config: &Config,
    path: &Path,
    title: Option<&str>,
    source_url: Option<&str>,
) -> Result<()> {
    let outcome = import_file(config, path, title, source_url).await?;
    if outcome.created {
        println!("imported {}", outcome.document_id);
    } else {
        println!("already imported {}", outcome.document_id);
    }
    Ok(())
}

pub async fn run_docs(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let docs = store.list_documents().await?;
    store.pool().close().await;

    if docs.is_empty() {
        println!("No documents imported.");
        return Ok(());
    }

    println!("{:<38} {:<8} {:<22} TITLE", "ID", "ANCHORS", "IMPORTED");
    for doc in docs {
        println!(
            "{:<38} {:<8} {:<22} {}",
            doc.id,
            doc.anchor_count,
            doc.created_at,
            doc.title.as_deref().unwrap_or("(untitled)")
        );
    }
    Ok(())
}

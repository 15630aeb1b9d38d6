//! SQLite-backed [`AnchorStore`] implementation.
//!
//! Besides the trait operations, the SQLite store owns the document
//! library: importing raw markup (de-duplicated by content hash) and
//! listing what has been imported.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use marginalia_core::store::AnchorStore;
use marginalia_core::{Anchor, Annotation, HighlightColor};

/// One imported document, without its markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: Option<String>,
    pub source_url: Option<String>,
    pub content_hash: String,
    pub created_at: String, // ISO8601
    pub anchor_count: i64,
}

/// Result of [`SqliteStore::import_document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub document_id: String,
    /// False when identical markup was already imported.
    pub created: bool,
}

/// SQLite implementation of the [`AnchorStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Store raw markup as a new document, unless the same bytes exist already.
    pub async fn import_document(
        &self,
        raw_markup: &str,
        title: Option<&str>,
        source_url: Option<&str>,
    ) -> Result<ImportOutcome> {
        let hash = content_hash(raw_markup);

        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE content_hash = ?")
                .bind(&hash)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(document_id) = existing {
            debug!(%document_id, "document already imported");
            return Ok(ImportOutcome {
                document_id,
                created: false,
            });
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO documents (id, title, source_url, raw_markup, content_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(title)
        .bind(source_url)
        .bind(raw_markup)
        .bind(&hash)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(ImportOutcome {
            document_id: id,
            created: true,
        })
    }

    /// All documents, newest first, with their anchor counts.
    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT d.id, d.title, d.source_url, d.content_hash, d.created_at,
                   (SELECT COUNT(*) FROM anchors a WHERE a.document_id = d.id) AS anchor_count
            FROM documents d
            ORDER BY d.created_at DESC, d.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_summary).collect())
    }

    pub async fn document(&self, document_id: &str) -> Result<Option<DocumentSummary>> {
        let row = sqlx::query(
            r#"
            SELECT d.id, d.title, d.source_url, d.content_hash, d.created_at,
                   (SELECT COUNT(*) FROM anchors a WHERE a.document_id = d.id) AS anchor_count
            FROM documents d
            WHERE d.id = ?
            "#,
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_summary))
    }

    /// Insert an anchor record exactly as given.
    ///
    /// Used to restore exported anchors, whose offsets may be missing.
    pub async fn insert_anchor(&self, anchor: &Anchor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO anchors (id, document_id, quote, global_start, global_end, color, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&anchor.id)
        .bind(&anchor.document_id)
        .bind(&anchor.quote)
        .bind(anchor.global_start)
        .bind(anchor.global_end)
        .bind(anchor.color.as_str())
        .bind(format_ts(anchor.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn anchor_exists(&self, anchor_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM anchors WHERE id = ?")
            .bind(anchor_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }
}

fn content_hash(raw_markup: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_markup.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp in database: {}", raw))?
        .with_timezone(&Utc))
}

fn format_ts_iso(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn row_to_summary(row: &SqliteRow) -> DocumentSummary {
    DocumentSummary {
        id: row.get("id"),
        title: row.get("title"),
        source_url: row.get("source_url"),
        content_hash: row.get("content_hash"),
        created_at: format_ts_iso(row.get("created_at")),
        anchor_count: row.get("anchor_count"),
    }
}

fn row_to_anchor(row: &SqliteRow) -> Result<Anchor> {
    let id: String = row.get("id");
    let color: String = row.get("color");
    let created_at: String = row.get("created_at");
    let note: Option<String> = row.get("note");
    let note_updated_at: Option<String> = row.get("note_updated_at");

    let annotation = match (note, note_updated_at) {
        (Some(note), Some(updated_at)) => Some(Annotation {
            anchor_id: id.clone(),
            note,
            updated_at: parse_ts(&updated_at)?,
        }),
        _ => None,
    };

    Ok(Anchor {
        document_id: row.get("document_id"),
        quote: row.get("quote"),
        global_start: row.get("global_start"),
        global_end: row.get("global_end"),
        color: color
            .parse::<HighlightColor>()
            .with_context(|| format!("anchor {} has an invalid color", id))?,
        created_at: parse_ts(&created_at)?,
        annotation,
        id,
    })
}

#[async_trait]
impl AnchorStore for SqliteStore {
    async fn load_raw_markup(&self, document_id: &str) -> Result<String> {
        let markup: Option<String> =
            sqlx::query_scalar("SELECT raw_markup FROM documents WHERE id = ?")
                .bind(document_id)
                .fetch_optional(&self.pool)
                .await?;
        match markup {
            Some(markup) => Ok(markup),
            None => bail!("document not found: {}", document_id),
        }
    }

    async fn load_anchors(&self, document_id: &str) -> Result<Vec<Anchor>> {
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.document_id, a.quote, a.global_start, a.global_end, a.color,
                   a.created_at, n.note, n.updated_at AS note_updated_at
            FROM anchors a
            LEFT JOIN annotations n ON n.anchor_id = a.id
            WHERE a.document_id = ?
            ORDER BY a.created_at ASC, a.id ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_anchor).collect()
    }

    async fn create_anchor(
        &self,
        document_id: &str,
        quote: &str,
        global_start: i64,
        global_end: i64,
        color: HighlightColor,
    ) -> Result<Anchor> {
        if self.document(document_id).await?.is_none() {
            bail!("document not found: {}", document_id);
        }
        if quote.is_empty() {
            bail!("anchor quote must not be empty");
        }
        if global_start < 0 || global_end <= global_start {
            bail!("invalid anchor span {}..{}", global_start, global_end);
        }

        let anchor = Anchor {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            quote: quote.to_string(),
            global_start: Some(global_start),
            global_end: Some(global_end),
            color,
            // Stored with microsecond precision
            created_at: Utc::now().trunc_subsecs(6),
            annotation: None,
        };
        self.insert_anchor(&anchor).await?;
        Ok(anchor)
    }

    async fn update_anchor_color(&self, anchor_id: &str, color: HighlightColor) -> Result<()> {
        let result = sqlx::query("UPDATE anchors SET color = ? WHERE id = ?")
            .bind(color.as_str())
            .bind(anchor_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("anchor not found: {}", anchor_id);
        }
        Ok(())
    }

    async fn delete_anchor(&self, anchor_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM annotations WHERE anchor_id = ?")
            .bind(anchor_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM anchors WHERE id = ?")
            .bind(anchor_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            bail!("anchor not found: {}", anchor_id);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_annotation(&self, anchor_id: &str, note: Option<&str>) -> Result<()> {
        if !self.anchor_exists(anchor_id).await? {
            bail!("anchor not found: {}", anchor_id);
        }

        match note.map(str::trim).filter(|n| !n.is_empty()) {
            Some(note) => {
                sqlx::query(
                    r#"
                    INSERT INTO annotations (anchor_id, note, updated_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(anchor_id) DO UPDATE SET
                        note = excluded.note,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(anchor_id)
                .bind(note)
                .bind(format_ts(Utc::now()))
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM annotations WHERE anchor_id = ?")
                    .bind(anchor_id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

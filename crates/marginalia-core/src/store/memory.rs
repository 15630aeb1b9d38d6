//! In-memory [`AnchorStore`] implementation for testing and embedding.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Anchor ids are fresh UUIDs, like the SQLite store's.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{Anchor, Annotation, HighlightColor};

use super::AnchorStore;

/// In-memory store for tests and embedders without a database.
pub struct InMemoryStore {
    documents: RwLock<HashMap<String, String>>,
    anchors: RwLock<Vec<Anchor>>,
    annotations: RwLock<HashMap<String, Annotation>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            anchors: RwLock::new(Vec::new()),
            annotations: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace a document's raw markup.
    pub fn put_document(&self, document_id: &str, raw_markup: &str) -> Result<()> {
        write(&self.documents)?.insert(document_id.to_string(), raw_markup.to_string());
        Ok(())
    }

    /// Insert an anchor record verbatim, offsets and id included.
    ///
    /// Useful to seed stale or corrupt records that `create_anchor` would
    /// never produce.
    pub fn insert_anchor(&self, anchor: Anchor) -> Result<()> {
        let mut anchors = write(&self.anchors)?;
        anchors.retain(|a| a.id != anchor.id);
        anchors.push(anchor);
        Ok(())
    }

    pub fn anchor_count(&self) -> usize {
        read(&self.anchors).map(|a| a.len()).unwrap_or(0)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl AnchorStore for InMemoryStore {
    async fn load_raw_markup(&self, document_id: &str) -> Result<String> {
        match read(&self.documents)?.get(document_id) {
            Some(markup) => Ok(markup.clone()),
            None => bail!("document not found: {}", document_id),
        }
    }

    async fn load_anchors(&self, document_id: &str) -> Result<Vec<Anchor>> {
        let annotations = read(&self.annotations)?;
        let mut anchors: Vec<Anchor> = read(&self.anchors)?
            .iter()
            .filter(|a| a.document_id == document_id)
            .cloned()
            .map(|mut a| {
                a.annotation = annotations.get(&a.id).cloned();
                a
            })
            .collect();
        anchors.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(anchors)
    }

    async fn create_anchor(
        &self,
        document_id: &str,
        quote: &str,
        global_start: i64,
        global_end: i64,
        color: HighlightColor,
    ) -> Result<Anchor> {
        if !read(&self.documents)?.contains_key(document_id) {
            bail!("document not found: {}", document_id);
        }
        if quote.is_empty() {
            bail!("anchor quote must not be empty");
        }
        if global_end <= global_start || global_start < 0 {
            bail!("invalid anchor span {}..{}", global_start, global_end);
        }
        let anchor = Anchor {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            quote: quote.to_string(),
            global_start: Some(global_start),
            global_end: Some(global_end),
            color,
            created_at: Utc::now(),
            annotation: None,
        };
        write(&self.anchors)?.push(anchor.clone());
        Ok(anchor)
    }

    async fn update_anchor_color(&self, anchor_id: &str, color: HighlightColor) -> Result<()> {
        let mut anchors = write(&self.anchors)?;
        match anchors.iter_mut().find(|a| a.id == anchor_id) {
            Some(anchor) => {
                anchor.color = color;
                Ok(())
            }
            None => bail!("anchor not found: {}", anchor_id),
        }
    }

    async fn delete_anchor(&self, anchor_id: &str) -> Result<()> {
        let mut anchors = write(&self.anchors)?;
        let before = anchors.len();
        anchors.retain(|a| a.id != anchor_id);
        if anchors.len() == before {
            bail!("anchor not found: {}", anchor_id);
        }
        write(&self.annotations)?.remove(anchor_id);
        Ok(())
    }

    async fn set_annotation(&self, anchor_id: &str, note: Option<&str>) -> Result<()> {
        if !read(&self.anchors)?.iter().any(|a| a.id == anchor_id) {
            bail!("anchor not found: {}", anchor_id);
        }
        let mut annotations = write(&self.annotations)?;
        match note.map(str::trim).filter(|n| !n.is_empty()) {
            Some(note) => {
                annotations.insert(
                    anchor_id.to_string(),
                    Annotation {
                        anchor_id: anchor_id.to_string(),
                        note: note.to_string(),
                        updated_at: Utc::now(),
                    },
                );
            }
            None => {
                annotations.remove(anchor_id);
            }
        }
        Ok(())
    }
}

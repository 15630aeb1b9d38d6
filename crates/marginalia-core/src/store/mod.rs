//! Persistence collaborator for anchors and document markup.
//!
//! The [`AnchorStore`] trait is everything the engine needs from storage:
//! the raw markup of a document and the CRUD operations on its anchors.
//! The engine never assumes a particular backend; the `mg` binary plugs in
//! SQLite, tests and embedders use [`memory::InMemoryStore`].
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Anchor, HighlightColor};

/// Abstract storage backend for documents and their anchors.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`load_raw_markup`](AnchorStore::load_raw_markup) | Stored markup of a document |
/// | [`load_anchors`](AnchorStore::load_anchors) | All anchors of a document, annotations attached |
/// | [`create_anchor`](AnchorStore::create_anchor) | Persist a new anchor and assign its canonical id |
/// | [`update_anchor_color`](AnchorStore::update_anchor_color) | Change an anchor's color |
/// | [`delete_anchor`](AnchorStore::delete_anchor) | Remove an anchor and its annotation |
/// | [`set_annotation`](AnchorStore::set_annotation) | Attach, replace, or clear an anchor's note |
#[async_trait]
pub trait AnchorStore: Send + Sync {
    /// Raw (unrendered) markup of a document. Errors when the document is unknown.
    async fn load_raw_markup(&self, document_id: &str) -> Result<String>;

    /// Every anchor stored for a document, in creation order.
    async fn load_anchors(&self, document_id: &str) -> Result<Vec<Anchor>>;

    /// Persist a new anchor. Returns the stored record with its canonical id.
    async fn create_anchor(
        &self,
        document_id: &str,
        quote: &str,
        global_start: i64,
        global_end: i64,
        color: HighlightColor,
    ) -> Result<Anchor>;

    async fn update_anchor_color(&self, anchor_id: &str, color: HighlightColor) -> Result<()>;

    async fn delete_anchor(&self, anchor_id: &str) -> Result<()>;

    /// Attach `note` to an anchor, or clear the annotation with `None`.
    async fn set_annotation(&self, anchor_id: &str, note: Option<&str>) -> Result<()>;
}

//! Document session: the stateful controller around the pure engine.
//!
//! A [`DocumentSession`] owns one open document: its raw markup, the
//! anchors currently known for it, and the last rendered markup. Every
//! mutation updates the local anchor list first, re-renders from a
//! snapshot, and only then talks to the [`AnchorStore`]. When the store
//! rejects the change, the local list is restored and the page is
//! re-rendered again, so the display never disagrees with the store for
//! longer than one round trip.
//!
//! # Creation state machine
//!
//! ```text
//! begin_create ──► Pending { temp_id } ──┬─► Confirmed { server_id }
//!                                        └─► RolledBack
//! ```
//!
//! Creation is split in two so callers that drive the store themselves can
//! interleave other work. [`DocumentSession::create_anchor`] runs both
//! halves around the store call. A generation counter is bumped on every
//! [`navigate`](DocumentSession::navigate); a creation that completes for
//! an older generation is discarded without touching the new document.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::dispatch::InteractionDispatcher;
use crate::error::{AnchorError, MarkupError};
use crate::events::{AnchorEvent, EventBus};
use crate::markup::ContentTree;
use crate::models::{temporary_id, Anchor, Annotation, BoundingRegion, HighlightColor};
use crate::render::{render_highlights, RenderOptions, RenderOutput};
use crate::selection::{selection_to_anchor, SelectionSpan};
use crate::store::AnchorStore;

/// Lifecycle of a locally known anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorState {
    /// Applied optimistically; the store has not answered yet.
    Pending { temp_id: String },
    Confirmed { server_id: String },
    /// The store refused the creation and the anchor was removed again.
    RolledBack,
}

#[derive(Debug, Clone)]
struct TrackedAnchor {
    anchor: Anchor,
    state: AnchorState,
}

/// Handle for an optimistic creation awaiting the store's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCreate {
    generation: u64,
    document_id: String,
    temp_id: String,
    quote: String,
    global_start: i64,
    global_end: i64,
    color: HighlightColor,
}

impl PendingCreate {
    pub fn temp_id(&self) -> &str {
        &self.temp_id
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }

    pub fn span(&self) -> (i64, i64) {
        (self.global_start, self.global_end)
    }

    pub fn color(&self) -> HighlightColor {
        self.color
    }
}

/// Controller for the currently open document.
pub struct DocumentSession {
    store: Arc<dyn AnchorStore>,
    bus: EventBus,
    options: RenderOptions,
    document_id: String,
    generation: u64,
    raw_markup: String,
    anchors: Vec<TrackedAnchor>,
    rendered: String,
    last_render: Option<RenderOutput>,
}

impl DocumentSession {
    /// Load `document_id` from `store` and render it.
    pub async fn open(
        store: Arc<dyn AnchorStore>,
        bus: EventBus,
        options: RenderOptions,
        document_id: &str,
    ) -> anyhow::Result<Self> {
        let mut session = Self {
            store,
            bus,
            options,
            document_id: String::new(),
            generation: 0,
            raw_markup: String::new(),
            anchors: Vec::new(),
            rendered: String::new(),
            last_render: None,
        };
        session.navigate(document_id).await?;
        Ok(session)
    }

    /// Switch to another document. In-flight creations for the previous
    /// document are discarded when they complete.
    pub async fn navigate(&mut self, document_id: &str) -> anyhow::Result<()> {
        let raw_markup = self.store.load_raw_markup(document_id).await?;
        let loaded = self.store.load_anchors(document_id).await?;

        self.generation += 1;
        self.document_id = document_id.to_string();
        self.raw_markup = raw_markup;
        self.anchors = loaded.into_iter().map(confirmed).collect();
        info!(
            document_id,
            anchors = self.anchors.len(),
            generation = self.generation,
            "opened document"
        );
        self.render();
        Ok(())
    }

    /// Re-fetch the anchor list from the store. Pending anchors survive.
    pub async fn reload(&mut self) -> anyhow::Result<()> {
        let loaded = self.store.load_anchors(&self.document_id).await?;
        let pending: Vec<TrackedAnchor> = self
            .anchors
            .drain(..)
            .filter(|t| matches!(t.state, AnchorState::Pending { .. }))
            .collect();
        self.anchors = loaded.into_iter().map(confirmed).collect();
        self.anchors.extend(pending);
        self.render();
        Ok(())
    }

    /// Ask every listener to reload the anchor list.
    pub fn request_refresh(&self) {
        self.bus.publish(AnchorEvent::RefreshRequested);
    }

    /// Re-render the current anchors over the raw markup.
    ///
    /// Unparseable markup is served as-is, without highlights.
    pub fn render(&mut self) -> &str {
        let snapshot = self.anchors();
        match render_highlights(&self.raw_markup, &snapshot, &self.options) {
            Ok(output) => {
                self.rendered = output.markup.clone();
                self.last_render = Some(output);
            }
            Err(err) => {
                warn!(
                    document_id = %self.document_id,
                    error = %err,
                    "markup could not be parsed; serving it without highlights"
                );
                self.rendered = self.raw_markup.clone();
                self.last_render = None;
            }
        }
        &self.rendered
    }

    /// Parse the current rendered markup, e.g. to resolve a live selection.
    pub fn content_tree(&self) -> Result<ContentTree, MarkupError> {
        ContentTree::parse(&self.rendered)
    }

    /// First half of creation: convert the selection, apply the anchor
    /// locally under a temporary id, announce it, and re-render.
    pub fn begin_create(
        &mut self,
        tree: &ContentTree,
        selection: &SelectionSpan,
        color: HighlightColor,
    ) -> Result<PendingCreate, AnchorError> {
        let draft = selection_to_anchor(tree, tree.root(), selection)?;
        let temp_id = temporary_id();
        let anchor = Anchor {
            id: temp_id.clone(),
            document_id: self.document_id.clone(),
            quote: draft.quote.clone(),
            global_start: Some(draft.global_start as i64),
            global_end: Some(draft.global_end as i64),
            color,
            created_at: Utc::now(),
            annotation: None,
        };
        self.anchors.push(TrackedAnchor {
            anchor: anchor.clone(),
            state: AnchorState::Pending {
                temp_id: temp_id.clone(),
            },
        });
        self.bus.publish(AnchorEvent::Created { anchor });
        self.render();

        Ok(PendingCreate {
            generation: self.generation,
            document_id: self.document_id.clone(),
            temp_id,
            quote: draft.quote,
            global_start: draft.global_start as i64,
            global_end: draft.global_end as i64,
            color,
        })
    }

    /// Second half of creation: apply the store's answer.
    ///
    /// Returns `None` when the session moved to another document in the
    /// meantime and the answer was discarded.
    pub fn complete_create(
        &mut self,
        pending: PendingCreate,
        result: anyhow::Result<Anchor>,
    ) -> Option<AnchorState> {
        if pending.generation != self.generation {
            debug!(
                temp_id = %pending.temp_id,
                document_id = %pending.document_id,
                "discarding creation for a document that is no longer open"
            );
            return None;
        }

        let state = match result {
            Ok(stored) => {
                let server_id = stored.id.clone();
                match self.position(&pending.temp_id) {
                    // Swap in place so the anchor keeps its render position.
                    Some(index) => {
                        let tracked = &mut self.anchors[index];
                        tracked.anchor = Anchor {
                            annotation: tracked.anchor.annotation.take(),
                            ..stored
                        };
                        tracked.state = AnchorState::Confirmed {
                            server_id: server_id.clone(),
                        };
                    }
                    None => self.anchors.push(confirmed(stored)),
                }
                debug!(temp_id = %pending.temp_id, server_id = %server_id, "anchor confirmed");
                AnchorState::Confirmed { server_id }
            }
            Err(err) => {
                warn!(
                    temp_id = %pending.temp_id,
                    error = %format!("{:#}", err),
                    "anchor creation failed; rolling back"
                );
                self.anchors.retain(|t| t.anchor.id != pending.temp_id);
                AnchorState::RolledBack
            }
        };
        self.render();
        Some(state)
    }

    /// Convert the selection and persist the anchor. No retry on failure.
    pub async fn create_anchor(
        &mut self,
        tree: &ContentTree,
        selection: &SelectionSpan,
        color: HighlightColor,
    ) -> Result<Anchor, AnchorError> {
        let pending = self.begin_create(tree, selection, color)?;
        let result = self
            .store
            .create_anchor(
                &pending.document_id,
                &pending.quote,
                pending.global_start,
                pending.global_end,
                pending.color,
            )
            .await;
        let failure = result.as_ref().err().map(|e| format!("{:#}", e));
        let temp_id = pending.temp_id.clone();

        match self.complete_create(pending, result) {
            Some(AnchorState::Confirmed { server_id }) => self
                .anchor(&server_id)
                .cloned()
                .ok_or(AnchorError::NotFound(server_id)),
            Some(_) => Err(AnchorError::Persistence(failure.unwrap_or_default())),
            None => Err(AnchorError::NotFound(temp_id)),
        }
    }

    /// Change an anchor's color, rolling back if the store refuses.
    pub async fn recolor(&mut self, anchor_id: &str, color: HighlightColor) -> Result<(), AnchorError> {
        let index = self.mutable_position(anchor_id)?;
        let previous = self.anchors[index].anchor.color;
        if previous == color {
            return Ok(());
        }
        self.anchors[index].anchor.color = color;
        self.render();

        if let Err(err) = self.store.update_anchor_color(anchor_id, color).await {
            if let Some(index) = self.position(anchor_id) {
                self.anchors[index].anchor.color = previous;
            }
            self.render();
            return Err(persistence(anchor_id, "recolor", err));
        }
        Ok(())
    }

    /// Remove an anchor, restoring it if the store refuses.
    pub async fn delete(&mut self, anchor_id: &str) -> Result<(), AnchorError> {
        let index = self.mutable_position(anchor_id)?;
        let removed = self.anchors.remove(index);
        self.render();

        if let Err(err) = self.store.delete_anchor(anchor_id).await {
            let index = index.min(self.anchors.len());
            self.anchors.insert(index, removed);
            self.render();
            return Err(persistence(anchor_id, "delete", err));
        }
        Ok(())
    }

    /// Attach, replace, or clear (`None` or blank) an anchor's note.
    pub async fn annotate(&mut self, anchor_id: &str, note: Option<&str>) -> Result<(), AnchorError> {
        let index = self.mutable_position(anchor_id)?;
        let note = note.map(str::trim).filter(|n| !n.is_empty());
        let previous = self.anchors[index].anchor.annotation.clone();
        self.anchors[index].anchor.annotation = note.map(|n| Annotation {
            anchor_id: anchor_id.to_string(),
            note: n.to_string(),
            updated_at: Utc::now(),
        });

        if let Err(err) = self.store.set_annotation(anchor_id, note).await {
            if let Some(index) = self.position(anchor_id) {
                self.anchors[index].anchor.annotation = previous;
            }
            return Err(persistence(anchor_id, "annotate", err));
        }
        Ok(())
    }

    /// Ask companion panels to focus `anchor_id`.
    pub fn request_focus(&self, anchor_id: &str) {
        InteractionDispatcher::new(&self.bus).request_focus(anchor_id);
    }

    /// Route a marker activation. `None` for ids no longer known.
    pub fn activate(&self, anchor_id: &str, region: BoundingRegion) -> Option<AnchorEvent> {
        let snapshot = self.anchors();
        InteractionDispatcher::new(&self.bus).activate(&snapshot, anchor_id, region)
    }

    /// Snapshot of the current anchors, in the order they were learned.
    pub fn anchors(&self) -> Vec<Anchor> {
        self.anchors.iter().map(|t| t.anchor.clone()).collect()
    }

    pub fn anchor(&self, anchor_id: &str) -> Option<&Anchor> {
        self.anchors
            .iter()
            .find(|t| t.anchor.id == anchor_id)
            .map(|t| &t.anchor)
    }

    pub fn anchor_state(&self, anchor_id: &str) -> Option<&AnchorState> {
        self.anchors
            .iter()
            .find(|t| t.anchor.id == anchor_id)
            .map(|t| &t.state)
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn raw_markup(&self) -> &str {
        &self.raw_markup
    }

    pub fn rendered_markup(&self) -> &str {
        &self.rendered
    }

    /// Details of the last successful render; `None` after a parse failure.
    pub fn last_render(&self) -> Option<&RenderOutput> {
        self.last_render.as_ref()
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn position(&self, anchor_id: &str) -> Option<usize> {
        self.anchors.iter().position(|t| t.anchor.id == anchor_id)
    }

    /// Index of an anchor that may be mutated: known and already persisted.
    fn mutable_position(&self, anchor_id: &str) -> Result<usize, AnchorError> {
        let index = self
            .position(anchor_id)
            .ok_or_else(|| AnchorError::NotFound(anchor_id.to_string()))?;
        match self.anchors[index].state {
            AnchorState::Pending { .. } => Err(AnchorError::Pending(anchor_id.to_string())),
            _ => Ok(index),
        }
    }
}

fn confirmed(anchor: Anchor) -> TrackedAnchor {
    TrackedAnchor {
        state: AnchorState::Confirmed {
            server_id: anchor.id.clone(),
        },
        anchor,
    }
}

fn persistence(anchor_id: &str, operation: &str, err: anyhow::Error) -> AnchorError {
    warn!(anchor_id, operation, error = %format!("{:#}", err), "store rejected change; rolled back");
    AnchorError::Persistence(format!("{:#}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use crate::projection::range_from_global_offsets;
    use crate::selection::Boundary;
    use crate::store::memory::InMemoryStore;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    const DOC: &str = "<p>The quick brown fox</p>";

    /// Delegates to an in-memory store, failing every write while `failing` is set.
    struct FlakyStore {
        inner: InMemoryStore,
        failing: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            let inner = InMemoryStore::new();
            inner.put_document("d1", DOC).unwrap();
            inner.put_document("d2", "<p>Another page</p>").unwrap();
            Self {
                inner,
                failing: AtomicBool::new(false),
            }
        }

        fn fail(&self, on: bool) {
            self.failing.store(on, Ordering::SeqCst);
        }

        fn check(&self) -> anyhow::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                bail!("store offline");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AnchorStore for FlakyStore {
        async fn load_raw_markup(&self, document_id: &str) -> anyhow::Result<String> {
            self.inner.load_raw_markup(document_id).await
        }

        async fn load_anchors(&self, document_id: &str) -> anyhow::Result<Vec<Anchor>> {
            self.inner.load_anchors(document_id).await
        }

        async fn create_anchor(
            &self,
            document_id: &str,
            quote: &str,
            global_start: i64,
            global_end: i64,
            color: HighlightColor,
        ) -> anyhow::Result<Anchor> {
            self.check()?;
            self.inner
                .create_anchor(document_id, quote, global_start, global_end, color)
                .await
        }

        async fn update_anchor_color(&self, anchor_id: &str, color: HighlightColor) -> anyhow::Result<()> {
            self.check()?;
            self.inner.update_anchor_color(anchor_id, color).await
        }

        async fn delete_anchor(&self, anchor_id: &str) -> anyhow::Result<()> {
            self.check()?;
            self.inner.delete_anchor(anchor_id).await
        }

        async fn set_annotation(&self, anchor_id: &str, note: Option<&str>) -> anyhow::Result<()> {
            self.check()?;
            self.inner.set_annotation(anchor_id, note).await
        }
    }

    async fn open_session() -> (DocumentSession, Arc<FlakyStore>, Arc<RecordingSink>) {
        let store = Arc::new(FlakyStore::new());
        let sink = Arc::new(RecordingSink::new());
        let mut bus = EventBus::new();
        bus.subscribe(sink.clone());
        let session = DocumentSession::open(store.clone(), bus, RenderOptions::default(), "d1")
            .await
            .unwrap();
        (session, store, sink)
    }

    fn select(session: &DocumentSession, start: usize, end: usize) -> (ContentTree, SelectionSpan) {
        let tree = session.content_tree().unwrap();
        let range = range_from_global_offsets(&tree, tree.root(), start, end).unwrap();
        (tree, range.into())
    }

    #[tokio::test]
    async fn test_open_renders_plain_document() {
        let (session, _, _) = open_session().await;
        assert_eq!(session.rendered_markup(), DOC);
        assert!(session.anchors().is_empty());
    }

    #[tokio::test]
    async fn test_create_confirms_with_server_id() {
        let (mut session, store, sink) = open_session().await;
        let (tree, selection) = select(&session, 4, 15);

        let anchor = session
            .create_anchor(&tree, &selection, HighlightColor::Green)
            .await
            .unwrap();

        assert!(!anchor.is_temporary());
        assert_eq!(anchor.quote, "quick brown");
        assert_eq!(
            session.anchor_state(&anchor.id),
            Some(&AnchorState::Confirmed {
                server_id: anchor.id.clone()
            })
        );
        assert!(session
            .rendered_markup()
            .contains(&format!("id=\"highlight-{}\"", anchor.id)));
        assert_eq!(sink.kinds(), vec!["anchor-created"]);
        assert_eq!(store.inner.anchor_count(), 1);
    }

    #[tokio::test]
    async fn test_pending_anchor_is_rendered_before_confirmation() {
        let (mut session, _, sink) = open_session().await;
        let (tree, selection) = select(&session, 16, 19);

        let pending = session
            .begin_create(&tree, &selection, HighlightColor::Yellow)
            .unwrap();

        assert!(session.rendered_markup().contains(pending.temp_id()));
        assert_eq!(
            session.anchor_state(pending.temp_id()),
            Some(&AnchorState::Pending {
                temp_id: pending.temp_id().to_string()
            })
        );
        match &sink.events()[0] {
            AnchorEvent::Created { anchor } => assert_eq!(anchor.id, pending.temp_id()),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_create_rolls_back() {
        let (mut session, store, _) = open_session().await;
        store.fail(true);
        let (tree, selection) = select(&session, 4, 9);

        let err = session
            .create_anchor(&tree, &selection, HighlightColor::Blue)
            .await
            .unwrap_err();

        assert!(matches!(err, AnchorError::Persistence(ref m) if m.contains("store offline")));
        assert!(session.anchors().is_empty());
        assert_eq!(session.rendered_markup(), DOC);
    }

    #[tokio::test]
    async fn test_invalid_selection_creates_nothing() {
        let (mut session, _, sink) = open_session().await;
        let tree = session.content_tree().unwrap();
        let run = tree.text_runs(tree.root())[0];
        let collapsed = SelectionSpan::new(
            Boundary::new(run, 3),
            Boundary::new(run, 3),
        );

        let err = session
            .begin_create(&tree, &collapsed, HighlightColor::Yellow)
            .unwrap_err();
        assert_eq!(err, AnchorError::Collapsed { start: 3, end: 3 });
        assert!(session.anchors().is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_completion_after_navigation_is_discarded() {
        let (mut session, store, _) = open_session().await;
        let (tree, selection) = select(&session, 4, 9);
        let pending = session
            .begin_create(&tree, &selection, HighlightColor::Yellow)
            .unwrap();

        session.navigate("d2").await.unwrap();
        let stored = store
            .create_anchor("d1", pending.quote(), 4, 9, HighlightColor::Yellow)
            .await;
        assert_eq!(session.complete_create(pending, stored), None);

        assert_eq!(session.document_id(), "d2");
        assert!(session.anchors().is_empty());
        assert_eq!(session.rendered_markup(), "<p>Another page</p>");
    }

    #[tokio::test]
    async fn test_recolor_rolls_back_on_failure() {
        let (mut session, store, _) = open_session().await;
        let (tree, selection) = select(&session, 4, 9);
        let anchor = session
            .create_anchor(&tree, &selection, HighlightColor::Yellow)
            .await
            .unwrap();

        session.recolor(&anchor.id, HighlightColor::Pink).await.unwrap();
        assert!(session.rendered_markup().contains("hl-pink"));

        store.fail(true);
        let err = session
            .recolor(&anchor.id, HighlightColor::Blue)
            .await
            .unwrap_err();
        assert!(matches!(err, AnchorError::Persistence(_)));
        assert_eq!(session.anchor(&anchor.id).unwrap().color, HighlightColor::Pink);
        assert!(session.rendered_markup().contains("hl-pink"));
    }

    #[tokio::test]
    async fn test_delete_restores_anchor_on_failure() {
        let (mut session, store, _) = open_session().await;
        let (tree, selection) = select(&session, 4, 9);
        let anchor = session
            .create_anchor(&tree, &selection, HighlightColor::Yellow)
            .await
            .unwrap();

        store.fail(true);
        assert!(session.delete(&anchor.id).await.is_err());
        assert!(session.anchor(&anchor.id).is_some());

        store.fail(false);
        session.delete(&anchor.id).await.unwrap();
        assert!(session.anchor(&anchor.id).is_none());
        assert_eq!(session.rendered_markup(), DOC);
    }

    #[tokio::test]
    async fn test_pending_anchor_cannot_be_mutated() {
        let (mut session, _, _) = open_session().await;
        let (tree, selection) = select(&session, 4, 9);
        let pending = session
            .begin_create(&tree, &selection, HighlightColor::Yellow)
            .unwrap();
        let temp_id = pending.temp_id().to_string();

        assert_eq!(
            session.delete(&temp_id).await,
            Err(AnchorError::Pending(temp_id.clone()))
        );
        assert_eq!(
            session.recolor(&temp_id, HighlightColor::Blue).await,
            Err(AnchorError::Pending(temp_id.clone()))
        );
        assert_eq!(
            session.recolor("missing", HighlightColor::Blue).await,
            Err(AnchorError::NotFound("missing".into()))
        );
    }

    #[tokio::test]
    async fn test_annotate_and_reload() {
        let (mut session, _, _) = open_session().await;
        let (tree, selection) = select(&session, 4, 9);
        let anchor = session
            .create_anchor(&tree, &selection, HighlightColor::Yellow)
            .await
            .unwrap();

        session.annotate(&anchor.id, Some("speed")).await.unwrap();
        session.reload().await.unwrap();
        let reloaded = session.anchor(&anchor.id).unwrap();
        assert_eq!(reloaded.annotation.as_ref().unwrap().note, "speed");

        session.annotate(&anchor.id, None).await.unwrap();
        session.reload().await.unwrap();
        assert!(session.anchor(&anchor.id).unwrap().annotation.is_none());
    }

    #[tokio::test]
    async fn test_unparseable_markup_is_served_raw() {
        let store = Arc::new(InMemoryStore::new());
        let broken = "<p>text</p><!-- never closed";
        store.put_document("bad", broken).unwrap();
        let session = DocumentSession::open(store, EventBus::new(), RenderOptions::default(), "bad")
            .await
            .unwrap();
        assert_eq!(session.rendered_markup(), broken);
        assert!(session.last_render().is_none());
    }

    #[tokio::test]
    async fn test_focus_and_activation_events() {
        let (mut session, _, sink) = open_session().await;
        let (tree, selection) = select(&session, 4, 9);
        let anchor = session
            .create_anchor(&tree, &selection, HighlightColor::Purple)
            .await
            .unwrap();
        sink.clear();

        session.request_focus(&anchor.id);
        let activated = session.activate(&anchor.id, BoundingRegion::default());
        assert!(activated.is_some());
        assert!(session.activate("gone", BoundingRegion::default()).is_none());
        session.request_refresh();

        assert_eq!(
            sink.kinds(),
            vec![
                "anchor-focus-requested",
                "anchor-activated",
                "anchors-refresh-requested"
            ]
        );
    }
}

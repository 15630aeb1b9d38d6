//! SQLite store behavior, including the session running on top of it.

use std::sync::Arc;

use chrono::Utc;
use marginalia::config::{Config, DbConfig, HighlightsConfig, RenderConfig};
use marginalia::sqlite_store::SqliteStore;
use marginalia::{db, migrate};
use marginalia_core::projection::range_from_global_offsets;
use marginalia_core::selection::SelectionSpan;
use marginalia_core::{
    Anchor, AnchorStore, DocumentSession, EventBus, HighlightColor, RenderOptions,
};
use tempfile::TempDir;

const DOC: &str = "<p>The quick brown fox</p>";

async fn setup() -> (TempDir, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let config = Config {
        db: DbConfig {
            path: tmp.path().join("data/mg.sqlite"),
        },
        render: RenderConfig::default(),
        highlights: HighlightsConfig::default(),
    };
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, SqliteStore::new(pool))
}

#[tokio::test]
async fn test_import_is_deduplicated_by_content() {
    let (_tmp, store) = setup().await;

    let first = store
        .import_document(DOC, Some("Fox"), Some("https://example.com/fox"))
        .await
        .unwrap();
    assert!(first.created);

    let again = store.import_document(DOC, None, None).await.unwrap();
    assert!(!again.created);
    assert_eq!(again.document_id, first.document_id);

    let docs = store.list_documents().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].title.as_deref(), Some("Fox"));
    assert_eq!(docs[0].anchor_count, 0);
    assert_eq!(store.load_raw_markup(&first.document_id).await.unwrap(), DOC);
}

#[tokio::test]
async fn test_anchor_crud() {
    let (_tmp, store) = setup().await;
    let doc = store.import_document(DOC, None, None).await.unwrap().document_id;

    let anchor = store
        .create_anchor(&doc, "quick brown", 4, 15, HighlightColor::Yellow)
        .await
        .unwrap();
    let loaded = store.load_anchors(&doc).await.unwrap();
    assert_eq!(loaded, vec![anchor.clone()]);

    store
        .update_anchor_color(&anchor.id, HighlightColor::Blue)
        .await
        .unwrap();
    store.set_annotation(&anchor.id, Some("note")).await.unwrap();
    let loaded = store.load_anchors(&doc).await.unwrap();
    assert_eq!(loaded[0].color, HighlightColor::Blue);
    assert_eq!(loaded[0].annotation.as_ref().unwrap().note, "note");

    store.set_annotation(&anchor.id, Some("")).await.unwrap();
    assert!(store.load_anchors(&doc).await.unwrap()[0].annotation.is_none());

    store.delete_anchor(&anchor.id).await.unwrap();
    assert!(store.load_anchors(&doc).await.unwrap().is_empty());
    assert!(store.delete_anchor(&anchor.id).await.is_err());
    assert!(store
        .update_anchor_color(&anchor.id, HighlightColor::Pink)
        .await
        .is_err());
}

#[tokio::test]
async fn test_create_rejects_invalid_input() {
    let (_tmp, store) = setup().await;
    let doc = store.import_document(DOC, None, None).await.unwrap().document_id;

    assert!(store
        .create_anchor("missing", "x", 0, 1, HighlightColor::Yellow)
        .await
        .is_err());
    assert!(store
        .create_anchor(&doc, "", 0, 1, HighlightColor::Yellow)
        .await
        .is_err());
    assert!(store
        .create_anchor(&doc, "x", 5, 5, HighlightColor::Yellow)
        .await
        .is_err());
    assert!(store.load_raw_markup("missing").await.is_err());
}

#[tokio::test]
async fn test_stale_offsets_recovered_through_session() {
    let (_tmp, store) = setup().await;
    let doc = store.import_document(DOC, None, None).await.unwrap().document_id;
    store
        .insert_anchor(&Anchor {
            id: "stale".into(),
            document_id: doc.clone(),
            quote: "brown".into(),
            global_start: Some(400),
            global_end: None,
            color: HighlightColor::Pink,
            created_at: Utc::now(),
            annotation: None,
        })
        .await
        .unwrap();

    let session = DocumentSession::open(
        Arc::new(store),
        EventBus::new(),
        RenderOptions::default(),
        &doc,
    )
    .await
    .unwrap();

    assert_eq!(
        session.rendered_markup(),
        "<p>The quick <mark class=\"hl hl-pink\" data-anchor-id=\"stale\" data-segment=\"0\" id=\"highlight-stale\">brown</mark> fox</p>"
    );
}

#[tokio::test]
async fn test_session_create_persists() {
    let (_tmp, store) = setup().await;
    let doc = store.import_document(DOC, None, None).await.unwrap().document_id;
    let store = Arc::new(store);

    let mut session = DocumentSession::open(
        store.clone(),
        EventBus::new(),
        RenderOptions::default(),
        &doc,
    )
    .await
    .unwrap();
    let tree = session.content_tree().unwrap();
    let selection: SelectionSpan = range_from_global_offsets(&tree, tree.root(), 16, 19)
        .unwrap()
        .into();
    let anchor = session
        .create_anchor(&tree, &selection, HighlightColor::Green)
        .await
        .unwrap();

    let stored = store.load_anchors(&doc).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, anchor.id);
    assert_eq!(stored[0].quote, "fox");
    assert_eq!(store.list_documents().await.unwrap()[0].anchor_count, 1);
}

//! Anchor commands: create, list, recolor, delete, annotate, activate.
//!
//! Every command opens a [`DocumentSession`] so the CLI goes through the
//! same optimistic path (and the same rollback) as an interactive reader.

use anyhow::{bail, Context, Result};
use serde::Serialize;

use marginalia_core::markup::ContentTree;
use marginalia_core::projection::{range_from_global_offsets, Projection};
use marginalia_core::recovery::SpanSource;
use marginalia_core::selection::SelectionSpan;
use marginalia_core::{Anchor, BoundingRegion, DocumentSession, HighlightColor};

use crate::config::Config;
use crate::documents::open_session;

/// What `mg highlight` should cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HighlightTarget {
    /// First occurrence of this text in the document.
    Quote(String),
    /// Global char offsets into the canonical text, `[start, end)`.
    Offsets { start: usize, end: usize },
}

/// An anchor plus how the last render placed it.
#[derive(Debug, Clone, Serialize)]
pub struct AnchorListing {
    #[serde(flatten)]
    pub anchor: Anchor,
    /// `stored`, `recovered`, or `dropped`.
    pub status: &'static str,
    pub rendered_start: Option<usize>,
    pub rendered_end: Option<usize>,
}

fn parse_color(config: &Config, color: Option<&str>) -> Result<HighlightColor> {
    match color {
        Some(c) => c.parse(),
        None => Ok(config.default_color()),
    }
}

/// Build a selection over the session's current rendered tree.
fn select(
    session: &DocumentSession,
    target: &HighlightTarget,
) -> Result<(ContentTree, SelectionSpan)> {
    let tree = session
        .content_tree()
        .context("Document markup cannot be parsed; highlights are unavailable")?;
    let root = tree.root();
    let (start, end) = match target {
        HighlightTarget::Quote(quote) => {
            let projection = Projection::build(&tree, root);
            match projection.find(quote) {
                Some(start) => (start, start + quote.chars().count()),
                None => bail!("quote not found in document: {:?}", quote),
            }
        }
        HighlightTarget::Offsets { start, end } => (*start, *end),
    };
    let range = match range_from_global_offsets(&tree, root, start, end) {
        Some(range) => range,
        None => bail!("span {}..{} is outside the document text", start, end),
    };
    Ok((tree, SelectionSpan::from(range)))
}

/// Create an anchor and return the persisted record.
pub async fn create_highlight(
    config: &Config,
    document_id: &str,
    target: &HighlightTarget,
    color: Option<&str>,
) -> Result<Anchor> {
    let color = parse_color(config, color)?;
    let mut session = open_session(config, document_id).await?;
    let (tree, selection) = select(&session, target)?;
    let anchor = session.create_anchor(&tree, &selection, color).await?;
    Ok(anchor)
}

pub async fn run_highlight(
    config: &Config,
    document_id: &str,
    target: &HighlightTarget,
    color: Option<&str>,
) -> Result<()> {
    let anchor = create_highlight(config, document_id, target, color).await?;
    println!("created {} [{}] {:?}", anchor.id, anchor.color, anchor.quote);
    Ok(())
}

/// All anchors of a document with their render status.
pub async fn list_anchors(config: &Config, document_id: &str) -> Result<Vec<AnchorListing>> {
    let session = open_session(config, document_id).await?;
    let render = session.last_render();
    let listings = session
        .anchors()
        .into_iter()
        .map(|anchor| {
            let placed = render.and_then(|r| r.placed(&anchor.id));
            let status = match placed.map(|p| p.span.source) {
                Some(SpanSource::Stored) => "stored",
                Some(SpanSource::Recovered) => "recovered",
                None => "dropped",
            };
            AnchorListing {
                status,
                rendered_start: placed.map(|p| p.span.start),
                rendered_end: placed.map(|p| p.span.end),
                anchor,
            }
        })
        .collect();
    Ok(listings)
}

pub async fn run_anchors(config: &Config, document_id: &str, json: bool) -> Result<()> {
    let listings = list_anchors(config, document_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    if listings.is_empty() {
        println!("No anchors.");
        return Ok(());
    }

    println!(
        "{:<38} {:<7} {:<10} {:<12} QUOTE",
        "ID", "COLOR", "STATUS", "SPAN"
    );
    for listing in listings {
        let span = match (listing.rendered_start, listing.rendered_end) {
            (Some(s), Some(e)) => format!("{}..{}", s, e),
            _ => "-".to_string(),
        };
        println!(
            "{:<38} {:<7} {:<10} {:<12} {:?}",
            listing.anchor.id, listing.anchor.color, listing.status, span, listing.anchor.quote
        );
        if let Some(ref annotation) = listing.anchor.annotation {
            println!("{:<38} note: {}", "", annotation.note);
        }
    }
    Ok(())
}

pub async fn run_recolor(
    config: &Config,
    document_id: &str,
    anchor_id: &str,
    color: &str,
) -> Result<()> {
    let color: HighlightColor = color.parse()?;
    let mut session = open_session(config, document_id).await?;
    session.recolor(anchor_id, color).await?;
    println!("recolored {} -> {}", anchor_id, color);
    Ok(())
}

pub async fn run_delete(config: &Config, document_id: &str, anchor_id: &str) -> Result<()> {
    let mut session = open_session(config, document_id).await?;
    session.delete(anchor_id).await?;
    println!("deleted {}", anchor_id);
    Ok(())
}

pub async fn run_annotate(
    config: &Config,
    document_id: &str,
    anchor_id: &str,
    note: Option<&str>,
) -> Result<()> {
    let mut session = open_session(config, document_id).await?;
    session.annotate(anchor_id, note).await?;
    match note.map(str::trim).filter(|n| !n.is_empty()) {
        Some(_) => println!("annotated {}", anchor_id),
        None => println!("cleared note on {}", anchor_id),
    }
    Ok(())
}

/// Dispatch an activation for `anchor_id` and print the event payload.
pub async fn run_activate(config: &Config, document_id: &str, anchor_id: &str) -> Result<()> {
    let session = open_session(config, document_id).await?;
    let event = match session.activate(anchor_id, BoundingRegion::default()) {
        Some(event) => event,
        None => bail!("anchor not found: {}", anchor_id),
    };
    println!("{}", serde_json::to_string_pretty(&event.to_json())?);
    Ok(())
}

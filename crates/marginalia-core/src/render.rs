//! Highlight renderer.
//!
//! [`render_highlights`] is a pure function `(raw markup, anchors) ->
//! rendered markup`. It parses the raw markup into a private tree, wraps
//! every renderable anchor's text in marker elements, and serializes the
//! result. The input string and the anchor slice are never mutated, and no
//! state survives between calls.
//!
//! # Algorithm
//!
//! 1. Parse the raw markup into a fresh [`ContentTree`].
//! 2. Build the canonical projection once.
//! 3. Resolve each anchor's span (stored offsets or quote recovery); drop
//!    the ones that stay unresolved.
//! 4. Sort by `start`, then `created_at`, then id.
//! 5. For each anchor, walk the current text runs and intersect every
//!    run's window with the anchor's span. Each non-empty intersection is a
//!    [`Segment`].
//! 6. Wrap segments last-to-first so earlier segments' local offsets stay
//!    valid after a split.
//! 7. A segment that cannot be surrounded in place is retried with
//!    extract-and-reinsert; if that fails too, only that segment is skipped.
//!
//! Wrapping adds element ancestors around existing text and never changes
//! the text itself, so global offsets computed in step 2 hold for every
//! anchor, however many were wrapped before it.
//!
//! # Overlapping anchors
//!
//! Because step 5 walks the tree *as it is now*, a second anchor covering
//! text that an earlier anchor already wrapped finds the split runs inside
//! the earlier marker and wraps them again. Overlaps therefore render as
//! properly nested markers, with the later-processed anchor innermost.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::MarkupError;
use crate::markup::{char_slice, ContentTree, Element, NodeId, NodeKind, TreeError};
use crate::models::Anchor;
use crate::projection::Projection;
use crate::recovery::{resolve_span, ResolvedSpan};

/// Attribute carrying the anchor id on every marker.
pub const ANCHOR_ID_ATTR: &str = "data-anchor-id";
/// Attribute carrying a marker's segment index within its anchor.
pub const SEGMENT_ATTR: &str = "data-segment";

/// How markers look in the rendered markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    /// Inline element used as the marker.
    pub marker_tag: String,
    /// Base CSS class; markers also get `{class_prefix}-{color}`.
    pub class_prefix: String,
    /// Prefix of the marker `id` used as scroll target.
    pub scroll_id_prefix: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            marker_tag: "mark".to_string(),
            class_prefix: "hl".to_string(),
            scroll_id_prefix: "highlight-".to_string(),
        }
    }
}

impl RenderOptions {
    /// Element id of an anchor's first rendered segment.
    pub fn scroll_target_id(&self, anchor_id: &str) -> String {
        format!("{}{}", self.scroll_id_prefix, anchor_id)
    }

    /// Element id of any later segment of the same anchor.
    pub fn segment_id(&self, anchor_id: &str, index: usize) -> String {
        format!("{}{}-{}", self.scroll_id_prefix, anchor_id, index)
    }

    fn marker(&self, anchor: &Anchor, index: usize) -> Element {
        Element::new(self.marker_tag.as_str())
            .with_attr(
                "class",
                format!("{} {}-{}", self.class_prefix, self.class_prefix, anchor.color),
            )
            .with_attr(ANCHOR_ID_ATTR, anchor.id.as_str())
            .with_attr(SEGMENT_ATTR, index.to_string())
    }
}

/// The part of an anchor's span that falls in one text run (local char offsets).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub run: NodeId,
    pub start: usize,
    pub end: usize,
}

/// Why a single segment could not be wrapped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WrapError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("<{0}> cannot contain a marker")]
    ForbiddenParent(String),
    #[error("segment is empty after clamping to the text run")]
    EmptySegment,
}

/// An anchor that made it onto the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedAnchor {
    pub anchor_id: String,
    pub span: ResolvedSpan,
    /// Number of markers actually inserted.
    pub markers: usize,
    /// Number of segments that had to be skipped.
    pub skipped_segments: usize,
}

/// Result of one render pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderOutput {
    pub markup: String,
    /// Rendered anchors, in processing order.
    pub placed: Vec<PlacedAnchor>,
    /// Ids of anchors that could not be resolved and were left out.
    pub dropped: Vec<String>,
}

impl RenderOutput {
    pub fn placed(&self, anchor_id: &str) -> Option<&PlacedAnchor> {
        self.placed.iter().find(|p| p.anchor_id == anchor_id)
    }
}

/// Render `anchors` over `raw_markup`. Fails only when the markup cannot be parsed.
pub fn render_highlights(
    raw_markup: &str,
    anchors: &[Anchor],
    options: &RenderOptions,
) -> Result<RenderOutput, MarkupError> {
    let mut tree = ContentTree::parse(raw_markup)?;
    let root = tree.root();
    let projection = Projection::build(&tree, root);

    let mut dropped = Vec::new();
    let mut resolved: Vec<(&Anchor, ResolvedSpan)> = Vec::with_capacity(anchors.len());
    for anchor in anchors {
        match resolve_span(anchor, &projection) {
            Some(span) => resolved.push((anchor, span)),
            None => {
                warn!(anchor_id = %anchor.id, "anchor quote not found; leaving it out of this render");
                dropped.push(anchor.id.clone());
            }
        }
    }
    resolved.sort_by(|(a, sa), (b, sb)| {
        sa.start
            .cmp(&sb.start)
            .then(a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut placed = Vec::with_capacity(resolved.len());
    for (anchor, span) in resolved {
        let segments = collect_segments(&tree, root, span.start, span.end);
        let mut wrapped: Vec<(usize, NodeId)> = Vec::with_capacity(segments.len());
        for (index, segment) in segments.iter().enumerate().rev() {
            match wrap_segment(&mut tree, segment, options.marker(anchor, index)) {
                Ok(marker) => wrapped.push((index, marker)),
                Err(err) => warn!(
                    anchor_id = %anchor.id,
                    segment = index,
                    error = %err,
                    "skipping highlight segment"
                ),
            }
        }
        wrapped.reverse();
        assign_marker_ids(&mut tree, &anchor.id, &wrapped, options);
        placed.push(PlacedAnchor {
            anchor_id: anchor.id.clone(),
            span,
            markers: wrapped.len(),
            skipped_segments: segments.len() - wrapped.len(),
        });
    }

    debug!(
        placed = placed.len(),
        dropped = dropped.len(),
        "rendered highlights"
    );

    Ok(RenderOutput {
        markup: tree.serialize(),
        placed,
        dropped,
    })
}

/// Split `[start, end)` into per-run segments, in document order.
pub fn collect_segments(tree: &ContentTree, root: NodeId, start: usize, end: usize) -> Vec<Segment> {
    let mut segments = Vec::new();
    if !tree.contains(root) {
        return segments;
    }
    let mut acc = 0;
    for run in tree.text_runs(root) {
        let len = tree.char_len(run);
        let (node_start, node_end) = (acc, acc + len);
        acc = node_end;
        if node_start >= end {
            break;
        }
        let from = start.max(node_start);
        let to = end.min(node_end);
        if from < to {
            segments.push(Segment {
                run,
                start: from - node_start,
                end: to - node_start,
            });
        }
    }
    segments
}

/// Wrap one segment in `marker`, surrounding in place first and falling
/// back to extract-and-reinsert.
pub fn wrap_segment(
    tree: &mut ContentTree,
    segment: &Segment,
    marker: Element,
) -> Result<NodeId, WrapError> {
    match surround(tree, segment, marker.clone()) {
        Ok(id) => Ok(id),
        Err(WrapError::ForbiddenParent(name)) => Err(WrapError::ForbiddenParent(name)),
        Err(err) => {
            debug!(run = %segment.run, error = %err, "surround failed; extracting segment instead");
            extract_and_reinsert(tree, segment, marker)
        }
    }
}

/// Split the run at the segment edges and wrap the middle piece in place.
fn surround(tree: &mut ContentTree, segment: &Segment, marker: Element) -> Result<NodeId, WrapError> {
    check_host(tree, segment.run)?;
    if !tree.is_text(segment.run) {
        return Err(TreeError::NotText(segment.run).into());
    }
    let len = tree.char_len(segment.run);
    if segment.end > len || segment.start >= segment.end {
        return Err(TreeError::OutOfBounds {
            offset: segment.end,
            len,
        }
        .into());
    }
    if segment.end < len {
        tree.split_text(segment.run, segment.end)?;
    }
    let middle = if segment.start > 0 {
        tree.split_text(segment.run, segment.start)?
    } else {
        segment.run
    };
    Ok(tree.wrap(middle, marker)?)
}

/// Rebuild the run as `before`, `marker(middle)`, `after` from its current
/// text, clamping the segment to what the run actually holds.
fn extract_and_reinsert(
    tree: &mut ContentTree,
    segment: &Segment,
    marker: Element,
) -> Result<NodeId, WrapError> {
    check_host(tree, segment.run)?;
    let text = tree
        .text(segment.run)
        .ok_or(TreeError::NotText(segment.run))?
        .to_string();
    let len = text.chars().count();
    let end = segment.end.min(len);
    if segment.start >= end {
        return Err(WrapError::EmptySegment);
    }
    let before = char_slice(&text, 0, segment.start).unwrap_or_default();
    let middle = char_slice(&text, segment.start, end).unwrap_or_default();
    let after = char_slice(&text, end, len).unwrap_or_default();

    let mut replacements = Vec::with_capacity(3);
    if !before.is_empty() {
        replacements.push(tree.create(NodeKind::Text(before.to_string())));
    }
    let marker_id = tree.create(NodeKind::Element(marker));
    tree.append(marker_id, NodeKind::Text(middle.to_string()));
    replacements.push(marker_id);
    if !after.is_empty() {
        replacements.push(tree.create(NodeKind::Text(after.to_string())));
    }
    tree.replace_with(segment.run, &replacements)?;
    Ok(marker_id)
}

fn check_host(tree: &ContentTree, run: NodeId) -> Result<(), WrapError> {
    if !tree.contains(run) {
        return Err(TreeError::UnknownNode(run).into());
    }
    let parent = tree.parent(run).ok_or(TreeError::Detached(run))?;
    match tree.element(parent) {
        Some(el) if el.is_raw_text() || el.is_void() => {
            Err(WrapError::ForbiddenParent(el.name.clone()))
        }
        _ => Ok(()),
    }
}

/// First rendered marker of an anchor gets the canonical scroll id; the rest
/// get derived ids.
fn assign_marker_ids(
    tree: &mut ContentTree,
    anchor_id: &str,
    wrapped: &[(usize, NodeId)],
    options: &RenderOptions,
) {
    for (position, &(index, marker)) in wrapped.iter().enumerate() {
        let id = if position == 0 {
            options.scroll_target_id(anchor_id)
        } else {
            options.segment_id(anchor_id, index)
        };
        if let Some(el) = tree.element_mut(marker) {
            el.set_attr("id", id);
        }
    }
}

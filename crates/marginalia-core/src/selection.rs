//! Selection-to-anchor conversion.
//!
//! A user selection is two boundary points. Each point is either inside a
//! text run (`container` is the run, `offset` a char offset into it) or
//! between children of an element (`container` is the element, `offset` a
//! child index). Conversion normalizes both points to concrete
//! `(text run, char offset)` pairs, maps them to global offsets through the
//! projection, and only then emits an [`AnchorDraft`].
//!
//! Normalizing an element boundary:
//!
//! - start: look at the child *at* the index. A text child anchors at its
//!   start; otherwise search forward in document order for the first text
//!   run and anchor at offset 0.
//! - end: look at the child *at* the index too. A text child anchors at
//!   its end; otherwise search backward through its descendants for the
//!   last text run and anchor at its full length.
//!
//! An anchor is only produced when both ends resolve and `end > start`;
//! anything else is an [`AnchorError`] and nothing is created.

use crate::error::AnchorError;
use crate::markup::{ContentTree, NodeId};
use crate::projection::{global_offset_of, Projection, TextRange};

/// One boundary point of a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub container: NodeId,
    pub offset: usize,
}

impl Boundary {
    pub fn new(container: NodeId, offset: usize) -> Self {
        Self { container, offset }
    }
}

/// A live selection, as reported by whatever displays the rendered markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionSpan {
    pub start: Boundary,
    pub end: Boundary,
}

impl SelectionSpan {
    pub fn new(start: Boundary, end: Boundary) -> Self {
        Self { start, end }
    }
}

impl From<TextRange> for SelectionSpan {
    fn from(range: TextRange) -> Self {
        Self {
            start: Boundary::new(range.start_run, range.start_offset),
            end: Boundary::new(range.end_run, range.end_offset),
        }
    }
}

/// The durable part of a new anchor, before it has an id or a color.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorDraft {
    pub quote: String,
    pub global_start: usize,
    pub global_end: usize,
}

/// Normalize a start boundary to a text position below `root`.
pub fn normalize_start(
    tree: &ContentTree,
    root: NodeId,
    point: Boundary,
) -> Option<(NodeId, usize)> {
    if !tree.contains(point.container) || !tree.is_inclusive_descendant(point.container, root) {
        return None;
    }
    if tree.is_text(point.container) {
        let len = tree.char_len(point.container);
        return (point.offset <= len).then_some((point.container, point.offset));
    }
    let children = tree.children(point.container);
    match children.get(point.offset) {
        Some(&child) if tree.is_text(child) => Some((child, 0)),
        Some(&child) => first_text_from(tree, root, child).map(|run| (run, 0)),
        None => first_text_after(tree, root, point.container).map(|run| (run, 0)),
    }
}

/// Normalize an end boundary to a text position below `root`.
pub fn normalize_end(
    tree: &ContentTree,
    root: NodeId,
    point: Boundary,
) -> Option<(NodeId, usize)> {
    if !tree.contains(point.container) || !tree.is_inclusive_descendant(point.container, root) {
        return None;
    }
    if tree.is_text(point.container) {
        let len = tree.char_len(point.container);
        return (point.offset <= len).then_some((point.container, point.offset));
    }
    let children = tree.children(point.container);
    let run = match children.get(point.offset) {
        Some(&child) if tree.is_text(child) => Some(child),
        Some(&child) => last_text_until(tree, root, child),
        // Index past the last child: search the container itself.
        None => last_text_until(tree, root, point.container),
    };
    run.map(|r| (r, tree.char_len(r)))
}

/// Convert a selection into an anchor draft, or refuse.
pub fn selection_to_anchor(
    tree: &ContentTree,
    root: NodeId,
    span: &SelectionSpan,
) -> Result<AnchorDraft, AnchorError> {
    let (start_run, start_offset) = normalize_start(tree, root, span.start)
        .ok_or(AnchorError::Unresolvable { endpoint: "start" })?;
    let (end_run, end_offset) = normalize_end(tree, root, span.end)
        .ok_or(AnchorError::Unresolvable { endpoint: "end" })?;

    let global_start = global_offset_of(tree, root, start_run, start_offset)
        .ok_or(AnchorError::Unresolvable { endpoint: "start" })?;
    let global_end = global_offset_of(tree, root, end_run, end_offset)
        .ok_or(AnchorError::Unresolvable { endpoint: "end" })?;

    if global_end <= global_start {
        return Err(AnchorError::Collapsed {
            start: global_start,
            end: global_end,
        });
    }

    let projection = Projection::build(tree, root);
    let quote = projection
        .slice(global_start, global_end)
        .ok_or(AnchorError::Unresolvable { endpoint: "end" })?;
    if quote.trim().is_empty() {
        return Err(AnchorError::Blank);
    }

    Ok(AnchorDraft {
        quote: quote.to_string(),
        global_start,
        global_end,
    })
}

/// First text run at or after `from` (in document order), within `root`.
fn first_text_from(tree: &ContentTree, root: NodeId, from: NodeId) -> Option<NodeId> {
    tree.preorder(from)
        .find(|&id| tree.is_text(id))
        .or_else(|| first_text_after(tree, root, from))
}

/// First text run that follows the whole subtree of `node`, within `root`.
fn first_text_after(tree: &ContentTree, root: NodeId, node: NodeId) -> Option<NodeId> {
    let order = document_order(tree, root);
    let last_inside = tree.preorder(node).last()?;
    let boundary = order.iter().position(|&id| id == last_inside)?;
    order[boundary + 1..]
        .iter()
        .copied()
        .find(|&id| tree.is_text(id))
}

/// Last text run inside `node`'s subtree, or else the last one before it.
fn last_text_until(tree: &ContentTree, root: NodeId, node: NodeId) -> Option<NodeId> {
    tree.text_runs(node)
        .last()
        .copied()
        .or_else(|| last_text_before(tree, root, node))
}

/// Last text run that precedes `node` in document order, within `root`.
fn last_text_before(tree: &ContentTree, root: NodeId, node: NodeId) -> Option<NodeId> {
    let order = document_order(tree, root);
    let boundary = order.iter().position(|&id| id == node)?;
    order[..boundary]
        .iter()
        .rev()
        .copied()
        .find(|&id| tree.is_text(id))
}

fn document_order(tree: &ContentTree, root: NodeId) -> Vec<NodeId> {
    tree.preorder(root).collect()
}

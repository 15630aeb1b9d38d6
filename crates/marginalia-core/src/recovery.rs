//! Anchor recovery: turning a stored anchor into a usable span.
//!
//! Stored offsets are trusted when both are present, non-negative,
//! ordered (`end > start`) and within the projection. Anything else falls
//! back to searching the canonical projection for the anchor's quote; the
//! first occurrence wins. When the quote is not found the anchor is
//! unrenderable for this pass and the caller drops it without error. It
//! stays in storage and renders again once the document text matches.

use serde::Serialize;
use tracing::debug;

use crate::models::Anchor;
use crate::projection::Projection;

/// Where a resolved span came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanSource {
    /// The stored `global_start` / `global_end` were used as-is.
    Stored,
    /// The stored offsets were unusable; the quote was located by search.
    Recovered,
}

/// Effective `[start, end)` of an anchor for one render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedSpan {
    pub start: usize,
    pub end: usize,
    pub source: SpanSource,
}

/// Stored offsets, if they are internally consistent and fit `projection_len`.
pub fn stored_span(anchor: &Anchor, projection_len: usize) -> Option<(usize, usize)> {
    let start = usize::try_from(anchor.global_start?).ok()?;
    let end = usize::try_from(anchor.global_end?).ok()?;
    (end > start && end <= projection_len).then_some((start, end))
}

/// Locate `quote` in the projection; `None` when absent or empty.
pub fn locate_quote(projection: &Projection, quote: &str) -> Option<(usize, usize)> {
    let start = projection.find(quote)?;
    Some((start, start + quote.chars().count()))
}

/// Resolve the span an anchor should occupy in this projection.
pub fn resolve_span(anchor: &Anchor, projection: &Projection) -> Option<ResolvedSpan> {
    if let Some((start, end)) = stored_span(anchor, projection.len()) {
        return Some(ResolvedSpan {
            start,
            end,
            source: SpanSource::Stored,
        });
    }
    let (start, end) = locate_quote(projection, &anchor.quote)?;
    debug!(
        anchor_id = %anchor.id,
        start,
        end,
        "recovered anchor offsets from quote"
    );
    Some(ResolvedSpan {
        start,
        end,
        source: SpanSource::Recovered,
    })
}

//! Error types for the anchoring engine.
//!
//! Only two classes of failure cross the core's public boundary:
//! [`MarkupError`] when raw markup cannot be parsed at all, and
//! [`AnchorError`] for anchor lifecycle operations. Stale or corrupt stored
//! anchors and per-segment wrap failures are not errors; they degrade
//! silently (with a log line) inside the renderer.

use thiserror::Error;

/// Raw markup could not be turned into a content tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarkupError {
    #[error("malformed markup near byte {position}: {message}")]
    Malformed { position: u64, message: String },
}

/// Anchor creation or mutation failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnchorError {
    /// A selection endpoint could not be mapped to a text run below the root.
    #[error("selection {endpoint} boundary does not resolve to a text position")]
    Unresolvable { endpoint: &'static str },

    /// Both endpoints resolved, but the span is empty or reversed.
    #[error("selection is collapsed or reversed ({start}..{end})")]
    Collapsed { start: usize, end: usize },

    /// The selected text is nothing but whitespace.
    #[error("selection contains no visible text")]
    Blank,

    #[error("anchor not found: {0}")]
    NotFound(String),

    /// The anchor still carries a temporary id and cannot be mutated yet.
    #[error("anchor {0} has not been persisted yet")]
    Pending(String),

    /// The persistence collaborator rejected the operation; local state was rolled back.
    #[error("persistence failed: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, AnchorError>;

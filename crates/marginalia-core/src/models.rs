//! Core data models: anchors, their colors, and attached annotations.
//!
//! An [`Anchor`] is the durable form of a highlight. It references a span
//! of a document's canonical plain-text projection by global char offsets
//! and carries the literal quoted text as ground truth for recovery.
//! Anchors never reference rendered elements; the mapping from anchor to
//! marker is recomputed on every render.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of client-generated ids for anchors not yet confirmed by the store.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Visual tag of a highlight. Has no effect on anchoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightColor {
    #[default]
    Yellow,
    Green,
    Blue,
    Pink,
    Purple,
}

impl HighlightColor {
    pub const ALL: [HighlightColor; 5] = [
        HighlightColor::Yellow,
        HighlightColor::Green,
        HighlightColor::Blue,
        HighlightColor::Pink,
        HighlightColor::Purple,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HighlightColor::Yellow => "yellow",
            HighlightColor::Green => "green",
            HighlightColor::Blue => "blue",
            HighlightColor::Pink => "pink",
            HighlightColor::Purple => "purple",
        }
    }
}

impl fmt::Display for HighlightColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HighlightColor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let wanted = s.trim();
        match HighlightColor::ALL
            .iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
        {
            Some(color) => Ok(*color),
            None => bail!(
                "Unknown highlight color: '{}'. Must be one of yellow, green, blue, pink, purple.",
                s
            ),
        }
    }
}

/// Free-text note attached to at most one anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub anchor_id: String,
    pub note: String,
    pub updated_at: DateTime<Utc>,
}

/// A highlight: a durable reference to a span of canonical text.
///
/// `global_start` / `global_end` are kept as signed, optional integers
/// because stored records can be incomplete or corrupt; the renderer
/// validates them and falls back to quote search when they are unusable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub id: String,
    pub document_id: String,
    /// Canonical text the anchor refers to. Never empty.
    pub quote: String,
    pub global_start: Option<i64>,
    pub global_end: Option<i64>,
    pub color: HighlightColor,
    /// Tiebreaker when two anchors start at the same offset.
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<Annotation>,
}

impl Anchor {
    /// True while the id is a client-generated placeholder.
    pub fn is_temporary(&self) -> bool {
        is_temporary_id(&self.id)
    }
}

/// Fresh placeholder id for an optimistically created anchor.
pub fn temporary_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4())
}

pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Screen-space rectangle of an activated marker, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

//! # Marginalia Core
//!
//! Text anchoring and highlight rendering for structured documents.
//!
//! Highlights are stored as anchors into a document's canonical plain-text
//! projection, never as references to rendered elements. Rendering
//! re-derives marker elements from the raw markup every time, and anchors
//! whose stored offsets no longer fit are recovered by quote search.
//!
//! | Module | Role |
//! |--------|------|
//! | [`markup`] | Arena content tree, parsing and serialization |
//! | [`projection`] | Canonical text projection and global offsets |
//! | [`selection`] | Selection-to-anchor conversion |
//! | [`recovery`] | Span validation and quote-based recovery |
//! | [`render`] | Pure highlight renderer |
//! | [`dispatch`] | Marker activation and focus requests |
//! | [`events`] | Typed event bus |
//! | [`session`] | Optimistic document controller |
//! | [`store`] | Persistence trait and in-memory store |
//!
//! This crate has no database, filesystem, or runtime dependency; the
//! `mg` binary supplies those.

pub mod dispatch;
pub mod error;
pub mod events;
pub mod markup;
pub mod models;
pub mod projection;
pub mod recovery;
pub mod render;
pub mod selection;
pub mod session;
pub mod store;

pub use error::{AnchorError, MarkupError};
pub use events::{AnchorEvent, EventBus, EventSink};
pub use models::{Anchor, Annotation, BoundingRegion, HighlightColor};
pub use render::{render_highlights, RenderOptions, RenderOutput};
pub use session::{AnchorState, DocumentSession, PendingCreate};
pub use store::{memory::InMemoryStore, AnchorStore};

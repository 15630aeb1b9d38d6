//! # Marginalia
//!
//! **Local-first highlights over saved documents.**
//!
//! The anchoring engine lives in [`marginalia_core`]; this crate adds what
//! a standalone tool needs around it: TOML configuration, a SQLite
//! document library and anchor store, and the `mg` command line.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────────────┐   ┌──────────┐
//! │  mg CLI  │──▶│  DocumentSession    │──▶│  SQLite  │
//! │ commands │   │ select/render/event │   │  store   │
//! └──────────┘   └─────────────────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | `AnchorStore` over SQLite, document import and listing |
//! | [`documents`] | `mg import`, `mg docs`, session setup |
//! | [`anchors`] | `mg highlight`, `anchors`, `recolor`, `delete`, `annotate`, `activate` |
//! | [`render_cmd`] | `mg render` |

pub mod anchors;
pub mod config;
pub mod db;
pub mod documents;
pub mod migrate;
pub mod render_cmd;
pub mod sqlite_store;

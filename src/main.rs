//! # Marginalia CLI (`mg`)
//!
//! Import documents, highlight passages, and render the highlighted
//! markup.
//!
//! ## Usage
//!
//! ```bash
//! mg --config ./config/mg.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mg init` | Create the SQLite database and schema |
//! | `mg import <file>` | Import a markup file as a document |
//! | `mg docs` | List imported documents |
//! | `mg highlight <doc>` | Create an anchor by quote or offsets |
//! | `mg anchors <doc>` | List anchors and how they rendered |
//! | `mg recolor <doc> <anchor> <color>` | Change a highlight's color |
//! | `mg delete <doc> <anchor>` | Remove a highlight |
//! | `mg annotate <doc> <anchor> [note]` | Attach or clear a note |
//! | `mg render <doc>` | Print or write the highlighted markup |
//! | `mg activate <doc> <anchor>` | Dispatch a marker activation |
//!
//! Logs go to stderr; set `RUST_LOG=debug` to see recovery decisions.

use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use marginalia::anchors::{self, HighlightTarget};
use marginalia::{config, documents, migrate, render_cmd};

/// Marginalia: durable highlights over saved documents.
#[derive(Parser)]
#[command(
    name = "mg",
    about = "Marginalia: durable text anchors and highlight rendering",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mg.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Import a markup file as a new document.
    ///
    /// Identical content is imported once; a second import prints the
    /// existing document id.
    Import {
        file: PathBuf,

        #[arg(long)]
        title: Option<String>,

        /// Where the document came from.
        #[arg(long)]
        url: Option<String>,
    },

    /// List imported documents.
    Docs,

    /// Highlight a passage.
    #[command(group(
        ArgGroup::new("target")
            .required(true)
            .args(["quote", "start"])
    ))]
    Highlight {
        document: String,

        /// Highlight the first occurrence of this text.
        #[arg(long)]
        quote: Option<String>,

        /// Start offset (chars) in the document's canonical text.
        #[arg(long, requires = "end")]
        start: Option<usize>,

        /// End offset (exclusive).
        #[arg(long, requires = "start")]
        end: Option<usize>,

        /// yellow, green, blue, pink, or purple. Defaults to the configured color.
        #[arg(long)]
        color: Option<String>,
    },

    /// List a document's anchors.
    Anchors {
        document: String,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Change a highlight's color.
    Recolor {
        document: String,
        anchor: String,
        color: String,
    },

    /// Delete a highlight and its note.
    Delete { document: String, anchor: String },

    /// Attach a note to a highlight; omit the note to clear it.
    Annotate {
        document: String,
        anchor: String,
        note: Option<String>,
    },

    /// Render the document with highlights.
    Render {
        document: String,

        /// Write to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Simulate activating a highlight and print the dispatched event.
    Activate { document: String, anchor: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs to stderr so stdout stays parseable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { file, title, url } => {
            documents::run_import(&cfg, &file, title.as_deref(), url.as_deref()).await?;
        }
        Commands::Docs => {
            documents::run_docs(&cfg).await?;
        }
        Commands::Highlight {
            document,
            quote,
            start,
            end,
            color,
        } => {
            let target = match (quote, start, end) {
                (Some(quote), _, _) => HighlightTarget::Quote(quote),
                (None, Some(start), Some(end)) => HighlightTarget::Offsets { start, end },
                _ => anyhow::bail!("either --quote or both --start and --end are required"),
            };
            anchors::run_highlight(&cfg, &document, &target, color.as_deref()).await?;
        }
        Commands::Anchors { document, json } => {
            anchors::run_anchors(&cfg, &document, json).await?;
        }
        Commands::Recolor {
            document,
            anchor,
            color,
        } => {
            anchors::run_recolor(&cfg, &document, &anchor, &color).await?;
        }
        Commands::Delete { document, anchor } => {
            anchors::run_delete(&cfg, &document, &anchor).await?;
        }
        Commands::Annotate {
            document,
            anchor,
            note,
        } => {
            anchors::run_annotate(&cfg, &document, &anchor, note.as_deref()).await?;
        }
        Commands::Render { document, out } => {
            render_cmd::run_render(&cfg, &document, out.as_deref()).await?;
        }
        Commands::Activate { document, anchor } => {
            anchors::run_activate(&cfg, &document, &anchor).await?;
        }
    }

    Ok(())
}

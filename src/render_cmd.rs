//! `mg render`: write a document's markup with highlights applied.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::documents::open_session;

pub async fn run_render(config: &Config, document_id: &str, out: Option<&Path>) -> Result<()> {
    let session = open_session(config, document_id).await?;
    let markup = session.rendered_markup();

    match out {
        Some(path) => {
            std::fs::write(path, markup)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            match session.last_render() {
                Some(render) => println!(
                    "wrote {} ({} highlighted, {} dropped)",
                    path.display(),
                    render.placed.len(),
                    render.dropped.len()
                ),
                None => println!("wrote {} (unparseable markup, no highlights)", path.display()),
            }
        }
        None => println!("{}", markup),
    }
    Ok(())
}

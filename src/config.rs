//! TOML configuration for the `mg` binary.
//!
//! ```toml
//! [db]
//! path = "./data/mg.sqlite"
//!
//! [render]
//! marker_tag = "mark"
//! class_prefix = "hl"
//! scroll_id_prefix = "highlight-"
//!
//! [highlights]
//! default_color = "yellow"
//! ```
//!
//! Only `[db]` is required.

use anyhow::{bail, Context, Result};
use marginalia_core::markup::{is_void_element, Element};
use marginalia_core::{HighlightColor, RenderOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub highlights: HighlightsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_marker_tag")]
    pub marker_tag: String,
    #[serde(default = "default_class_prefix")]
    pub class_prefix: String,
    #[serde(default = "default_scroll_id_prefix")]
    pub scroll_id_prefix: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            marker_tag: default_marker_tag(),
            class_prefix: default_class_prefix(),
            scroll_id_prefix: default_scroll_id_prefix(),
        }
    }
}

fn default_marker_tag() -> String {
    "mark".to_string()
}
fn default_class_prefix() -> String {
    "hl".to_string()
}
fn default_scroll_id_prefix() -> String {
    "highlight-".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct HighlightsConfig {
    #[serde(default = "default_color")]
    pub default_color: String,
}

impl Default for HighlightsConfig {
    fn default() -> Self {
        Self {
            default_color: default_color(),
        }
    }
}

fn default_color() -> String {
    "yellow".to_string()
}

impl Config {
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            marker_tag: self.render.marker_tag.clone(),
            class_prefix: self.render.class_prefix.clone(),
            scroll_id_prefix: self.render.scroll_id_prefix.clone(),
        }
    }

    /// Color used when a command does not name one. Validated at load time.
    pub fn default_color(&self) -> HighlightColor {
        self.highlights.default_color.parse().unwrap_or_default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate render
    let tag = &config.render.marker_tag;
    if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric()) {
        bail!(
            "render.marker_tag must be a non-empty ASCII alphanumeric element name, got '{}'",
            tag
        );
    }
    if is_void_element(tag) {
        bail!("render.marker_tag cannot be a void element: '{}'", tag);
    }
    if Element::new(tag.as_str()).is_raw_text() {
        bail!("render.marker_tag cannot be a raw-text element: '{}'", tag);
    }
    if config.render.class_prefix.trim().is_empty() {
        bail!("render.class_prefix must not be empty");
    }
    if config.render.scroll_id_prefix.trim().is_empty() {
        bail!("render.scroll_id_prefix must not be empty");
    }

    // Validate highlights
    config
        .highlights
        .default_color
        .parse::<HighlightColor>()
        .context("Invalid highlights.default_color")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config("[db]\npath = \"./data/mg.sqlite\"\n");
        let config = load_config(file.path()).unwrap();
        let options = config.render_options();
        assert_eq!(options, RenderOptions::default());
        assert_eq!(config.default_color(), HighlightColor::Yellow);
    }

    #[test]
    fn test_custom_render_section() {
        let file = write_config(
            "[db]\npath = \"x.sqlite\"\n[render]\nmarker_tag = \"span\"\nclass_prefix = \"note\"\n[highlights]\ndefault_color = \"Green\"\n",
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.render.marker_tag, "span");
        assert_eq!(config.render.scroll_id_prefix, "highlight-");
        assert_eq!(config.default_color(), HighlightColor::Green);
    }

    #[test]
    fn test_rejects_void_marker_tag() {
        let file = write_config("[db]\npath = \"x\"\n[render]\nmarker_tag = \"br\"\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("void element"));
    }

    #[test]
    fn test_rejects_bad_marker_tag_and_color() {
        let file = write_config("[db]\npath = \"x\"\n[render]\nmarker_tag = \"my-mark\"\n");
        assert!(load_config(file.path()).is_err());

        let file = write_config("[db]\npath = \"x\"\n[highlights]\ndefault_color = \"orange\"\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/mg.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}

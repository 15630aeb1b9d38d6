use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mg_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mg"))
}

const ARTICLE: &str = "<article><h1>Foxes</h1><p>The quick brown fox jumps over the lazy dog.</p><p>A <em>second</em> paragraph.</p></article>";

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("foxes.html"), ARTICLE).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/mg.sqlite"

[render]
marker_tag = "mark"
class_prefix = "hl"

[highlights]
default_color = "green"
"#,
        root.display()
    );

    let config_path = config_dir.join("mg.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mg(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mg_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mg binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Init the database and import the test article. Returns the document id.
fn init_and_import(config_path: &Path) -> String {
    let (stdout, stderr, success) = run_mg(config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);

    let file = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files/foxes.html");
    let (stdout, stderr, success) = run_mg(
        config_path,
        &["import", file.to_str().unwrap(), "--title", "Foxes"],
    );
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    stdout
        .trim()
        .strip_prefix("imported ")
        .expect("import output")
        .to_string()
}

/// Create a highlight and return its anchor id.
fn highlight(config_path: &Path, doc: &str, extra: &[&str]) -> String {
    let mut args = vec!["highlight", doc];
    args.extend_from_slice(extra);
    let (stdout, stderr, success) = run_mg(config_path, &args);
    assert!(success, "highlight failed: stdout={}, stderr={}", stdout, stderr);
    stdout
        .split_whitespace()
        .nth(1)
        .expect("anchor id in output")
        .to_string()
}

fn anchors_json(config_path: &Path, doc: &str) -> serde_json::Value {
    let (stdout, stderr, success) = run_mg(config_path, &["anchors", doc, "--json"]);
    assert!(success, "anchors failed: stderr={}", stderr);
    serde_json::from_str(&stdout).unwrap()
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success1) = run_mg(&config_path, &["init"]);
    assert!(success1, "First init failed");
    assert!(stdout.contains("initialized"));

    let (_, _, success2) = run_mg(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_deduplicates_and_lists() {
    let (tmp, config_path) = setup_test_env();
    let doc = init_and_import(&config_path);

    let file = tmp.path().join("files/foxes.html");
    let (stdout, _, success) = run_mg(&config_path, &["import", file.to_str().unwrap()]);
    assert!(success);
    assert_eq!(stdout.trim(), format!("already imported {}", doc));

    let (stdout, _, success) = run_mg(&config_path, &["docs"]);
    assert!(success);
    assert!(stdout.contains(&doc));
    assert!(stdout.contains("Foxes"));
}

#[test]
fn test_highlight_by_quote_and_render() {
    let (_tmp, config_path) = setup_test_env();
    let doc = init_and_import(&config_path);

    let anchor = highlight(&config_path, &doc, &["--quote", "quick brown"]);

    let (stdout, stderr, success) = run_mg(&config_path, &["render", &doc]);
    assert!(success, "render failed: {}", stderr);
    assert!(stdout.contains(&format!(
        "<mark class=\"hl hl-green\" data-anchor-id=\"{}\" data-segment=\"0\" id=\"highlight-{}\">quick brown</mark>",
        anchor, anchor
    )));

    let listing = anchors_json(&config_path, &doc);
    assert_eq!(listing[0]["id"], anchor.as_str());
    assert_eq!(listing[0]["quote"], "quick brown");
    assert_eq!(listing[0]["status"], "stored");
    assert_eq!(listing[0]["color"], "green");
}

#[test]
fn test_highlight_by_offsets_across_elements() {
    let (_tmp, config_path) = setup_test_env();
    let doc = init_and_import(&config_path);

    // "Foxes" is 0..5, the first paragraph starts at 5
    let anchor = highlight(
        &config_path,
        &doc,
        &["--start", "2", "--end", "14", "--color", "blue"],
    );

    let listing = anchors_json(&config_path, &doc);
    assert_eq!(listing[0]["id"], anchor.as_str());
    assert_eq!(listing[0]["quote"], "xesThe quick");

    let (stdout, _, _) = run_mg(&config_path, &["render", &doc]);
    assert!(stdout.contains("data-segment=\"1\""));
    assert!(stdout.contains(&format!("id=\"highlight-{}-1\"", anchor)));
}

#[test]
fn test_highlight_missing_quote_fails() {
    let (_tmp, config_path) = setup_test_env();
    let doc = init_and_import(&config_path);

    let (_, stderr, success) = run_mg(
        &config_path,
        &["highlight", &doc, "--quote", "not in the text"],
    );
    assert!(!success);
    assert!(stderr.contains("quote not found"));
}

#[test]
fn test_recolor_annotate_delete() {
    let (_tmp, config_path) = setup_test_env();
    let doc = init_and_import(&config_path);
    let anchor = highlight(&config_path, &doc, &["--quote", "lazy dog"]);

    let (_, _, success) = run_mg(&config_path, &["recolor", &doc, &anchor, "purple"]);
    assert!(success);
    let (_, _, success) = run_mg(&config_path, &["annotate", &doc, &anchor, "classic pangram"]);
    assert!(success);

    let listing = anchors_json(&config_path, &doc);
    assert_eq!(listing[0]["color"], "purple");
    assert_eq!(listing[0]["annotation"]["note"], "classic pangram");

    let (_, _, success) = run_mg(&config_path, &["recolor", &doc, &anchor, "orange"]);
    assert!(!success, "unknown color should be rejected");

    let (stdout, _, success) = run_mg(&config_path, &["delete", &doc, &anchor]);
    assert!(success);
    assert!(stdout.contains("deleted"));

    let listing = anchors_json(&config_path, &doc);
    assert_eq!(listing.as_array().unwrap().len(), 0);

    let (_, _, success) = run_mg(&config_path, &["delete", &doc, &anchor]);
    assert!(!success, "deleting twice should fail");
}

#[test]
fn test_activate_prints_event() {
    let (_tmp, config_path) = setup_test_env();
    let doc = init_and_import(&config_path);
    let anchor = highlight(&config_path, &doc, &["--quote", "second"]);

    let (stdout, stderr, success) = run_mg(&config_path, &["activate", &doc, &anchor]);
    assert!(success, "activate failed: {}", stderr);
    let event: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(event["type"], "anchor-activated");
    assert_eq!(event["anchorId"], anchor.as_str());
    assert_eq!(event["quote"], "second");
    assert_eq!(event["color"], "green");

    let (_, _, success) = run_mg(&config_path, &["activate", &doc, "no-such-anchor"]);
    assert!(!success);
}

#[test]
fn test_render_to_file() {
    let (tmp, config_path) = setup_test_env();
    let doc = init_and_import(&config_path);
    highlight(&config_path, &doc, &["--quote", "fox"]);

    let out = tmp.path().join("out.html");
    let (stdout, _, success) = run_mg(&config_path, &["render", &doc, "--out", out.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("1 highlighted, 0 dropped"));
    let written = fs::read_to_string(out).unwrap();
    assert!(written.contains(">fox</mark>"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    fs::write(
        &config_path,
        "[db]\npath = \"x.sqlite\"\n[render]\nmarker_tag = \"img\"\n",
    )
    .unwrap();
    let (_, stderr, success) = run_mg(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("void element"));
}

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn shelf_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("shelf");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let sources_dir = root.join("sources");
    fs::create_dir_all(&sources_dir).unwrap();
    fs::write(
        sources_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    ).unwrap();
    fs::write(
        sources_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    ).unwrap();
    fs::write(
        sources_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    ).unwrap();

    let config_content = format!(
        r#"[library]
root = "{}/library"

[sources]
dir = "{}/sources"
include_globs = ["**/*.md", "**/*.txt"]
exclude_globs = []

[chunking]
max_tokens = 700

[retrieval]
final_k = 10
max_per_section = 3
"#,
        root.display(),
        root.display()
    );

    let config_path = root.join("shelf.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_shelf(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = shelf_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run shelf binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_ingest_creates_library() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_shelf(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ingested: 3"));
    assert!(stdout.contains("ok"));

    let library = tmp.path().join("library");
    assert!(library.join("manifest.json").exists());
    assert!(library.join("books").exists());
    assert!(library.join("index").exists());
}

#[test]
fn test_reingest_skips_everything() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success) = run_shelf(&config_path, &["ingest"]);
    assert!(success, "first ingest failed");

    let (stdout, _, success) = run_shelf(&config_path, &["ingest"]);
    assert!(success, "second ingest failed");
    assert!(stdout.contains("ingested: 0"));
    assert!(stdout.contains("skipped:  3"));
}

#[test]
fn test_dry_run_writes_nothing() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_shelf(&config_path, &["ingest", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("would ingest:  3"));
    assert!(!tmp.path().join("library").join("manifest.json").exists());
}

#[test]
fn test_search_finds_relevant_document() {
    let (_tmp, config_path) = setup_test_env();

    run_shelf(&config_path, &["ingest"]);
    let (stdout, stderr, success) = run_shelf(&config_path, &["search", "rust cargo crates"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Alpha") || stdout.contains("alpha"));
}

#[test]
fn test_search_without_index_fails_distinctly() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_shelf(&config_path, &["search", "anything"]);
    assert!(!success, "search without an index must fail: {}", stdout);
    assert!(stderr.contains("no index"), "stderr={}", stderr);
}

#[test]
fn test_build_index_standalone() {
    let (tmp, config_path) = setup_test_env();

    run_shelf(&config_path, &["ingest", "--no-index"]);
    assert!(!tmp.path().join("library").join("index").exists());

    let (stdout, _, success) = run_shelf(&config_path, &["build-index"]);
    assert!(success, "build-index failed: {}", stdout);
    assert!(stdout.contains("chunks indexed"));
    assert!(tmp.path().join("library").join("index").exists());
}

#[test]
fn test_repair_reconstructs_deleted_metadata() {
    let (tmp, config_path) = setup_test_env();

    run_shelf(&config_path, &["ingest"]);

    // Delete one book's metadata file by hand.
    let books = tmp.path().join("library").join("books");
    let book_dir = fs::read_dir(&books).unwrap().next().unwrap().unwrap().path();
    fs::remove_file(book_dir.join("book.json")).unwrap();

    let (stdout, stderr, success) = run_shelf(&config_path, &["repair"]);
    assert!(success, "repair failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("reconstructed book.json"));
    assert!(book_dir.join("book.json").exists());
}

#[test]
fn test_repair_after_clean_ingest_changes_nothing() {
    let (tmp, config_path) = setup_test_env();

    run_shelf(&config_path, &["ingest"]);
    let manifest = tmp.path().join("library").join("manifest.json");
    let before = fs::read(&manifest).unwrap();

    let (stdout, _, success) = run_shelf(&config_path, &["repair"]);
    assert!(success, "repair failed: {}", stdout);
    assert!(stdout.contains("state changed: false"));
    assert_eq!(before, fs::read(&manifest).unwrap());
}

#[test]
fn test_repair_verify_mode_reports_without_writing() {
    let (tmp, config_path) = setup_test_env();

    run_shelf(&config_path, &["ingest"]);
    let books = tmp.path().join("library").join("books");
    let book_dir = fs::read_dir(&books).unwrap().next().unwrap().unwrap().path();
    fs::remove_file(book_dir.join("book.json")).unwrap();

    let (stdout, _, success) = run_shelf(&config_path, &["repair", "--mode", "verify"]);
    assert!(success, "verify failed: {}", stdout);
    assert!(stdout.contains("manifest rebuilt: false"));
    assert!(!book_dir.join("book.json").exists(), "verify must not write");
}

#[test]
fn test_status_summarizes_library() {
    let (_tmp, config_path) = setup_test_env();

    run_shelf(&config_path, &["ingest"]);
    let (stdout, stderr, success) = run_shelf(&config_path, &["status"]);
    assert!(success, "status failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("3 ready"));
    assert!(stdout.contains("Consistency: ok"));
    assert!(stdout.contains("alpha.md"));
}

#[test]
fn test_status_without_library() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_shelf(&config_path, &["status"]);
    assert!(success, "status on an empty root must not fail");
    assert!(stdout.contains("No library found"));
}

#[test]
fn test_missing_source_dir_is_hard_failure() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) =
        run_shelf(&config_path, &["ingest", "--source-dir", "/nonexistent/path"]);
    assert!(!success);
    assert!(stderr.contains("source directory does not exist"));
}

#[test]
fn test_superseded_version_visible_in_status() {
    let (tmp, config_path) = setup_test_env();

    run_shelf(&config_path, &["ingest"]);

    // Re-upload alpha.md with new content; the old version gets superseded.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    fs::write(
        tmp.path().join("sources").join("alpha.md"),
        "# Alpha Document\n\nRevised alpha content about Rust programming.",
    )
    .unwrap();
    let (stdout, _, success) = run_shelf(&config_path, &["ingest"]);
    assert!(success, "re-ingest failed: {}", stdout);
    assert!(stdout.contains("ingested: 1"));

    let (stdout, _, success) = run_shelf(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("superseded"));
}

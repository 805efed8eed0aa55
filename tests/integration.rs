use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn crag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("crag");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Providers stay disabled: no network access in tests.
    let config_content = format!(
        r#"[db]
path = "{root}/data/catalog.sqlite"

[index]
dir = "{root}/data/index"

[retrieval]
top_k = 0

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("crag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_crag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = crag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run crag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_databases() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_crag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/catalog.sqlite").exists());
    assert!(tmp.path().join("data/index/vectors.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_crag(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_crag(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_products_list_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_crag(&config_path, &["init"]);

    let (stdout, stderr, success) = run_crag(&config_path, &["products", "list"]);
    assert!(success, "list failed: stderr={}", stderr);
    assert!(stdout.contains("No products."));
}

#[test]
fn test_add_without_embeddings_rolls_back() {
    let (_tmp, config_path) = setup_test_env();
    run_crag(&config_path, &["init"]);

    let (_, stderr, success) = run_crag(
        &config_path,
        &[
            "products", "add", "--name", "Ring", "--color", "gold", "--price", "100",
        ],
    );
    assert!(!success, "add should fail with embeddings disabled");
    assert!(stderr.contains("disabled"), "stderr={}", stderr);

    // The relational insert was undone, so the mirror still holds.
    let (stdout, _, _) = run_crag(&config_path, &["products", "list"]);
    assert!(stdout.contains("No products."));
    let (stdout, _, success) = run_crag(&config_path, &["index", "audit", "--strict"]);
    assert!(success);
    assert!(stdout.contains("consistent"));
}

#[test]
fn test_search_on_empty_index() {
    let (_tmp, config_path) = setup_test_env();
    run_crag(&config_path, &["init"]);

    let (stdout, stderr, success) = run_crag(&config_path, &["search", "gold ring"]);
    assert!(success, "search failed: stderr={}", stderr);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_chat_errors_when_llm_disabled() {
    let (_tmp, config_path) = setup_test_env();
    run_crag(&config_path, &["init"]);

    let (_, stderr, success) = run_crag(&config_path, &["chat", "hola"]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr={}", stderr);
}

#[test]
fn test_delete_with_empty_filter_rejected() {
    let (_tmp, config_path) = setup_test_env();
    run_crag(&config_path, &["init"]);

    let (_, stderr, success) =
        run_crag(&config_path, &["products", "delete", "--filter", "{}"]);
    assert!(!success);
    assert!(stderr.contains("empty filter"), "stderr={}", stderr);
}

#[test]
fn test_get_missing_product() {
    let (_tmp, config_path) = setup_test_env();
    run_crag(&config_path, &["init"]);

    let (_, stderr, success) = run_crag(&config_path, &["products", "get", "42"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr={}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_crag(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_config_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("crag.toml");
    fs::write(
        &config_path,
        "[db]\npath = \"./x.sqlite\"\n[llm]\nprovider = \"openai\"\n",
    )
    .unwrap();

    let (_, stderr, success) = run_crag(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("llm.model"), "stderr={}", stderr);
}

#[test]
fn test_completions_need_no_config() {
    let tmp = TempDir::new().unwrap();
    let (stdout, stderr, success) =
        run_crag(&tmp.path().join("absent.toml"), &["completions", "bash"]);
    assert!(success, "completions failed: {}", stderr);
    assert!(stdout.contains("crag"));
}

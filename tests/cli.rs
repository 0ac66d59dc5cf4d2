//! Runs the `llm-index` binary against a temporary workspace: a filesystem
//! host with two pages, one mirrored and one managed collection.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_llm-index"))
}

fn setup() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let help = root.join("wiki/main/Help");
    fs::create_dir_all(&help).unwrap();
    fs::write(
        help.join("Install.md"),
        "# Installing\n\nRun the installer. It registers the service.\n\nThen edit the config file.",
    )
    .unwrap();
    fs::write(help.join("Install.meta.toml"), "[[fields]]\nname = \"Summary\"\nvalue = \"Setup\"\n")
        .unwrap();
    fs::write(help.join("Upgrade.md"), "# Upgrading\n\nStop the service first.").unwrap();
    fs::create_dir_all(root.join("wiki/main/Other")).unwrap();
    fs::write(root.join("wiki/main/Other/Page.md"), "out of scope").unwrap();

    let config = root.join("llm-index.toml");
    fs::write(
        &config,
        format!(
            r#"[db]
path = "{root}/data/index.sqlite"

[logging]
level = "warn"

[host]
root = "{root}/wiki"

[chunking]
max_chunk_chars = 40
overlap_chars = 5

[[embedding.models]]
id = "hash"
provider = "hashing"
dims = 384

[[collections]]
tenant = "main"
id = "help"
embedding_model = "hash"
source = "mirrored"
scope = ["Help"]

[[collections]]
tenant = "main"
id = "notes"
embedding_model = "default"
source = "managed"
"#,
            root = root.display()
        ),
    )
    .unwrap();

    (tmp, config)
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout_of(config: &Path, args: &[&str]) -> String {
    let output = run(config, args);
    assert!(
        output.status.success(),
        "{:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = setup();
    assert!(stdout_of(&config, &["init"]).contains("initialized"));
    assert!(stdout_of(&config, &["init"]).contains("initialized"));
}

#[test]
fn test_collections_lists_config() {
    let (_tmp, config) = setup();
    let out = stdout_of(&config, &["collections"]);
    assert!(out.contains("help"));
    assert!(out.contains("notes"));
    assert!(out.contains("mirrored"));
}

#[test]
fn test_sync_indexes_host_pages() {
    let (_tmp, config) = setup();
    let out = stdout_of(&config, &["sync"]);
    assert!(out.contains("Collection changes: 2"), "{}", out);
    assert!(out.contains("Documents: 2 indexed"), "{}", out);

    // Nothing changed: no events, nothing to index.
    let out = stdout_of(&config, &["sync"]);
    assert!(out.contains("Collection changes: 0"), "{}", out);
    assert!(out.contains("Documents: 0 indexed"), "{}", out);

    let stats = stdout_of(&config, &["stats"]);
    assert!(stats.contains("help"), "{}", stats);
}

#[test]
fn test_notify_deleted_purges() {
    let (tmp, config) = setup();
    stdout_of(&config, &["sync"]);

    fs::remove_file(tmp.path().join("wiki/main/Help/Upgrade.md")).unwrap();
    stdout_of(&config, &["notify", "deleted", "main:Help.Upgrade"]);
    let out = stdout_of(&config, &["reindex", "help", "--full"]);
    assert!(out.contains("1 documents scheduled"), "{}", out);

    let bad = run(&config, &["notify", "renamed", "main:Help.Upgrade"]);
    assert!(!bad.status.success());
}

#[test]
fn test_managed_documents() {
    let (tmp, config) = setup();
    stdout_of(&config, &["init"]);
    let file = tmp.path().join("readme.md");
    fs::write(&file, "# Readme\n\nManaged content lives in SQLite.").unwrap();

    let out = stdout_of(
        &config,
        &["doc", "put", "notes", "readme", "--file", file.to_str().unwrap()],
    );
    assert!(out.contains("document-created main:notes/readme"), "{}", out);
    assert!(out.contains("Documents: 1 indexed"), "{}", out);

    let out = stdout_of(
        &config,
        &["doc", "put", "notes", "readme", "--file", file.to_str().unwrap()],
    );
    assert!(out.contains("document-updated"), "{}", out);

    let out = stdout_of(&config, &["doc", "ls", "notes"]);
    assert!(out.contains("main:notes/readme"));

    stdout_of(&config, &["doc", "rm", "notes", "readme"]);
    let out = stdout_of(&config, &["doc", "ls", "notes"]);
    assert!(out.contains("0 documents"));

    let wrong = run(&config, &["doc", "put", "help", "x", "--file", file.to_str().unwrap()]);
    assert!(!wrong.status.success());
}

#[test]
fn test_chunk_preview() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("sample.txt");
    fs::write(&file, "Hello world. This is a test.\n\nSecond paragraph here.").unwrap();
    let output = Command::new(binary())
        .args(["chunk", file.to_str().unwrap(), "--max", "30", "--overlap", "5"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let out = String::from_utf8_lossy(&output.stdout);
    assert!(out.contains("--- chunk 0 [0..30) ---"), "{}", out);
    assert!(out.contains("--- chunk 1 [25..52) ---"), "{}", out);
    assert!(out.contains("2 chunks, 52 chars"), "{}", out);
}

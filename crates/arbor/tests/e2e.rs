// End-to-end tests for the arbor binary.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn arbor(config_dir: &Path, args: &[&str]) -> Output {
    let config = config_dir.join("config.toml");
    if !config.exists() {
        fs::write(&config, "").unwrap();
    }
    Command::new(env!("CARGO_BIN_EXE_arbor"))
        .arg("--config")
        .arg(&config)
        .args(args)
        .output()
        .expect("failed to run arbor")
}

fn fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in ["file10.txt", "file2.txt", "file1.txt", "B.txt", "a.txt"] {
        fs::write(dir.path().join(name), b"").unwrap();
    }
    fs::create_dir_all(dir.path().join("src").join("nested")).unwrap();
    fs::write(dir.path().join("src").join("nested").join("mod.rs"), b"").unwrap();
    dir
}

#[test]
fn cli_help_displays_correctly() {
    let output = Command::new(env!("CARGO_BIN_EXE_arbor"))
        .arg("--help")
        .output()
        .expect("failed to run arbor --help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("tree"));
    assert!(stdout.contains("watch"));
    assert!(stdout.contains("config"));
}

#[test]
fn tree_lists_folders_first_in_natural_order() {
    let data = fixture();
    let conf = tempfile::tempdir().unwrap();
    let output = arbor(
        conf.path(),
        &["tree", "--depth", "2", data.path().to_str().unwrap()],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let rows: Vec<&str> = stdout
        .lines()
        .skip(1)
        .filter(|l| !l.starts_with(' ') && !l.starts_with('│'))
        .map(|l| l.trim_start_matches(['├', '└', '─', ' ']))
        .collect();
    assert_eq!(
        rows,
        ["src/", "a.txt", "B.txt", "file1.txt", "file2.txt", "file10.txt"]
    );
    // loading src/ also opens its single-directory chain
    assert!(stdout.contains("nested/"));
    assert!(stdout.contains("mod.rs"));
}

#[test]
fn tree_json_output_is_structured() {
    let data = fixture();
    let conf = tempfile::tempdir().unwrap();
    let output = arbor(
        conf.path(),
        &["--format", "json", "tree", "--all", data.path().to_str().unwrap()],
    );
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["state"], "loaded");
    let children = json["children"].as_array().unwrap();
    assert_eq!(children.len(), 6);
    assert_eq!(children[0]["label"], "src/");
    assert_eq!(children[0]["children"][0]["label"], "nested/");
}

#[test]
fn tree_on_missing_directory_fails() {
    let conf = tempfile::tempdir().unwrap();
    let missing = conf.path().join("does-not-exist");
    let output = arbor(conf.path(), &["tree", missing.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Cannot open directory"));
}

#[test]
fn invalid_config_is_reported() {
    let conf = tempfile::tempdir().unwrap();
    fs::write(
        conf.path().join("config.toml"),
        "[pool]\ncore_size = 4\nmax_size = 1\n",
    )
    .unwrap();
    let output = arbor(conf.path(), &["config", "validate"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("max_size"));
}

#[test]
fn config_show_prints_effective_settings() {
    let conf = tempfile::tempdir().unwrap();
    fs::write(conf.path().join("config.toml"), "[tree]\nsort = \"created-asc\"\n").unwrap();
    let output = arbor(conf.path(), &["config", "show"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[pool]"));
    assert!(stdout.contains("sort = \"created-asc\""));
}

#[test]
fn watch_prints_initial_tree_and_stops() {
    let data = fixture();
    let conf = tempfile::tempdir().unwrap();
    let output = arbor(
        conf.path(),
        &[
            "watch",
            "--min-ms",
            "50",
            "--max-ms",
            "200",
            "--duration-secs",
            "1",
            data.path().to_str().unwrap(),
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("file10.txt"));
}

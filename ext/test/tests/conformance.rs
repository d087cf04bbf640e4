//! Conformance tests that run YAML fixtures against nodelabel
//!
//! Run with: cargo test -p nodelabel-test --test conformance

use nodelabel_test::fixture::Fixture;
use std::fs;
use std::path::{Path, PathBuf};

/// The manifest dir is ext/test; fixtures live next to Cargo.toml.
fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

/// Load and run every fixture in one file
fn run_fixture_file(path: &Path) -> usize {
    println!("Running fixture: {}", path.display());

    let yaml = fs::read_to_string(path).expect("read yaml");

    // Parse potentially multiple fixtures (separated by ---)
    let fixtures = Fixture::from_yaml_multi(&yaml).unwrap_or_else(|e| {
        panic!("Failed to parse {}: {}", path.display(), e);
    });
    assert!(!fixtures.is_empty(), "{} holds no fixtures", path.display());

    for fixture in &fixtures {
        println!("  Running: {}", fixture.name);
        fixture.run_and_assert();
    }
    fixtures.len()
}

/// Load and run all fixtures in a directory
fn run_fixtures_in_dir(dir: &Path) -> usize {
    if !dir.exists() {
        panic!("Fixtures directory does not exist: {}", dir.display());
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("dir entry").path())
        .filter(|path| path.extension().is_some_and(|e| e == "yaml" || e == "yml"))
        .collect();
    paths.sort();

    paths.iter().map(|path| run_fixture_file(path)).sum()
}

#[test]
fn test_modern_rules() {
    run_fixture_file(&fixtures_dir().join("01_modern.yaml"));
}

#[test]
fn test_match_any() {
    run_fixture_file(&fixtures_dir().join("02_match_any.yaml"));
}

#[test]
fn test_legacy_rules() {
    run_fixture_file(&fixtures_dir().join("03_legacy.yaml"));
}

#[test]
fn test_templates() {
    run_fixture_file(&fixtures_dir().join("04_templates.yaml"));
}

#[test]
fn test_fault_isolation() {
    run_fixture_file(&fixtures_dir().join("05_fault_isolation.yaml"));
}

#[test]
fn test_all_fixtures() {
    let count = run_fixtures_in_dir(&fixtures_dir());
    assert!(count >= 15, "expected at least 15 fixtures, found {count}");
}

#[test]
fn test_builtin_rules_on_sample_node() {
    use nodelabel_test::prelude::*;

    let labeler = Labeler::builder().builtin_rules(true).build().unwrap();
    let labels = labeler.labels(&node_snapshot());

    // mlx5 adapter present, rdma_ucm not loaded.
    assert_eq!(labels.get("rdma.capable").map(String::as_str), Some("true"));
    assert!(!labels.contains_key("rdma.available"));
}

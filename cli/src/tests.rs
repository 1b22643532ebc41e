use super::*;
use clap::CommandFactory;
use gfcat_core::catalog::CatalogMeta;
use gfcat_core::validate::Verdict;
use std::io::Write as _;
use tempfile::tempdir;

fn build_args(argv: &[&str]) -> BuildArgs {
    let mut full = vec!["gfcat", "build"];
    full.extend_from_slice(argv);
    match Cli::try_parse_from(full).expect("parse cli").command {
        Command::Build(args) => args,
        other => panic!("expected build, got {other:?}"),
    }
}

fn sample_doc() -> CatalogDocument {
    let item = serde_json::from_value(serde_json::json!({
        "family": "Inter",
        "slug": "inter",
        "category": "sans-serif",
        "variants": ["regular", "700"],
    }))
    .expect("item");
    let meta: CatalogMeta = serde_json::from_value(serde_json::json!({
        "generated": "2024-01-01T00:00:00Z",
        "total_families": 1,
        "total_variants": 2,
    }))
    .expect("meta");
    CatalogDocument {
        items: vec![item],
        meta,
    }
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn flags_override_defaults() {
    let args = build_args(&[
        "--max-families",
        "20",
        "-j",
        "3",
        "--deadline-secs",
        "90",
        "--licenses",
        "apache,ofl",
        "--github-token",
        "abc",
    ]);
    let config = build_config(&args).expect("config");

    assert_eq!(config.max_families, Some(20));
    assert_eq!(config.workers, 3);
    assert_eq!(config.deadline_ms, Some(90_000));
    assert_eq!(config.licenses, vec![License::Apache, License::Ofl]);
    assert_eq!(config.github_token.as_deref(), Some("abc"));
}

#[test]
fn unknown_license_is_rejected() {
    let args = build_args(&["--licenses", "gpl"]);
    assert!(build_config(&args).is_err());
}

#[test]
fn zero_workers_is_rejected() {
    let args = build_args(&["--workers", "0"]);
    assert!(build_config(&args).is_err());
}

#[test]
fn endpoint_base_keeps_repository() {
    let args = build_args(&["--endpoint-base", "http://127.0.0.1:9999/"]);
    let config = build_config(&args).expect("config");

    assert_eq!(config.endpoints.css2, "http://127.0.0.1:9999");
    assert_eq!(config.endpoints.github_api, "http://127.0.0.1:9999");
    assert_eq!(config.endpoints.repository, "google/fonts");
}

#[test]
fn config_file_is_layered_under_flags() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("gfcat.json");
    let mut file = File::create(&path).expect("create");
    write!(file, r#"{{"workers": 2, "page_size": 50}}"#).expect("write");

    let path_arg = path.to_string_lossy().to_string();
    let args = build_args(&["--config", &path_arg, "--workers", "6"]);
    let config = build_config(&args).expect("config");

    assert_eq!(config.workers, 6);
    assert_eq!(config.page_size, 50);
}

#[test]
fn publish_replaces_target_atomically() {
    let dir = tempdir().expect("tempdir");
    let target = dir.path().join("catalog.json");
    fs::write(&target, "old").expect("seed");

    publish(&sample_doc(), Some(&target), Profile::Minimal, false).expect("publish");

    let text = fs::read_to_string(&target).expect("read");
    let value: serde_json::Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value["items"][0]["family"], "Inter");
    assert!(value["items"][0].get("files").is_none());
    assert!(!staging_path(&target).exists());
}

#[test]
fn failed_publish_leaves_no_staging_file() {
    let dir = tempdir().expect("tempdir");
    // A non-empty directory in the way makes the final rename fail.
    let target = dir.path().join("catalog.json");
    fs::create_dir(&target).expect("mkdir");
    fs::write(target.join("keep"), "x").expect("seed");

    let result = publish(&sample_doc(), Some(&target), Profile::Full, false);

    assert!(result.is_err());
    assert!(!staging_path(&target).exists());
    assert!(target.join("keep").exists());
}

#[test]
fn validate_file_reports_verdict() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("catalog.json");
    let mut buf = Vec::new();
    write_catalog(&sample_doc(), Profile::Full, &mut buf).expect("write");
    fs::write(&path, buf).expect("write file");

    let validator = Validator::new(ValidationConfig {
        min_families: 1,
        min_variants: 1,
        must_include: Vec::new(),
    });
    let report = validate_file(&path, &validator, false).expect("validate");
    assert_eq!(report.verdict, Verdict::Pass);

    let strict_default = Validator::default();
    let report = validate_file(&path, &strict_default, false).expect("validate");
    assert_eq!(report.verdict, Verdict::Fail);
}

#[test]
fn validate_args_apply_thresholds() {
    let cli = Cli::try_parse_from([
        "gfcat",
        "validate",
        "catalog.json",
        "--min-families",
        "5",
        "--min-variants",
        "7",
        "--strict",
    ])
    .expect("parse");
    let Command::Validate(args) = cli.command else {
        panic!("expected validate");
    };

    let validation = validation_config(&args).expect("config");
    assert!(args.strict);
    assert_eq!(validation.min_families, 5);
    assert_eq!(validation.min_variants, 7);
    assert!(!validation.must_include.is_empty());
}

#[test]
fn verbosity_is_global() {
    let cli = Cli::try_parse_from(["gfcat", "validate", "x.json", "-vv"]).expect("parse");
    assert_eq!(cli.verbose, 2);
}

use std::io::Write;

use tempfile::NamedTempFile;

use anadag::config::load_and_validate;
use anadag::errors::AnadagError;
use anadag::graph::build_from_request;

fn write_request(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn loads_a_complete_request() {
    let file = write_request(
        r#"
        [scheduler]
        max_workers = 3
        memory_ceiling_bytes = 4096
        default_timeout_secs = 30

        [cache]
        budget_bytes = 1024
        policy = "refresh"

        [dataset.counts]
        source = "counts.csv"
        size_bytes = 512
        shape = [10, 20]

        [analysis.pca]
        inputs = ["counts"]
        params = { n_comps = 5 }

        [analysis.tsne]
        inputs = ["pca"]
        timeout_secs = 120
        "#,
    );

    let req = load_and_validate(file.path()).unwrap();
    assert_eq!(req.scheduler.effective_max_workers(), 3);
    assert_eq!(req.scheduler.effective_memory_ceiling(), 4096);
    assert_eq!(req.cache.budget_bytes, 1024);

    let built = build_from_request(&req).unwrap();
    let pca = &built.names["pca"];
    let tsne = &built.names["tsne"];
    assert_eq!(built.graph.producers_of(tsne), vec![pca.clone()]);

    let pca_node = built.graph.node(pca).unwrap();
    assert_eq!(pca_node.estimated_bytes(), 512);
    assert_eq!(pca_node.timeout(), Some(std::time::Duration::from_secs(30)));
    assert_eq!(
        built.graph.node(tsne).unwrap().timeout(),
        Some(std::time::Duration::from_secs(120))
    );
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_and_validate(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, AnadagError::IoError(_)));
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let file = write_request("[analysis.pca\ninputs = 3");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, AnadagError::TomlError(_)));
}

#[test]
fn empty_request_is_rejected() {
    let file = write_request("[scheduler]\nmax_workers = 2\n");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, AnadagError::ConfigError(_)));
    assert!(err.to_string().contains("at least one"));
}

#[test]
fn unknown_references_are_rejected() {
    let file = write_request("[analysis.pca]\ninputs = [\"counts\"]\n");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(err.to_string().contains("unknown input 'counts'"));

    let file = write_request("[analysis.pca]\nafter = [\"qc\"]\n");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(err.to_string().contains("unknown dependency 'qc'"));
}

#[test]
fn dataset_is_not_a_valid_after_target() {
    let file = write_request(
        r#"
        [dataset.counts]
        source = "counts.csv"

        [analysis.pca]
        after = ["counts"]
        "#,
    );
    assert!(load_and_validate(file.path()).is_err());
}

#[test]
fn scheduler_bounds_are_checked() {
    for (section, field) in [
        ("max_workers = 0", "max_workers"),
        ("safety_margin = -0.5", "safety_margin"),
        ("poll_interval_ms = 0", "poll_interval_ms"),
    ] {
        let file = write_request(&format!("[scheduler]\n{section}\n[analysis.a]\n"));
        let err = load_and_validate(file.path()).unwrap_err();
        assert!(err.to_string().contains(field), "{section}: {err}");
    }
}

#[test]
fn unknown_cache_policy_is_a_toml_error() {
    let file = write_request("[cache]\npolicy = \"sometimes\"\n[analysis.a]\n");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, AnadagError::TomlError(_)));
}

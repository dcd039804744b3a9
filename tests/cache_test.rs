//! Sample cache behaviour: fingerprint chaining, entry reuse by identity,
//! suffix invalidation, and the on-disk sample artefact.

use flate2::write::GzEncoder;
use parclean::cache::{fingerprint_step, SampleCache, WorkResult};
use parclean::filters::{FilterDefinition, FilterRegistry, FilterStep};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn write_gz(path: &std::path::Path, lines: &[&str]) {
    let file = std::fs::File::create(path).unwrap();
    let mut encoder = GzEncoder::new(file, flate2::Compression::default());
    for line in lines {
        encoder.write_all(line.as_bytes()).unwrap();
        encoder.write_all(b"\n").unwrap();
    }
    encoder.finish().unwrap();
}

struct Fixture {
    _dir: TempDir,
    columns: Vec<(String, PathBuf)>,
    cache: SampleCache,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let en = dir.path().join("corpus.de-en.en.gz");
    let de = dir.path().join("corpus.de-en.de.gz");
    write_gz(&en, &["Hello", "Goodbye", "Yes", "No"]);
    write_gz(&de, &["Hallo", "Tschuess", "Ja", "Nein"]);

    let mut registry = FilterRegistry::default();
    for (name, command) in [
        ("identity", "cat"),
        ("uppercase", "tr a-z A-Z"),
        ("no_empty", "grep -v '^$' || true"),
    ] {
        let definition: FilterDefinition = serde_json::from_value(json!({
            "type": "bilingual",
            "name": name,
            "command": command,
            "basedir": "."
        }))
        .unwrap();
        registry.insert(definition);
    }

    let cache = SampleCache::new(
        Arc::new(registry),
        vec![env!("CARGO_BIN_EXE_parclean-col").to_string()],
        vec![env!("CARGO_BIN_EXE_parclean-sample").to_string()],
        2,
    );

    Fixture {
        columns: vec![
            ("en".to_string(), en),
            ("de".to_string(), de),
        ],
        cache,
        _dir: dir,
    }
}

fn step(filter: &str) -> FilterStep {
    serde_json::from_value(json!({"filter": filter, "parameters": {}, "language": null})).unwrap()
}

fn collect(cache: &SampleCache, columns: &[(String, PathBuf)], steps: &[FilterStep]) -> Vec<WorkResult> {
    cache.get_sample("corpus.de-en", columns, steps).collect()
}

#[test]
fn test_raw_sample_comes_from_the_sampler() {
    let fx = fixture();
    let results = collect(&fx.cache, &fx.columns, &[]);
    assert_eq!(results.len(), 1);

    let output = results[0].as_ref().as_ref().unwrap();
    assert_eq!(output.returncode, 0);
    assert_eq!(output.columns, vec!["en", "de"]);
    // Sample size 2: head and tail of the 4-row dataset.
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("Hello\tHallo"));
    assert!(text.contains("No\tNein"));

    // The artefact is persisted next to the dataset.
    let artefact = fx.columns[0].1.parent().unwrap().join(".sample.corpus.de-en.en-de");
    assert!(artefact.exists());
}

#[test]
fn test_each_step_yields_one_output() {
    let fx = fixture();
    let steps = [step("identity"), step("uppercase")];
    let results = collect(&fx.cache, &fx.columns, &steps);
    assert_eq!(results.len(), 3);

    let last = results[2].as_ref().as_ref().unwrap();
    assert_eq!(last.returncode, 0);
    let text = String::from_utf8_lossy(&last.stdout);
    assert!(text.contains("HELLO\tHALLO"));
}

#[test]
fn test_unchanged_prefix_is_reused_by_identity() {
    let fx = fixture();
    let steps = [step("identity"), step("uppercase"), step("no_empty")];

    let first = collect(&fx.cache, &fx.columns, &steps);

    // Replace the last step only.
    let mut changed = steps.to_vec();
    changed[2] = step("identity");
    let second = collect(&fx.cache, &fx.columns, &changed);

    for i in 0..3 {
        assert!(
            Arc::ptr_eq(&first[i], &second[i]),
            "entry {i} should be the identical cached work"
        );
    }
    assert!(
        !Arc::ptr_eq(&first[3], &second[3]),
        "changed step must be recomputed"
    );
}

#[test]
fn test_changed_parameters_invalidate_the_suffix() {
    let fx = fixture();
    let steps = [step("identity"), step("uppercase")];
    let first = collect(&fx.cache, &fx.columns, &steps);

    let mut changed = steps.to_vec();
    changed[0] = serde_json::from_value(
        json!({"filter": "identity", "parameters": {"X": 1}, "language": null}),
    )
    .unwrap();
    let second = collect(&fx.cache, &fx.columns, &changed);

    assert!(Arc::ptr_eq(&first[0], &second[0]));
    assert!(!Arc::ptr_eq(&first[1], &second[1]));
    assert!(!Arc::ptr_eq(&first[2], &second[2]));
}

#[test]
fn test_source_mtime_invalidates_everything() {
    let fx = fixture();
    let steps = [step("identity")];
    let first = collect(&fx.cache, &fx.columns, &steps);

    // Bump the mtime of one source file well past the artefact's.
    let file = std::fs::File::options()
        .append(true)
        .open(&fx.columns[0].1)
        .unwrap();
    file.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(5))
        .unwrap();

    let second = collect(&fx.cache, &fx.columns, &steps);
    assert!(!Arc::ptr_eq(&first[0], &second[0]));
    assert!(!Arc::ptr_eq(&first[1], &second[1]));
}

#[test]
fn test_removed_steps_drop_cached_tail() {
    let fx = fixture();
    let steps = [step("identity"), step("uppercase")];
    let first = collect(&fx.cache, &fx.columns, &steps);
    assert_eq!(first.len(), 3);

    // Querying with fewer steps must still reuse the surviving prefix.
    let second = collect(&fx.cache, &fx.columns, &steps[..1]);
    assert_eq!(second.len(), 2);
    assert!(Arc::ptr_eq(&first[0], &second[0]));
    assert!(Arc::ptr_eq(&first[1], &second[1]));

    // And the dropped tail is recomputed when it comes back.
    let third = collect(&fx.cache, &fx.columns, &steps);
    assert!(Arc::ptr_eq(&first[1], &third[1]));
    assert!(!Arc::ptr_eq(&first[2], &third[2]));
}

#[test]
fn test_monolingual_step_in_preview() {
    let fx = fixture();
    let mut registry = FilterRegistry::default();
    registry.insert(
        serde_json::from_value(json!({
            "type": "monolingual",
            "name": "lowercase",
            "command": "tr A-Z a-z",
            "basedir": "."
        }))
        .unwrap(),
    );
    let cache = SampleCache::new(
        Arc::new(registry),
        vec![env!("CARGO_BIN_EXE_parclean-col").to_string()],
        vec![env!("CARGO_BIN_EXE_parclean-sample").to_string()],
        2,
    );

    let step: FilterStep = serde_json::from_value(
        json!({"filter": "lowercase", "parameters": {}, "language": "en"}),
    )
    .unwrap();
    let results: Vec<WorkResult> = cache
        .get_sample("corpus.de-en", &fx.columns, &[step])
        .collect();
    assert_eq!(results.len(), 2);

    let output = results[1].as_ref().as_ref().unwrap();
    assert_eq!(output.returncode, 0, "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("hello\tHallo"), "stdout: {text}");
}

#[test]
fn test_unknown_filter_yields_an_error_entry() {
    let fx = fixture();
    let results = collect(&fx.cache, &fx.columns, &[step("missing")]);
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    let err = results[1].as_ref().as_ref().unwrap_err();
    assert!(err.to_string().contains("unknown filter"));
}

#[test]
fn test_failing_filter_records_its_exit() {
    let fx = fixture();
    let mut registry = FilterRegistry::default();
    registry.insert(
        serde_json::from_value(json!({
            "type": "bilingual",
            "name": "fail",
            "command": "echo kaputt >&2; exit 3",
            "basedir": "."
        }))
        .unwrap(),
    );
    let cache = SampleCache::new(
        Arc::new(registry),
        vec![env!("CARGO_BIN_EXE_parclean-col").to_string()],
        vec![env!("CARGO_BIN_EXE_parclean-sample").to_string()],
        2,
    );

    let results: Vec<WorkResult> = cache
        .get_sample("corpus.de-en", &fx.columns, &[step("fail")])
        .collect();
    let output = results[1].as_ref().as_ref().unwrap();
    assert_eq!(output.returncode, 3);
    assert!(String::from_utf8_lossy(&output.stderr).contains("kaputt"));
}

#[test]
fn test_fingerprints_chain() {
    let definition: FilterDefinition = serde_json::from_value(json!({
        "type": "bilingual", "name": "identity", "command": "cat", "basedir": "."
    }))
    .unwrap();

    let prev = [7u8; 32];
    let a = fingerprint_step(&prev, &step("identity"), &definition).unwrap();
    let b = fingerprint_step(&prev, &step("identity"), &definition).unwrap();
    assert_eq!(a, b, "fingerprints are deterministic");

    let other_prev = [8u8; 32];
    let c = fingerprint_step(&other_prev, &step("identity"), &definition).unwrap();
    assert_ne!(a, c, "previous fingerprint is part of the chain");

    let mut changed = definition.clone();
    changed.command = "tac".to_string();
    let d = fingerprint_step(&prev, &step("identity"), &changed).unwrap();
    assert_ne!(a, d, "definition changes invalidate the fingerprint");
}

//! End-to-end tests for the `parclean` binary: gzipped dataset in, filtered
//! TSV out, with the documented exit codes.

use flate2::write::GzEncoder;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

struct Workbench {
    dir: TempDir,
}

impl Workbench {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("filters")).unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn add_filter(&self, name: &str, body: serde_json::Value) {
        std::fs::write(
            self.path().join("filters").join(format!("{name}.json")),
            serde_json::to_string_pretty(&body).unwrap(),
        )
        .unwrap();
    }

    fn add_column(&self, filename: &str, lines: &[String]) -> PathBuf {
        let path = self.path().join("data").join(filename);
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder = GzEncoder::new(file, flate2::Compression::default());
        for line in lines {
            encoder.write_all(line.as_bytes()).unwrap();
            encoder.write_all(b"\n").unwrap();
        }
        encoder.finish().unwrap();
        path
    }

    fn write_pipeline(&self, name: &str, body: serde_json::Value) -> PathBuf {
        let path = self.path().join("data").join(name);
        std::fs::write(&path, serde_json::to_string_pretty(&body).unwrap()).unwrap();
        path
    }

    fn clean(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_parclean"))
            .args(args)
            .current_dir(self.path())
            .stdin(Stdio::null())
            .output()
            .unwrap()
    }
}

fn lines(n: usize, f: impl Fn(usize) -> String) -> Vec<String> {
    (0..n).map(f).collect()
}

fn two_column_bench(rows: usize) -> (Workbench, PathBuf) {
    let bench = Workbench::new();
    bench.add_column(
        "corpus.de-en.en.gz",
        &lines(rows, |i| format!("en sentence {i}")),
    );
    bench.add_column(
        "corpus.de-en.de.gz",
        &lines(rows, |i| format!("de Satz {i}")),
    );
    let pipeline = bench.write_pipeline(
        "corpus.de-en.filters.json",
        json!({
            "version": 1,
            "files": ["corpus.de-en.en.gz", "corpus.de-en.de.gz"],
            "filters": []
        }),
    );
    (bench, pipeline)
}

fn expected_paste(rows: usize) -> String {
    lines(rows, |i| format!("en sentence {i}\tde Satz {i}\n")).concat()
}

#[test]
fn test_empty_filter_list_equals_paste() {
    let (bench, pipeline) = two_column_bench(100);
    let output = bench.clean(&[pipeline.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), expected_paste(100));
}

#[test]
fn test_clean_is_idempotent() {
    let (bench, pipeline) = two_column_bench(50);
    let first = bench.clean(&[pipeline.to_str().unwrap()]);
    let second = bench.clean(&[pipeline.to_str().unwrap()]);
    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn test_bilingual_filter_sees_whole_rows() {
    let (bench, _) = two_column_bench(10);
    bench.add_filter(
        "keep_even",
        json!({"type": "bilingual", "command": "awk 'NR % 2 == 1'"}),
    );
    let pipeline = bench.write_pipeline(
        "corpus.de-en.filters.json",
        json!({
            "version": 1,
            "files": ["corpus.de-en.en.gz", "corpus.de-en.de.gz"],
            "filters": [{"filter": "keep_even", "parameters": {}, "language": null}]
        }),
    );
    let output = bench.clean(&[pipeline.to_str().unwrap()]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("en sentence 0\tde Satz 0\n"));
    assert!(!stdout.contains("en sentence 1\t"));
    assert_eq!(stdout.lines().count(), 5);
}

#[test]
fn test_monolingual_filter_transforms_one_column() {
    let bench = Workbench::new();
    bench.add_column(
        "corpus.de-en.en.gz",
        &["Hello".to_string(), "FOO".to_string(), "Baz".to_string()],
    );
    bench.add_column(
        "corpus.de-en.de.gz",
        &["World".to_string(), "bar".to_string(), "Qux".to_string()],
    );
    bench.add_filter(
        "lowercase",
        json!({"type": "monolingual", "command": "tr A-Z a-z"}),
    );
    let pipeline = bench.write_pipeline(
        "corpus.de-en.filters.json",
        json!({
            "version": 1,
            "files": ["corpus.de-en.en.gz", "corpus.de-en.de.gz"],
            "filters": [{"filter": "lowercase", "parameters": {}, "language": "en"}]
        }),
    );
    let output = bench.clean(&[pipeline.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "hello\tWorld\nfoo\tbar\nbaz\tQux\n"
    );
}

#[test]
fn test_overproducing_monolingual_filter_fails() {
    let bench = Workbench::new();
    bench.add_column("corpus.de-en.en.gz", &lines(3, |i| format!("en {i}")));
    bench.add_column("corpus.de-en.de.gz", &lines(3, |i| format!("de {i}")));
    bench.add_filter(
        "double",
        json!({"type": "monolingual", "command": "awk '{print; print}'"}),
    );
    let pipeline = bench.write_pipeline(
        "corpus.de-en.filters.json",
        json!({
            "version": 1,
            "files": ["corpus.de-en.en.gz", "corpus.de-en.de.gz"],
            "filters": [{"filter": "double", "parameters": {}, "language": "en"}]
        }),
    );
    let output = bench.clean(&[pipeline.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("more lines"),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_head_closing_early_is_not_a_failure() {
    let (bench, _) = two_column_bench(50_000);
    bench.add_filter(
        "first_10",
        json!({"type": "bilingual", "command": "head -n 10"}),
    );
    let pipeline = bench.write_pipeline(
        "corpus.de-en.filters.json",
        json!({
            "version": 1,
            "files": ["corpus.de-en.en.gz", "corpus.de-en.de.gz"],
            "filters": [{"filter": "first_10", "parameters": {}, "language": null}]
        }),
    );
    let output = bench.clean(&[pipeline.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout), expected_paste(10));
}

#[test]
fn test_parallel_preserves_order() {
    let (bench, _) = two_column_bench(10_000);
    bench.add_filter("identity", json!({"type": "bilingual", "command": "cat"}));
    let pipeline = bench.write_pipeline(
        "corpus.de-en.filters.json",
        json!({
            "version": 1,
            "files": ["corpus.de-en.en.gz", "corpus.de-en.de.gz"],
            "filters": [{"filter": "identity", "parameters": {}, "language": null}]
        }),
    );
    let output = bench.clean(&[
        "--parallel",
        "4",
        "--batch-size",
        "512",
        pipeline.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        expected_paste(10_000)
    );
}

#[test]
fn test_failing_filter_exits_1_in_both_modes() {
    let (bench, _) = two_column_bench(1_000);
    bench.add_filter(
        "fail",
        json!({
            "type": "bilingual",
            "command": "exit \"$EXITCODE\"",
            "parameters": {"EXITCODE": {"type": "int", "default": 1}}
        }),
    );
    let pipeline = bench.write_pipeline(
        "corpus.de-en.filters.json",
        json!({
            "version": 1,
            "files": ["corpus.de-en.en.gz", "corpus.de-en.de.gz"],
            "filters": [{"filter": "fail", "parameters": {"EXITCODE": 42}, "language": null}]
        }),
    );

    for args in [
        vec![pipeline.to_str().unwrap()],
        vec!["--parallel", "2", "--batch-size", "100", pipeline.to_str().unwrap()],
    ] {
        let output = bench.clean(&args);
        assert_eq!(output.status.code(), Some(1), "args: {args:?}");
        assert!(output.stdout.is_empty());
        assert!(
            String::from_utf8_lossy(&output.stderr).contains("42"),
            "stderr: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
}

#[test]
fn test_stdin_input_with_language_args() {
    let (bench, _) = two_column_bench(5);
    bench.add_filter(
        "lowercase",
        json!({"type": "monolingual", "command": "tr A-Z a-z"}),
    );
    let pipeline = bench.write_pipeline(
        "stdin.filters.json",
        json!({
            "version": 1,
            "files": ["corpus.de-en.en.gz", "corpus.de-en.de.gz"],
            "filters": [{"filter": "lowercase", "parameters": {}, "language": "de"}]
        }),
    );

    let mut child = Command::new(env!("CARGO_BIN_EXE_parclean"))
        .args(["--input", "-", pipeline.to_str().unwrap(), "en", "de"])
        .current_dir(bench.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"Hello\tWELT\nBye\tNEIN\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "Hello\twelt\nBye\tnein\n"
    );
}

#[test]
fn test_input_without_languages_is_a_usage_error() {
    let (bench, pipeline) = two_column_bench(5);
    let output = bench.clean(&["--input", "-", pipeline.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_unknown_filter_is_a_config_error() {
    let (bench, _) = two_column_bench(5);
    let pipeline = bench.write_pipeline(
        "corpus.de-en.filters.json",
        json!({
            "version": 1,
            "files": ["corpus.de-en.en.gz", "corpus.de-en.de.gz"],
            "filters": [{"filter": "does_not_exist", "parameters": {}, "language": null}]
        }),
    );
    let output = bench.clean(&[pipeline.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("does_not_exist"));
}

#[test]
fn test_wrong_version_is_a_config_error() {
    let (bench, _) = two_column_bench(5);
    let pipeline = bench.write_pipeline(
        "corpus.de-en.filters.json",
        json!({
            "version": 7,
            "files": ["corpus.de-en.en.gz", "corpus.de-en.de.gz"],
            "filters": []
        }),
    );
    let output = bench.clean(&[pipeline.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_first_caps_the_input() {
    let (bench, pipeline) = two_column_bench(1_000);
    let output = bench.clean(&["--first", "7", pipeline.to_str().unwrap()]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), expected_paste(7));
}

#[test]
fn test_output_flag_writes_a_file() {
    let (bench, pipeline) = two_column_bench(20);
    let out_path = bench.path().join("result.tsv");
    let output = bench.clean(&["--output", out_path.to_str().unwrap(), pipeline.to_str().unwrap()]);
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    assert_eq!(
        std::fs::read_to_string(&out_path).unwrap(),
        expected_paste(20)
    );
}

#[test]
fn test_tee_writes_intermediate_steps() {
    let bench = Workbench::new();
    bench.add_column("corpus.de-en.en.gz", &["Hello".to_string()]);
    bench.add_column("corpus.de-en.de.gz", &["Welt".to_string()]);
    bench.add_filter(
        "uppercase",
        json!({"type": "bilingual", "command": "tr a-z A-Z"}),
    );
    let pipeline = bench.write_pipeline(
        "corpus.de-en.filters.json",
        json!({
            "version": 1,
            "files": ["corpus.de-en.en.gz", "corpus.de-en.de.gz"],
            "filters": [{"filter": "uppercase", "parameters": {}, "language": null}]
        }),
    );
    let output = bench.clean(&["--tee", pipeline.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout), "HELLO\tWELT\n");

    // `tee` runs from the invocation directory, like any other step child.
    let step0 = bench.path().join("corpus.de-en.step-0.tsv");
    assert_eq!(std::fs::read_to_string(step0).unwrap(), "HELLO\tWELT\n");
}

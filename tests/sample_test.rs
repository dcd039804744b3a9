//! Tests for the `parclean-sample` binary.

use flate2::write::GzEncoder;
use std::io::Write;
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn run_sample(args: &[&str], stdin: Option<&str>) -> (String, i32) {
    let mut command = Command::new(env!("CARGO_BIN_EXE_parclean-sample"));
    command.args(args).stdout(Stdio::piped());
    command.stdin(match stdin {
        Some(_) => Stdio::piped(),
        None => Stdio::null(),
    });
    let mut child = command.spawn().unwrap();
    if let Some(input) = stdin {
        child
            .stdin
            .take()
            .unwrap()
            .write_all(input.as_bytes())
            .unwrap();
    }
    let output = child.wait_with_output().unwrap();
    (
        String::from_utf8_lossy(&output.stdout).into_owned(),
        output.status.code().unwrap_or(-1),
    )
}

#[test]
fn test_short_stdin_is_reproduced() {
    let input = "a\nb\nc\n";
    let (out, code) = run_sample(&["-n", "10"], Some(input));
    assert_eq!(out, input);
    assert_eq!(code, 0);
}

#[test]
fn test_sections_cover_head_middle_and_tail() {
    let input: String = (0..100).map(|i| format!("{i}\n")).collect();
    let (out, code) = run_sample(&["-n", "3", "--seed", "7"], Some(&input));
    assert_eq!(code, 0);

    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 9);
    assert_eq!(&lines[..3], &["0", "1", "2"]);
    assert_eq!(&lines[6..], &["97", "98", "99"]);
    // Middle values come from between head and tail, in input order.
    let middle: Vec<usize> = lines[3..6].iter().map(|l| l.parse().unwrap()).collect();
    assert!(middle.windows(2).all(|w| w[0] < w[1]));
    assert!(middle.iter().all(|v| (3..97).contains(v)));
}

#[test]
fn test_multiple_gzipped_files_become_columns() {
    let dir = TempDir::new().unwrap();
    for (name, prefix) in [("corpus.en.gz", "en"), ("corpus.de.gz", "de")] {
        let file = std::fs::File::create(dir.path().join(name)).unwrap();
        let mut encoder = GzEncoder::new(file, flate2::Compression::default());
        for i in 0..20 {
            writeln!(encoder, "{prefix} {i}").unwrap();
        }
        encoder.finish().unwrap();
    }

    let en = dir.path().join("corpus.en.gz");
    let de = dir.path().join("corpus.de.gz");
    let (out, code) = run_sample(
        &["-n", "2", en.to_str().unwrap(), de.to_str().unwrap()],
        None,
    );
    assert_eq!(code, 0);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], "en 0\tde 0");
    assert_eq!(lines[5], "en 19\tde 19");
}

#[test]
fn test_line_numbers_column() {
    let (out, code) = run_sample(&["-n", "2", "-N"], Some("x\ny\nz\n"));
    assert_eq!(code, 0);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines[0], "0\tx");
    assert_eq!(lines[1], "1\ty");
    assert_eq!(lines[2], "2\tz");
}

#[test]
fn test_custom_delimiter() {
    let dir = TempDir::new().unwrap();
    for name in ["a.txt", "b.txt"] {
        std::fs::write(dir.path().join(name), "1\n2\n").unwrap();
    }
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    let (out, code) = run_sample(
        &["-n", "5", "-d", " | ", a.to_str().unwrap(), b.to_str().unwrap()],
        None,
    );
    assert_eq!(code, 0);
    assert_eq!(out, "1 | 1\n2 | 2\n");
}

//! Column splicer: run a single-column filter against selected columns of a
//! TSV stream.
//!
//! The splicer extracts the requested columns of every record and feeds them
//! to a child process, while the remaining columns wait on a FIFO. As the
//! child answers, records are reassembled in order and written out. The child
//! must produce exactly one output line per input line; anything else is a
//! row-contract violation.

use crate::tsv::{read_record, split_fields};
use anyhow::{bail, Context};
use crossbeam_channel::{unbounded, Receiver, Sender};
use smallvec::SmallVec;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::process::{ChildStdin, ChildStdout, Command, Stdio};
use std::thread;

/// One parked record: the full field list with `None` holes where columns
/// were spliced out.
type Held = SmallVec<[Option<Vec<u8>>; 8]>;

pub struct Splicer {
    columns: Vec<usize>,
}

impl Splicer {
    pub fn new(columns: Vec<usize>) -> anyhow::Result<Self> {
        if columns.is_empty() {
            bail!("at least one column index is required");
        }
        let mut seen = columns.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != columns.len() {
            bail!("duplicate column index");
        }
        Ok(Self { columns })
    }

    /// Run `argv` over the spliced-out columns of `input`, writing reassembled
    /// records to `output`. Returns the child's exit code once it has been
    /// reaped; row-contract violations surface as errors instead.
    pub fn run<R, W>(&self, argv: &[String], input: R, output: W) -> anyhow::Result<i32>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        if argv.is_empty() {
            bail!("missing subcommand");
        }

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("cannot start subcommand: {}", argv[0]))?;

        let child_stdin = child.stdin.take().unwrap();
        let child_stdout = child.stdout.take().unwrap();

        let (tx, rx) = unbounded::<Option<Held>>();

        let columns = self.columns.clone();
        let feeder = thread::spawn(move || feed(&columns, input, child_stdin, &tx));

        let columns = self.columns.clone();
        let consumer = thread::spawn(move || merge(&columns, child_stdout, &rx, output));

        let feed_result = feeder
            .join()
            .unwrap_or_else(|_| Err(anyhow::anyhow!("feeder thread panicked")));
        let merge_result = consumer
            .join()
            .unwrap_or_else(|_| Err(anyhow::anyhow!("consumer thread panicked")));

        // Whatever happened above, reap the child before reporting.
        let status = child.wait().context("waiting for subcommand")?;

        merge_result?;
        feed_result?;

        Ok(exit_code(&status))
    }
}

/// Comma-separated list of 0-based column indexes, e.g. `0` or `0,2`.
impl std::str::FromStr for Splicer {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let columns = s
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<usize>()
                    .with_context(|| format!("invalid column index: {part:?}"))
            })
            .collect::<anyhow::Result<Vec<usize>>>()?;
        Self::new(columns)
    }
}

fn exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}

/// Feeder: splice the selected columns out of each input record into the
/// child's stdin, parking the rest on the FIFO.
fn feed<R: Read>(
    columns: &[usize],
    input: R,
    child_stdin: ChildStdin,
    tx: &Sender<Option<Held>>,
) -> anyhow::Result<()> {
    let result = feed_records(columns, input, child_stdin, tx);
    // End indicator, on success and on failure alike.
    let _ = tx.send(None);
    result
}

fn feed_records<R: Read>(
    columns: &[usize],
    input: R,
    child_stdin: ChildStdin,
    tx: &Sender<Option<Held>>,
) -> anyhow::Result<()> {
    let mut reader = BufReader::new(input);
    let mut writer = BufWriter::new(child_stdin);
    let mut record = Vec::new();
    let mut extracted = Vec::new();
    let mut lineno = 0u64;

    while read_record(&mut reader, &mut record)? {
        lineno += 1;
        let fields = split_fields(&record);

        // Validate before queueing, so a malformed record is never parked.
        for &col in columns {
            if col >= fields.len() {
                bail!(
                    "line {lineno}: record has {} fields, cannot splice out column {col}",
                    fields.len()
                );
            }
        }

        extracted.clear();
        for (i, &col) in columns.iter().enumerate() {
            if i > 0 {
                extracted.push(b'\t');
            }
            extracted.extend_from_slice(fields[col]);
        }
        extracted.push(b'\n');

        let mut held: Held = fields.iter().map(|f| Some(f.to_vec())).collect();
        for &col in columns {
            held[col] = None;
        }

        if tx.send(Some(held)).is_err() {
            // Consumer is gone; its error is the interesting one.
            break;
        }

        match writer.write_all(&extracted) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BrokenPipe => break,
            Err(e) => return Err(e).context("writing to subcommand"),
        }
    }

    match writer.flush() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(e).context("writing to subcommand"),
    }
}

/// Consumer: pop one parked record per child output line and reassemble it
/// with the child's fields back in their original positions.
fn merge<W: Write>(
    columns: &[usize],
    child_stdout: ChildStdout,
    rx: &Receiver<Option<Held>>,
    output: W,
) -> anyhow::Result<()> {
    let mut reader = BufReader::new(child_stdout);
    let mut writer = BufWriter::new(output);
    let mut line = Vec::new();
    let mut assembled = Vec::new();

    loop {
        if !read_record(&mut reader, &mut line)? {
            break;
        }

        let mut held = match rx.recv() {
            Ok(Some(held)) => held,
            // FIFO drained but the child keeps talking.
            Ok(None) | Err(_) => {
                bail!("subcommand produced more lines of output than it was given")
            }
        };

        let fields = split_fields(&line);
        if fields.len() != columns.len() {
            bail!(
                "subcommand returned {} fields for a record it was given {} of",
                fields.len(),
                columns.len()
            );
        }
        for (returned, &col) in fields.iter().zip(columns) {
            held[col] = Some(returned.to_vec());
        }

        assembled.clear();
        for (i, field) in held.iter().enumerate() {
            if i > 0 {
                assembled.push(b'\t');
            }
            assembled.extend_from_slice(field.as_deref().unwrap_or_default());
        }
        assembled.push(b'\n');

        match writer.write_all(&assembled) {
            Ok(()) => {}
            // Our reader hung up; stop without judging the child.
            Err(e) if e.kind() == ErrorKind::BrokenPipe => return Ok(()),
            Err(e) => return Err(e).context("writing output"),
        }
    }

    // Child closed its stdout; any record still parked means it under-produced.
    if let Ok(Some(_)) = rx.recv() {
        bail!("subcommand produced fewer lines than it was given");
    }

    match writer.flush() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(e).context("writing output"),
    }
}

//! Parallel runner: shard one input stream across N copies of the same
//! pipeline, preserving output order.
//!
//! One splitter thread cuts the input into fixed-size line batches stored in
//! tempfiles; W workers each run a fresh pipeline scope per batch; one merger
//! streams batch outputs in ascending batch index. The batch queue is bounded
//! at 2·W, which is what applies backpressure to the splitter.

use crate::pipeline::{Pipeline, PipelineScope};
use crate::stderr::LogSink;
use crate::tsv::read_record;
use ahash::AHashMap;
use anyhow::Context;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Copy)]
pub struct ParallelConfig {
    /// Number of worker pipelines.
    pub parallel: usize,
    /// Lines per batch.
    pub batch_size: usize,
}

/// Run `pipeline` over `input` with [`ParallelConfig::parallel`] workers.
///
/// Output bytes are exactly the concatenation of per-batch outputs in batch
/// order, making parallelisation semantically transparent. The first worker
/// failure is propagated once splitter, workers and merger have all drained;
/// every tempfile is gone by then, whatever the outcome.
pub fn run_parallel(
    pipeline: &Pipeline,
    input: Box<dyn BufRead + Send>,
    output: Box<dyn Write + Send>,
    config: ParallelConfig,
    log: &LogSink,
) -> anyhow::Result<()> {
    let workers = config.parallel.max(1);

    let (batch_tx, batch_rx) = bounded::<(usize, PathBuf)>(workers * 2);
    let (merge_tx, merge_rx) = unbounded::<(usize, PathBuf)>();
    let failed = Arc::new(AtomicBool::new(false));

    let splitter = {
        let log = log.clone();
        let failed = failed.clone();
        let batch_size = config.batch_size;
        thread::spawn(move || split_input(input, batch_size, &batch_tx, &failed, &log))
    };

    let worker_handles: Vec<_> = (0..workers)
        .map(|_| {
            let pipeline = pipeline.clone();
            let batch_rx = batch_rx.clone();
            let merge_tx = merge_tx.clone();
            let failed = failed.clone();
            let log = log.clone();
            thread::spawn(move || run_batches(&pipeline, &batch_rx, &merge_tx, &failed, &log))
        })
        .collect();

    // Only the workers hold senders to the merger and only they hold the
    // batch receiver; dropping ours makes channel disconnection meaningful.
    drop(batch_rx);
    drop(merge_tx);

    let merger = {
        let log = log.clone();
        thread::spawn(move || merge_output(&merge_rx, output, &log))
    };

    let split_result = splitter
        .join()
        .unwrap_or_else(|_| Err(anyhow::anyhow!("splitter thread panicked")));

    let mut worker_error: Option<anyhow::Error> = None;
    for handle in worker_handles {
        let result = handle
            .join()
            .unwrap_or_else(|_| Err(anyhow::anyhow!("worker thread panicked")));
        if let Err(e) = result {
            worker_error.get_or_insert(e);
        }
    }

    let merge_result = merger
        .join()
        .unwrap_or_else(|_| Err(anyhow::anyhow!("merger thread panicked")));

    if let Some(e) = worker_error {
        return Err(e);
    }
    split_result?;
    merge_result?;
    Ok(())
}

fn batch_file() -> anyhow::Result<(File, PathBuf)> {
    let file = tempfile::Builder::new()
        .prefix("parclean-batch-")
        .tempfile()
        .context("cannot create batch tempfile")?;
    file.keep().context("cannot keep batch tempfile")
}

/// Splitter: read the input stream and park consecutive runs of
/// `batch_size` lines in numbered tempfiles on the (bounded) batch queue.
fn split_input(
    input: Box<dyn BufRead + Send>,
    batch_size: usize,
    batch_tx: &Sender<(usize, PathBuf)>,
    failed: &AtomicBool,
    log: &LogSink,
) -> anyhow::Result<()> {
    let mut input = input;
    let mut record = Vec::new();
    let mut batch_index = 0usize;
    let mut more = true;

    while more {
        if failed.load(Ordering::Acquire) {
            // A worker already failed; everything written from here on would
            // be thrown away unprocessed.
            break;
        }

        let (file, path) = batch_file()?;
        let mut writer = BufWriter::new(file);
        let mut lines = 0usize;

        let write_result: anyhow::Result<()> = (|| {
            while lines < batch_size {
                if !read_record(&mut input, &mut record)? {
                    more = false;
                    break;
                }
                record.push(b'\n');
                writer.write_all(&record)?;
                lines += 1;
            }
            writer.flush()?;
            Ok(())
        })();

        if let Err(e) = write_result {
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }
        drop(writer);

        log.line(format!(
            "[parclean] Wrote {lines} lines to batch {batch_index}: {}",
            path.display()
        ));

        if lines > 0 {
            if batch_tx.send((batch_index, path.clone())).is_err() {
                // All workers are gone; their error is what matters.
                let _ = std::fs::remove_file(&path);
                break;
            }
        } else {
            // Empty trailing chunk when the input length is a multiple of
            // the batch size.
            let _ = std::fs::remove_file(&path);
        }

        batch_index += 1;
    }

    Ok(())
}

/// Worker: run one fresh pipeline scope per batch, writing the result to an
/// output tempfile handed to the merger. After a failure (its own or a
/// sibling's) a worker keeps draining the batch queue so the splitter never
/// blocks forever, deleting batches unprocessed.
fn run_batches(
    pipeline: &Pipeline,
    batch_rx: &Receiver<(usize, PathBuf)>,
    merge_tx: &Sender<(usize, PathBuf)>,
    failed: &AtomicBool,
    log: &LogSink,
) -> anyhow::Result<()> {
    let tmpdir = tempfile::TempDir::new().context("cannot create worker tempdir")?;
    let mut first_error: Option<anyhow::Error> = None;

    while let Ok((batch_index, input_path)) = batch_rx.recv() {
        if first_error.is_some() || failed.load(Ordering::Acquire) {
            let _ = std::fs::remove_file(&input_path);
            continue;
        }

        let result = run_one_batch(pipeline, &input_path, &tmpdir, log);
        let _ = std::fs::remove_file(&input_path);

        match result {
            Ok(output_path) => {
                log.line(format!(
                    "[parclean] Filtered batch {batch_index} to {}",
                    output_path.display()
                ));
                if merge_tx.send((batch_index, output_path.clone())).is_err() {
                    let _ = std::fs::remove_file(&output_path);
                    break;
                }
            }
            Err(e) => {
                failed.store(true, Ordering::Release);
                first_error = Some(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn run_one_batch(
    pipeline: &Pipeline,
    input_path: &std::path::Path,
    tmpdir: &tempfile::TempDir,
    log: &LogSink,
) -> anyhow::Result<PathBuf> {
    let input = File::open(input_path).context("cannot reopen batch file")?;
    let (output_file, output_path) = batch_file()?;

    let result: anyhow::Result<()> = (|| {
        if pipeline.is_empty() {
            let mut reader = io::BufReader::new(input);
            let mut writer = BufWriter::new(output_file);
            io::copy(&mut reader, &mut writer)?;
            writer.flush()?;
            return Ok(());
        }

        let mut pool = PipelineScope::new(log.clone())
            .with_env("TMPDIR", &tmpdir.path().to_string_lossy());
        pipeline.run(
            &mut pool,
            Stdio::from(input),
            Stdio::from(output_file),
            None,
        )?;
        pool.finish()
    })();

    match result {
        Ok(()) => Ok(output_path),
        Err(e) => {
            let _ = std::fs::remove_file(&output_path);
            Err(e)
        }
    }
}

/// Merger: stream batch outputs to `output` in ascending batch order,
/// holding out-of-order arrivals aside until their turn comes.
fn merge_output(
    merge_rx: &Receiver<(usize, PathBuf)>,
    output: Box<dyn Write + Send>,
    log: &LogSink,
) -> anyhow::Result<()> {
    let mut output = BufWriter::new(output);
    let mut pending: AHashMap<usize, PathBuf> = AHashMap::new();
    let mut next_index = 0usize;
    let mut result: anyhow::Result<()> = Ok(());

    while let Ok((batch_index, path)) = merge_rx.recv() {
        pending.insert(batch_index, path);

        while let Some(path) = pending.remove(&next_index) {
            if result.is_ok() {
                log.line(format!("[parclean] Merging {} into output", path.display()));
                result = (|| {
                    let mut file = File::open(&path)?;
                    io::copy(&mut file, &mut output)?;
                    Ok(())
                })();
            }
            let _ = std::fs::remove_file(&path);
            next_index += 1;
        }
    }

    // A failed batch never arrives; whatever queued up behind it is dropped.
    for (_, path) in pending.drain() {
        let _ = std::fs::remove_file(&path);
    }

    if result.is_ok() {
        output.flush()?;
    }
    result
}

//! The clean command: paste the dataset columns together, feed them through
//! the filter pipeline, and write the surviving rows.

use crate::dataset::{copy_records, open_reader, open_reader_or_stdin, paste_columns, tee_basename};
use crate::filters::{self, load_filters, ConfigError};
use crate::parallel::{run_parallel, ParallelConfig};
use crate::pipeline::{Pipeline, PipelineFile, PipelineScope};
use crate::progress::{byte_progress_bar, ProgressReader};
use crate::stderr::{LogSink, StderrSink};
use std::fs::File;
use std::io::{self, BufReader, ErrorKind, PipeReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::thread::JoinHandle;

use super::Cli;

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let pipeline_path = cli
        .pipeline
        .clone()
        .ok_or_else(|| ConfigError::Usage("a pipeline document is required".to_string()))?;

    if cli.input.is_some() && cli.languages.is_empty() {
        return Err(ConfigError::Usage(
            "when --input is used, each column's LANG has to be specified as well".to_string(),
        )
        .into());
    }
    if cli.tee && cli.parallel > 1 {
        return Err(
            ConfigError::Usage("--tee cannot be combined with --parallel".to_string()).into(),
        );
    }

    // Dataset files resolve relative to the pipeline document by default,
    // which is where the workbench stores them.
    let basedir = cli.basedir.clone().unwrap_or_else(|| {
        pipeline_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf()
    });

    let mut document = PipelineFile::load(&pipeline_path)
        .map_err(|e| ConfigError::Usage(format!("{e:#}")))?;

    let sink = StderrSink::to_stderr();
    let log = sink.sink();

    let (registry, warnings) = load_filters(&filter_patterns(&cli.filters));
    for warning in warnings {
        log.line(format!("[parclean] warning: {warning}"));
    }
    filters::set_active(registry);
    let registry = filters::active();

    for warning in document.validate(&registry)? {
        log.line(format!("[parclean] warning: {warning}"));
    }

    let languages = if cli.input.is_some() {
        cli.languages.clone()
    } else {
        document.languages()?
    };

    let pipeline = Pipeline::build(
        &registry,
        &languages,
        &document.filters,
        &sibling_argv("parclean-col"),
    )?;

    let tee = cli.tee.then(|| {
        if cli.input.is_some() {
            "stdin".to_string()
        } else {
            tee_basename(&document.files)
        }
    });

    let (reader, feeder) = spawn_input_feeder(&cli, &document, &basedir)?;

    let result = if cli.parallel > 1 {
        let output: Box<dyn Write + Send> = match &cli.output {
            Some(path) => Box::new(File::create(path)?),
            None => Box::new(io::stdout()),
        };
        run_parallel(
            &pipeline,
            Box::new(BufReader::new(reader)),
            output,
            ParallelConfig {
                parallel: cli.parallel,
                batch_size: cli.batch_size,
            },
            &log,
        )
    } else {
        run_single(&pipeline, reader, cli.output.as_deref(), tee.as_deref(), &log)
    };

    let feed_result = feeder
        .join()
        .unwrap_or_else(|_| Err(anyhow::anyhow!("input feeder thread panicked")));

    result?;
    feed_result?;
    Ok(())
}

fn run_single(
    pipeline: &Pipeline,
    reader: PipeReader,
    output: Option<&Path>,
    tee: Option<&str>,
    log: &LogSink,
) -> anyhow::Result<()> {
    if pipeline.is_empty() {
        // No filters: the pasted columns are the result.
        let mut reader = BufReader::new(reader);
        match output {
            Some(path) => {
                let mut file = File::create(path)?;
                io::copy(&mut reader, &mut file)?;
            }
            None => {
                io::copy(&mut reader, &mut io::stdout().lock())?;
            }
        }
        return Ok(());
    }

    let stdout = match output {
        Some(path) => Stdio::from(File::create(path)?),
        None => Stdio::inherit(),
    };

    let mut pool = PipelineScope::new(log.clone());
    pipeline.run(&mut pool, Stdio::from(reader), stdout, tee)?;
    pool.finish()
}

/// Feed the TSV stream into a pipe on a separate thread: either a ready-made
/// `--input` stream, or the pasted dataset columns. Applies `--first` and
/// drives the progress bar.
fn spawn_input_feeder(
    cli: &Cli,
    document: &PipelineFile,
    basedir: &Path,
) -> anyhow::Result<(PipeReader, JoinHandle<anyhow::Result<u64>>)> {
    let first = cli.first.filter(|n| *n > 0);

    let bar = if cli.progress {
        let mut total = 0u64;
        match &cli.input {
            Some(input) if input != "-" => {
                total = std::fs::metadata(input).map_or(0, |m| m.len());
            }
            Some(_) => {}
            None => {
                for file in &document.files {
                    total += std::fs::metadata(basedir.join(file)).map_or(0, |m| m.len());
                }
            }
        }
        Some(byte_progress_bar(total))
    } else {
        None
    };

    let wrap = |reader: Box<dyn Read + Send>| -> Box<dyn Read + Send> {
        match &bar {
            Some(bar) => {
                let bar = bar.clone();
                Box::new(ProgressReader::new(reader, move |n| bar.inc(n)))
            }
            None => reader,
        }
    };

    let (pipe_reader, mut pipe_writer) = io::pipe()?;

    let handle = if let Some(input) = &cli.input {
        let reader = wrap(open_reader_or_stdin(input)?);
        std::thread::spawn(move || {
            ignore_broken_pipe(copy_records(reader, first, &mut pipe_writer))
        })
    } else {
        let mut readers = Vec::with_capacity(document.files.len());
        for file in &document.files {
            readers.push(wrap(open_reader(&basedir.join(file))?));
        }
        std::thread::spawn(move || ignore_broken_pipe(paste_columns(readers, first, &mut pipe_writer)))
    };

    let handle = {
        let bar = bar.clone();
        let inner = handle;
        std::thread::spawn(move || {
            let result = inner
                .join()
                .unwrap_or_else(|_| Err(anyhow::anyhow!("input feeder thread panicked")));
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
            result
        })
    };

    Ok((pipe_reader, handle))
}

/// Downstream closing early (e.g. `head`) is a normal way for the feed to
/// end, not an error.
fn ignore_broken_pipe(result: anyhow::Result<u64>) -> anyhow::Result<u64> {
    match result {
        Err(e)
            if e.chain().any(|cause| {
                cause
                    .downcast_ref::<io::Error>()
                    .is_some_and(|io| io.kind() == ErrorKind::BrokenPipe)
            }) =>
        {
            Ok(0)
        }
        other => other,
    }
}

/// Expand `--filters` into descriptor globs: a directory becomes
/// `DIR/*.json`, anything with a wildcard is taken as-is. Several paths can
/// be joined with `:`.
fn filter_patterns(paths: &str) -> Vec<String> {
    paths
        .split(':')
        .filter(|part| !part.is_empty())
        .map(|part| {
            if part.contains('*') {
                part.to_string()
            } else {
                format!("{}/*.json", part.trim_end_matches('/'))
            }
        })
        .collect()
}

/// Invocation for a helper binary installed next to the running one, with a
/// PATH fallback for odd layouts.
pub fn sibling_argv(name: &str) -> Vec<String> {
    let sibling = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(name)));
    match sibling {
        Some(path) if path.exists() => vec![path.to_string_lossy().into_owned()],
        _ => vec![name.to_string()],
    }
}

//! Incremental sample cache for the interactive preview.
//!
//! For each dataset the cache holds a contiguous list of entries, one per
//! pipeline position (0 = the raw sample). Every entry is keyed by a chained
//! fingerprint covering everything that could change its output: the source
//! files for entry 0, and for entry i the previous fingerprint plus the step
//! and filter definition. Editing the tail of a pipeline therefore only ever
//! recomputes the affected suffix.
//!
//! Entry computations run on background threads behind [`Work`] handles.
//! Waiting on a work is shielded by construction: a waiter that goes away
//! simply stops listening, the computation keeps running and stays cached.
//! Only suffix invalidation cancels work, which terminates the running child.

use crate::dataset::sample_path;
use crate::filters::command::synthesize;
use crate::filters::{FilterDefinition, FilterRegistry, FilterStep};
use crate::pipeline::CommandSpec;
use ahash::AHashMap;
use anyhow::Context;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

pub type Fingerprint = [u8; 32];

/// Output of one pipeline position over the sample.
#[derive(Debug)]
pub struct FilterOutput {
    /// Column language codes, in order.
    pub columns: Vec<String>,
    pub returncode: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

pub type WorkResult = Arc<anyhow::Result<FilterOutput>>;

/// A computation running on a background thread.
///
/// `wait` blocks until the result is in; it never cancels anything. Explicit
/// `cancel` sets a token the computation polls, terminating its child.
pub struct Work {
    state: Mutex<Option<WorkResult>>,
    done: Condvar,
    cancel: AtomicBool,
}

impl Work {
    fn spawn<F>(f: F) -> Arc<Work>
    where
        F: FnOnce(&AtomicBool) -> anyhow::Result<FilterOutput> + Send + 'static,
    {
        let work = Arc::new(Work {
            state: Mutex::new(None),
            done: Condvar::new(),
            cancel: AtomicBool::new(false),
        });
        let handle = work.clone();
        std::thread::spawn(move || {
            let result = f(&handle.cancel);
            let mut state = handle.state.lock().unwrap();
            *state = Some(Arc::new(result));
            handle.done.notify_all();
        });
        work
    }

    /// Block until the computation finishes and return its (shared) result.
    pub fn wait(&self) -> WorkResult {
        let mut state = self.state.lock().unwrap();
        while state.is_none() {
            state = self.done.wait(state).unwrap();
        }
        state.as_ref().unwrap().clone()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}

struct CacheEntry {
    fingerprint: Fingerprint,
    work: Arc<Work>,
}

/// Process-wide sample cache, keyed by dataset name.
pub struct SampleCache {
    entries: Mutex<AHashMap<String, Vec<CacheEntry>>>,
    registry: Arc<FilterRegistry>,
    col_argv: Vec<String>,
    sampler_argv: Vec<String>,
    sample_size: usize,
}

impl SampleCache {
    pub fn new(
        registry: Arc<FilterRegistry>,
        col_argv: Vec<String>,
        sampler_argv: Vec<String>,
        sample_size: usize,
    ) -> Self {
        Self {
            entries: Mutex::new(AHashMap::new()),
            registry,
            col_argv,
            sampler_argv,
            sample_size,
        }
    }

    /// Lazy sequence of per-step outputs for `dataset` filtered by `steps`:
    /// first the raw sample, then one item per step. Cache entries whose
    /// fingerprint still matches are reused as-is (the very same [`Work`]);
    /// a mismatch cancels and recomputes everything from that position on.
    pub fn get_sample<'a>(
        &'a self,
        dataset: &str,
        columns: &[(String, PathBuf)],
        steps: &[FilterStep],
    ) -> SampleIterator<'a> {
        SampleIterator {
            cache: self,
            dataset: dataset.to_string(),
            columns: columns.to_vec(),
            langs: columns.iter().map(|(lang, _)| lang.clone()).collect(),
            steps: steps.to_vec(),
            index: 0,
            prev_fingerprint: [0; 32],
            prev_work: None,
            stopped: false,
        }
    }

    /// Drop (and cancel) all cached state for a dataset.
    pub fn invalidate(&self, dataset: &str) {
        let mut map = self.entries.lock().unwrap();
        if let Some(entries) = map.remove(dataset) {
            for entry in &entries {
                entry.work.cancel();
            }
        }
    }

    fn entry_0(&self, dataset: &str, fingerprint: Fingerprint, columns: &[(String, PathBuf)]) -> Arc<Work> {
        let mut map = self.entries.lock().unwrap();
        let entries = map.entry(dataset.to_string()).or_default();

        if entries.first().map(|e| e.fingerprint) != Some(fingerprint) {
            for entry in entries.drain(..) {
                entry.work.cancel();
            }
            let work = self.spawn_sampler(dataset, columns);
            entries.push(CacheEntry { fingerprint, work });
        }

        entries[0].work.clone()
    }

    fn entry_at(
        &self,
        dataset: &str,
        index: usize,
        fingerprint: Fingerprint,
        step: &FilterStep,
        definition: &Arc<FilterDefinition>,
        prev: &Arc<Work>,
        langs: &[String],
    ) -> Arc<Work> {
        let mut map = self.entries.lock().unwrap();
        let entries = map.entry(dataset.to_string()).or_default();

        if entries.len() <= index || entries[index].fingerprint != fingerprint {
            // Everything downstream of this position is invalid too.
            for entry in entries.drain(index..) {
                entry.work.cancel();
            }
            let work = self.spawn_step(step, definition, prev, langs);
            entries.push(CacheEntry { fingerprint, work });
        }

        entries[index].work.clone()
    }

    fn truncate(&self, dataset: &str, keep: usize) {
        let mut map = self.entries.lock().unwrap();
        if let Some(entries) = map.get_mut(dataset) {
            for entry in entries.drain(keep.min(entries.len())..) {
                entry.work.cancel();
            }
        }
    }

    /// Schedule the external sampler for a dataset, reusing the on-disk
    /// `.sample.NAME.LANGS` artefact when it is newer than every source file.
    fn spawn_sampler(&self, dataset: &str, columns: &[(String, PathBuf)]) -> Arc<Work> {
        let dataset = dataset.to_string();
        let columns = columns.to_vec();
        let langs: Vec<String> = columns.iter().map(|(lang, _)| lang.clone()).collect();
        let sampler_argv = self.sampler_argv.clone();
        let sample_size = self.sample_size;

        Work::spawn(move |cancel| {
            let dir = columns
                .first()
                .and_then(|(_, path)| path.parent())
                .unwrap_or_else(|| Path::new("."))
                .to_path_buf();
            let artefact = sample_path(&dir, &dataset, &langs);

            if artefact_is_fresh(&artefact, &columns)? {
                let stdout = std::fs::read(&artefact)
                    .with_context(|| format!("cannot read sample: {}", artefact.display()))?;
                return Ok(FilterOutput {
                    columns: langs,
                    returncode: 0,
                    stdout,
                    stderr: Vec::new(),
                });
            }

            let mut argv = sampler_argv;
            argv.push("-n".to_string());
            argv.push(sample_size.to_string());
            for (_, path) in &columns {
                argv.push(path.to_string_lossy().into_owned());
            }

            let (returncode, stdout, stderr) =
                run_capture(&CommandSpec::Argv(argv), None, None, cancel)?;

            if returncode == 0 {
                std::fs::write(&artefact, &stdout)
                    .with_context(|| format!("cannot write sample: {}", artefact.display()))?;
            }

            Ok(FilterOutput {
                columns: langs,
                returncode,
                stdout,
                stderr,
            })
        })
    }

    /// Schedule one filter step over the previous entry's stdout.
    fn spawn_step(
        &self,
        step: &FilterStep,
        definition: &Arc<FilterDefinition>,
        prev: &Arc<Work>,
        langs: &[String],
    ) -> Arc<Work> {
        let step = step.clone();
        let definition = definition.clone();
        let prev = prev.clone();
        let langs = langs.to_vec();
        let col_argv = self.col_argv.clone();

        Work::spawn(move |cancel| {
            let input = match prev.wait().as_ref() {
                Ok(output) => output.stdout.clone(),
                Err(e) => anyhow::bail!("previous step failed: {e}"),
            };
            if cancel.load(Ordering::Acquire) {
                anyhow::bail!("cancelled");
            }

            let command = synthesize(&definition, &step, &langs, &col_argv)?;
            let (returncode, stdout, stderr) = run_capture(
                &CommandSpec::Shell(command),
                Some(&definition.basedir),
                Some(input),
                cancel,
            )?;

            Ok(FilterOutput {
                columns: langs,
                returncode,
                stdout,
                stderr,
            })
        })
    }
}

/// Lazy sequence of cached per-step outputs; see [`SampleCache::get_sample`].
pub struct SampleIterator<'a> {
    cache: &'a SampleCache,
    dataset: String,
    columns: Vec<(String, PathBuf)>,
    langs: Vec<String>,
    steps: Vec<FilterStep>,
    index: usize,
    prev_fingerprint: Fingerprint,
    prev_work: Option<Arc<Work>>,
    stopped: bool,
}

impl Iterator for SampleIterator<'_> {
    type Item = WorkResult;

    fn next(&mut self) -> Option<WorkResult> {
        if self.stopped {
            return None;
        }
        let index = self.index;

        if index > self.steps.len() {
            // Steps were removed since the last query; drop the stale tail.
            self.cache.truncate(&self.dataset, self.steps.len() + 1);
            self.stopped = true;
            return None;
        }
        self.index += 1;

        let (fingerprint, work) = if index == 0 {
            let fingerprint = match fingerprint_columns(&self.columns) {
                Ok(fp) => fp,
                Err(e) => {
                    self.stopped = true;
                    return Some(Arc::new(Err(e)));
                }
            };
            let work = self.cache.entry_0(&self.dataset, fingerprint, &self.columns);
            (fingerprint, work)
        } else {
            let step = &self.steps[index - 1];
            let definition = match self.cache.registry.get(&step.filter) {
                Ok(definition) => definition,
                Err(e) => {
                    self.stopped = true;
                    return Some(Arc::new(Err(e.into())));
                }
            };
            let fingerprint = match fingerprint_step(&self.prev_fingerprint, step, &definition) {
                Ok(fp) => fp,
                Err(e) => {
                    self.stopped = true;
                    return Some(Arc::new(Err(e)));
                }
            };
            let prev = self.prev_work.as_ref().unwrap();
            let work = self.cache.entry_at(
                &self.dataset,
                index,
                fingerprint,
                step,
                &definition,
                prev,
                &self.langs,
            );
            (fingerprint, work)
        };

        self.prev_fingerprint = fingerprint;
        self.prev_work = Some(work.clone());

        let result = work.wait();
        if result.is_err() {
            self.stopped = true;
        }
        Some(result)
    }
}

/// Fingerprint of the dataset source files: the ordered list of
/// `(language, path, mtime_ns)`.
pub fn fingerprint_columns(columns: &[(String, PathBuf)]) -> anyhow::Result<Fingerprint> {
    let mut descriptor: Vec<(String, String, u64)> = Vec::with_capacity(columns.len());
    for (lang, path) in columns {
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("cannot stat {}", path.display()))?;
        let mtime_ns = metadata
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        descriptor.push((lang.clone(), path.to_string_lossy().into_owned(), mtime_ns));
    }
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&descriptor)?);
    Ok(hasher.finalize().into())
}

/// Chained fingerprint of a step: previous fingerprint, the step's own
/// descriptor, and the filter definition it refers to.
pub fn fingerprint_step(
    prev: &Fingerprint,
    step: &FilterStep,
    definition: &FilterDefinition,
) -> anyhow::Result<Fingerprint> {
    let step_digest: Fingerprint = {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(step)?);
        hasher.finalize().into()
    };
    let definition_digest: Fingerprint = {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(definition)?);
        hasher.finalize().into()
    };
    let mut hasher = Sha256::new();
    hasher.update(prev);
    hasher.update(step_digest);
    hasher.update(definition_digest);
    Ok(hasher.finalize().into())
}

pub fn fingerprint_hex(fingerprint: &Fingerprint) -> String {
    hex::encode(fingerprint)
}

fn artefact_is_fresh(artefact: &Path, columns: &[(String, PathBuf)]) -> anyhow::Result<bool> {
    let Ok(metadata) = std::fs::metadata(artefact) else {
        return Ok(false);
    };
    let artefact_mtime = metadata.modified()?;
    for (_, path) in columns {
        let source_mtime = std::fs::metadata(path)
            .with_context(|| format!("cannot stat {}", path.display()))?
            .modified()?;
        if source_mtime > artefact_mtime {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Run a command to completion, capturing stdout and stderr, feeding it
/// `input` when given. Polls `cancel` and soft-terminates the child when it
/// flips; the child is reaped on every path.
fn run_capture(
    command: &CommandSpec,
    cwd: Option<&Path>,
    input: Option<Vec<u8>>,
    cancel: &AtomicBool,
) -> anyhow::Result<(i32, Vec<u8>, Vec<u8>)> {
    if cancel.load(Ordering::Acquire) {
        anyhow::bail!("cancelled");
    }

    let mut cmd = match command {
        CommandSpec::Shell(line) => {
            let mut cmd = Command::new("/bin/sh");
            cmd.arg("-c").arg(line);
            cmd
        }
        CommandSpec::Argv(argv) => {
            let program = argv.first().context("empty argv")?;
            let mut cmd = Command::new(program);
            cmd.args(&argv[1..]);
            cmd
        }
    };
    cmd.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd.spawn().context("cannot start filter command")?;
    let pid = child.id();

    let feeder = input.map(|bytes| {
        let mut stdin = child.stdin.take().unwrap();
        std::thread::spawn(move || {
            // A broken pipe just means the filter stopped reading early.
            let _ = stdin.write_all(&bytes);
        })
    });

    let mut stdout_pipe = child.stdout.take().unwrap();
    let stdout_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf);
        buf
    });
    let mut stderr_pipe = child.stderr.take().unwrap();
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf);
        buf
    });

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if cancel.load(Ordering::Acquire) {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            break child.wait()?;
        }
        std::thread::sleep(Duration::from_millis(25));
    };

    if let Some(feeder) = feeder {
        let _ = feeder.join();
    }
    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    if cancel.load(Ordering::Acquire) {
        anyhow::bail!("cancelled");
    }

    Ok((crate::pipeline::scope::exit_code(&status), stdout, stderr))
}

//! Scoped ownership of a chain of sibling child processes.
//!
//! Every child spawned through a [`PipelineScope`] gets a babysitter thread
//! that pumps its stderr (prefixed) into the shared sink, waits for it, and
//! reports the exit on a control channel. Leaving the scope — via
//! [`PipelineScope::finish`], [`PipelineScope::abort`] or plain drop — always
//! reaps every child.

use crate::stderr::LogSink;
use crate::tsv::read_record;
use anyhow::Context;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::io::BufReader;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// How many trailing stderr lines of a failing child are kept for the error
/// report.
const STDERR_TAIL_LINES: usize = 20;

/// A child exited with a status that is neither success nor broken-pipe.
#[derive(Debug)]
pub struct PipelineFailed {
    pub step: usize,
    pub name: String,
    pub returncode: i32,
    pub stderr_tail: Vec<String>,
}

impl std::fmt::Display for PipelineFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "child {} ({}) exited with status {}",
            self.step + 1,
            self.name,
            self.returncode
        )?;
        if !self.stderr_tail.is_empty() {
            write!(f, "; last stderr output:")?;
            for line in &self.stderr_tail {
                write!(f, "\n  {}", line.trim_end())?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for PipelineFailed {}

/// How to invoke a child: through `sh -c`, or directly.
#[derive(Debug, Clone)]
pub enum CommandSpec {
    Shell(String),
    Argv(Vec<String>),
}

/// Pipes handed back from [`PipelineScope::start`]. Dropping them is how the
/// caller closes its reference so only the two pipe endpoints remain.
pub struct StartedChild {
    pub index: usize,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
}

struct CtrlMsg {
    index: usize,
    ok: bool,
    returncode: i32,
    stderr_tail: Vec<String>,
}

struct ChildSlot {
    name: String,
    pid: u32,
    reaped: Arc<AtomicBool>,
    babysitter: Option<JoinHandle<()>>,
}

pub struct PipelineScope {
    log: LogSink,
    env: Vec<(String, String)>,
    ctrl_tx: Sender<CtrlMsg>,
    ctrl_rx: Receiver<CtrlMsg>,
    children: Vec<ChildSlot>,
    done: bool,
}

impl PipelineScope {
    pub fn new(log: LogSink) -> Self {
        let (ctrl_tx, ctrl_rx) = unbounded();
        Self {
            log,
            env: Vec::new(),
            ctrl_tx,
            ctrl_rx,
            children: Vec::new(),
            done: false,
        }
    }

    /// Add an environment overlay applied to every child started afterwards.
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn log(&self) -> &LogSink {
        &self.log
    }

    /// Spawn a child with the given redirections. Its stderr is always piped
    /// to the babysitter.
    pub fn start(
        &mut self,
        name: &str,
        command: &CommandSpec,
        stdin: Stdio,
        stdout: Stdio,
        cwd: Option<&Path>,
    ) -> anyhow::Result<StartedChild> {
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
        cmd.stdin(stdin).stdout(stdout).stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("cannot start {name}"))?;

        let index = self.children.len();
        let stdin_pipe = child.stdin.take();
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take().unwrap();
        let pid = child.id();
        let reaped = Arc::new(AtomicBool::new(false));

        let babysitter = {
            let name = name.to_string();
            let log = self.log.clone();
            let ctrl_tx = self.ctrl_tx.clone();
            let reaped = reaped.clone();
            std::thread::spawn(move || babysit(index, name, child, stderr_pipe, reaped, log, ctrl_tx))
        };

        self.children.push(ChildSlot {
            name: name.to_string(),
            pid,
            reaped,
            babysitter: Some(babysitter),
        });

        Ok(StartedChild {
            index,
            stdin: stdin_pipe,
            stdout: stdout_pipe,
        })
    }

    /// Clean scope exit: wait for every child, then report the first
    /// non-success exit (broken-pipe counts as success) as
    /// [`PipelineFailed`].
    pub fn finish(mut self) -> anyhow::Result<()> {
        match self.shutdown(false) {
            Some(failure) => Err(failure.into()),
            None => Ok(()),
        }
    }

    /// Abort path: terminate every living child, then wait for all of them.
    pub fn abort(mut self) {
        self.shutdown(true);
    }

    fn shutdown(&mut self, terminate: bool) -> Option<PipelineFailed> {
        if self.done {
            return None;
        }
        self.done = true;

        if terminate {
            for slot in &self.children {
                if !slot.reaped.load(Ordering::Acquire) {
                    // Soft terminate; the pipe cascade finishes the job.
                    unsafe {
                        libc::kill(slot.pid as libc::pid_t, libc::SIGTERM);
                    }
                }
            }
        }

        // One control message per child. The first failure wins; later ones
        // are recorded by their babysitters on the sink but do not overwrite
        // the primary error. Children downstream of a failure see their input
        // close and exit on their own.
        let mut failure: Option<PipelineFailed> = None;
        for _ in 0..self.children.len() {
            let Ok(msg) = self.ctrl_rx.recv() else { break };
            if !msg.ok && failure.is_none() {
                failure = Some(PipelineFailed {
                    step: msg.index,
                    name: self.children[msg.index].name.clone(),
                    returncode: msg.returncode,
                    stderr_tail: msg.stderr_tail,
                });
            }
        }

        for slot in &mut self.children {
            if let Some(handle) = slot.babysitter.take() {
                let _ = handle.join();
            }
        }

        failure
    }
}

impl Drop for PipelineScope {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

fn babysit(
    index: usize,
    name: String,
    mut child: Child,
    stderr: ChildStderr,
    reaped: Arc<AtomicBool>,
    log: LogSink,
    ctrl_tx: Sender<CtrlMsg>,
) {
    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();

    while matches!(read_record(&mut reader, &mut line), Ok(true)) {
        log.prefixed(&name, &line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(String::from_utf8_lossy(&line).into_owned());
    }

    let status = child.wait();
    reaped.store(true, Ordering::Release);

    let (ok, returncode) = match &status {
        Ok(status) => (exit_ok(status), exit_code(status)),
        Err(_) => (false, -1),
    };

    log.line(format!(
        "[parclean] {name} exited with status code {returncode}"
    ));

    let _ = ctrl_tx.send(CtrlMsg {
        index,
        ok,
        returncode,
        stderr_tail: tail.into(),
    });
}

/// Success, or the broken-pipe pseudo-success of a stage whose reader went
/// away first (`head -n 10` closing its input is not an error).
fn exit_ok(status: &ExitStatus) -> bool {
    if status.success() {
        return true;
    }
    status.signal() == Some(libc::SIGPIPE) || status.code() == Some(128 + libc::SIGPIPE)
}

pub(crate) fn exit_code(status: &ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}

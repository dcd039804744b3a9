//! Serialised stderr sink.
//!
//! Every child process in a pipeline scope gets its stderr pumped through one
//! channel into a single writer thread, so lines from siblings never
//! interleave mid-line. The sink flushes after each line to keep child
//! diagnostics immediate.

use crossbeam_channel::{unbounded, Sender};
use std::io::Write;
use std::thread::JoinHandle;

/// Cloneable handle for submitting lines to the sink.
#[derive(Clone)]
pub struct LogSink {
    tx: Sender<Vec<u8>>,
}

impl LogSink {
    /// Write one line (a newline is appended if missing).
    pub fn line(&self, text: impl AsRef<[u8]>) {
        let text = text.as_ref();
        let mut buf = Vec::with_capacity(text.len() + 1);
        buf.extend_from_slice(text);
        if buf.last() != Some(&b'\n') {
            buf.push(b'\n');
        }
        // A send error means the sink is gone; nothing useful left to do.
        let _ = self.tx.send(buf);
    }

    /// Write one line prefixed by `[name] `.
    pub fn prefixed(&self, name: &str, line: &[u8]) {
        let mut buf = Vec::with_capacity(name.len() + line.len() + 4);
        buf.extend_from_slice(b"[");
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b"] ");
        buf.extend_from_slice(line);
        if buf.last() != Some(&b'\n') {
            buf.push(b'\n');
        }
        let _ = self.tx.send(buf);
    }
}

/// Owns the writer thread. Dropping the sink (after all `LogSink` clones are
/// gone) drains remaining lines and joins the thread.
pub struct StderrSink {
    tx: Option<Sender<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

impl StderrSink {
    /// Sink writing to the process stderr.
    pub fn to_stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    pub fn new(mut writer: Box<dyn Write + Send>) -> Self {
        let (tx, rx) = unbounded::<Vec<u8>>();
        let handle = std::thread::spawn(move || {
            for line in rx {
                if writer.write_all(&line).is_err() {
                    break;
                }
                // One flush per line keeps output usable for debugging
                // long-running children.
                let _ = writer.flush();
            }
        });
        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn sink(&self) -> LogSink {
        LogSink {
            tx: self.tx.as_ref().cloned().unwrap(),
        }
    }
}

impl Drop for StderrSink {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

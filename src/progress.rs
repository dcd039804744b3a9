//! Byte-based progress tracking for streamed input.

use indicatif::{ProgressBar, ProgressStyle};
use std::io::Read;

/// A reader wrapper that reports how many bytes passed through it.
///
/// The callback receives the number of bytes of each successful read, which
/// lets several readers feed one shared progress bar.
pub struct ProgressReader<R: Read> {
    reader: R,
    callback: Box<dyn Fn(u64) + Send>,
}

impl<R: Read> ProgressReader<R> {
    pub fn new<F>(reader: R, callback: F) -> Self
    where
        F: Fn(u64) + Send + 'static,
    {
        Self {
            reader,
            callback: Box::new(callback),
        }
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.reader.read(buf)?;
        (self.callback)(n as u64);
        Ok(n)
    }
}

/// Progress bar over a known number of input bytes, rendered to stderr.
pub fn byte_progress_bar(total_bytes: u64) -> ProgressBar {
    let bar = ProgressBar::new(total_bytes);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
        )
        .unwrap()
        .progress_chars("#>-"),
    );
    bar
}

//! Dataset file handling: compressed column files, language codes, and the
//! column-wise paste that turns per-language files into one TSV stream.
//!
//! A dataset is a group of files named `NAME.LANG.gz` (or another supported
//! compression); the position of a file in the pipeline document's `files`
//! list defines its column index.

use crate::tsv::read_record;
use anyhow::Context;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// Compression format detected from file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Compression {
    /// Detect compression format from file extension
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("gz" | "gzip") => Compression::Gzip,
            Some("bz2" | "bzip2") => Compression::Bzip2,
            Some("xz" | "lzma") => Compression::Xz,
            Some("zst" | "zstd") => Compression::Zstd,
            _ => Compression::None,
        }
    }

    /// Wrap a reader with the appropriate decompressor
    pub fn wrap_reader<'a>(&self, reader: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
        match self {
            Compression::None => reader,
            // Corpus files are routinely concatenations of gzip members, so
            // the multi-member decoder is the right one.
            Compression::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
            Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(reader).unwrap()),
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Bzip2 => write!(f, "bzip2"),
            Compression::Xz => write!(f, "xz"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

/// Open a dataset file, transparently decompressing by extension.
pub fn open_reader(path: &Path) -> anyhow::Result<Box<dyn Read + Send>> {
    let file =
        File::open(path).with_context(|| format!("cannot open input file: {}", path.display()))?;
    Ok(Compression::from_path(path).wrap_reader(Box::new(file)))
}

/// Like [`open_reader`], but `-` means stdin.
pub fn open_reader_or_stdin(path: &str) -> anyhow::Result<Box<dyn Read + Send>> {
    if path == "-" {
        Ok(Box::new(std::io::stdin()))
    } else {
        open_reader(Path::new(path))
    }
}

/// Language code of a dataset file: the second-to-last dotted component of
/// the filename (`name.LANG.gz`).
pub fn lang_code(filename: &str) -> anyhow::Result<String> {
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _ext)| stem)
        .unwrap_or(filename);
    match stem.rsplit_once('.') {
        Some((_, lang)) if !lang.is_empty() => Ok(lang.to_string()),
        _ => anyhow::bail!("cannot derive language code from file name: {filename}"),
    }
}

/// Where the cached raw sample for a dataset lives: a dotfile next to the
/// dataset's own files.
pub fn sample_path(dir: &Path, dataset: &str, langs: &[String]) -> PathBuf {
    dir.join(format!(".sample.{}.{}", dataset, langs.join("-")))
}

/// Base name used for `--tee` step outputs: the common prefix of the dataset
/// files, without a trailing dot.
pub fn tee_basename(files: &[String]) -> String {
    let Some(first) = files.first() else {
        return String::new();
    };
    let mut prefix = first.as_str();
    for file in &files[1..] {
        let common = prefix
            .char_indices()
            .zip(file.chars())
            .take_while(|((_, a), b)| a == b)
            .count();
        let end = prefix
            .char_indices()
            .nth(common)
            .map_or(prefix.len(), |(i, _)| i);
        prefix = &prefix[..end];
    }
    prefix.trim_end_matches('.').to_string()
}

/// Paste column files into a TSV stream: one field per file, rows joined by
/// tabs, stopping at the shortest column. At most `first` rows are written
/// when given. Returns the number of rows written.
pub fn paste_columns<W: Write>(
    readers: Vec<Box<dyn Read + Send>>,
    first: Option<u64>,
    out: &mut W,
) -> anyhow::Result<u64> {
    let mut columns: Vec<BufReader<Box<dyn Read + Send>>> =
        readers.into_iter().map(BufReader::new).collect();

    let mut rows = 0u64;
    let mut field = Vec::new();
    let mut row = Vec::new();

    'rows: loop {
        if first.is_some_and(|n| rows >= n) {
            break;
        }
        row.clear();
        for (i, column) in columns.iter_mut().enumerate() {
            if !read_record(column, &mut field)? {
                // Shortest column ends the paste.
                break 'rows;
            }
            if i > 0 {
                row.push(b'\t');
            }
            row.extend_from_slice(&field);
        }
        row.push(b'\n');
        out.write_all(&row)?;
        rows += 1;
    }

    out.flush()?;
    Ok(rows)
}

/// Copy a ready-made TSV stream, capped to the first `n` records when given.
pub fn copy_records<R: Read, W: Write>(
    reader: R,
    first: Option<u64>,
    out: &mut W,
) -> anyhow::Result<u64> {
    let mut reader = BufReader::new(reader);
    let mut rows = 0u64;
    let mut record = Vec::new();

    loop {
        if first.is_some_and(|n| rows >= n) {
            break;
        }
        if !read_record(&mut reader, &mut record)? {
            break;
        }
        record.push(b'\n');
        out.write_all(&record)?;
        rows += 1;
    }

    out.flush()?;
    Ok(rows)
}

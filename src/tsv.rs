//! Byte-level helpers for newline-terminated, tab-separated records.
//!
//! The pipeline treats rows as opaque bytes: no UTF-8 decoding happens here.

use memchr::memchr_iter;
use smallvec::SmallVec;
use std::io::{self, BufRead};

/// Read one newline-terminated record into `buf`, stripping the trailing
/// newline. Returns `false` on end of input.
pub fn read_record<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<bool> {
    buf.clear();
    let n = reader.read_until(b'\n', buf)?;
    if n == 0 {
        return Ok(false);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    Ok(true)
}

/// Split a record into its tab-separated fields.
///
/// An empty record still has one (empty) field, matching the behaviour of
/// `split(b'\t')` in most languages.
pub fn split_fields(record: &[u8]) -> SmallVec<[&[u8]; 8]> {
    let mut fields = SmallVec::new();
    let mut start = 0;
    for tab in memchr_iter(b'\t', record) {
        fields.push(&record[start..tab]);
        start = tab + 1;
    }
    fields.push(&record[start..]);
    fields
}

/// Join fields with the given delimiter into `out`, without a trailing
/// newline.
pub fn join_fields(fields: &[Vec<u8>], delimiter: &[u8], out: &mut Vec<u8>) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(delimiter);
        }
        out.extend_from_slice(field);
    }
}

//! Incremental extraction of balanced JSON objects from partial buffers.
//!
//! The splitter never copies or mutates the buffer. Each call scans from the
//! start of the given slice and reports the byte ranges of complete objects
//! together with how many bytes were consumed; callers advance their own
//! cursor by that amount and call again.

use std::ops::Range;

use crate::error::SplitError;

/// Complete objects found at the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Byte range of each object, relative to the scanned slice.
    pub objects: Vec<Range<usize>>,
    /// Bytes to advance past: leading separators plus the objects.
    pub consumed: usize,
}

impl Batch {
    /// Range from the first object's opening brace to the last one's closing brace.
    pub fn span(&self) -> Range<usize> {
        match (self.objects.first(), self.objects.last()) {
            (Some(first), Some(last)) => first.start..last.end,
            _ => 0..0,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Extract up to `batch_size` complete objects from the front of `buffer`.
///
/// Bytes before the first `{` are treated as separators and skipped. Braces
/// inside string literals are ignored. Returns `Ok(None)` when no object is
/// complete yet, meaning more bytes are needed.
///
/// `closed` declares that no more bytes will follow (the document's tail was
/// already seen); an unterminated object is then malformed rather than
/// pending.
pub fn extract_batch(
    buffer: &[u8],
    batch_size: usize,
    closed: bool,
) -> Result<Option<Batch>, SplitError> {
    let batch_size = batch_size.max(1);
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut object_start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &byte) in buffer.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' if depth > 0 => in_string = true,
            b'{' => {
                if depth == 0 {
                    object_start = i;
                }
                depth += 1;
            }
            b'}' => {
                if depth == 0 {
                    // Hand out what is complete; the next call reports it.
                    if !objects.is_empty() {
                        break;
                    }
                    return Err(SplitError::MalformedStructure {
                        position: i,
                        reason: "closing brace without an open object",
                    });
                }
                depth -= 1;
                if depth == 0 {
                    objects.push(object_start..i + 1);
                    if objects.len() == batch_size {
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    match objects.last() {
        Some(last) => {
            let consumed = last.end;
            Ok(Some(Batch { objects, consumed }))
        }
        None if closed && depth > 0 => Err(SplitError::MalformedStructure {
            position: object_start,
            reason: "object is never closed",
        }),
        None => Ok(None),
    }
}

/// Length of the separator run at the front of `buffer`: everything up to the
/// next brace.
pub fn separator_len(buffer: &[u8]) -> usize {
    buffer
        .iter()
        .position(|&b| b == b'{' || b == b'}')
        .unwrap_or(buffer.len())
}

/// Strip leading separators (commas and whitespace) from a resumed fragment.
pub fn trim_leading_separators(buffer: &[u8]) -> usize {
    buffer
        .iter()
        .position(|&b| !(b == b',' || b.is_ascii_whitespace()))
        .unwrap_or(buffer.len())
}

//! Delimiter and encoding detection over a bounded byte sample
//!
//! Detection is a pure function of the sample prefix; it never scans the
//! whole file. Ambiguous samples fall back to the default delimiter with
//! zero confidence.

/// Delimiters considered during auto-detection.
pub const DELIMITER_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Fallback when detection is ambiguous.
pub const DEFAULT_DELIMITER: u8 = b',';

/// Lines examined from the sample. Anything beyond this is ignored so the
/// cost is independent of file size.
const MAX_SAMPLE_LINES: usize = 10;

/// Best-guess delimiter plus a confidence in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SniffResult {
    pub delimiter: u8,
    pub confidence: f64,
}

/// Guess the delimiter from a bounded sample of the file's first bytes.
///
/// A candidate wins when it appears a consistent, non-zero number of times
/// per sampled line; confidence is the fraction of lines agreeing with the
/// first line's count. Ties are broken by candidate order.
pub fn sniff_delimiter(sample: &[u8]) -> SniffResult {
    let lines: Vec<&[u8]> = sample
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.is_empty())
        .take(MAX_SAMPLE_LINES)
        .collect();

    if lines.is_empty() {
        return SniffResult {
            delimiter: DEFAULT_DELIMITER,
            confidence: 0.0,
        };
    }

    let mut best = SniffResult {
        delimiter: DEFAULT_DELIMITER,
        confidence: 0.0,
    };

    for &candidate in &DELIMITER_CANDIDATES {
        let first_count = count_delimiter(lines[0], candidate);
        if first_count == 0 {
            continue;
        }
        let agreeing = lines
            .iter()
            .filter(|line| count_delimiter(line, candidate) == first_count)
            .count();
        let confidence = agreeing as f64 / lines.len() as f64;
        if confidence > best.confidence {
            best = SniffResult {
                delimiter: candidate,
                confidence,
            };
        }
    }

    best
}

/// Count occurrences outside double-quoted sections.
fn count_delimiter(line: &[u8], delimiter: u8) -> usize {
    let mut count = 0;
    let mut in_quotes = false;
    for &byte in line {
        if byte == b'"' {
            in_quotes = !in_quotes;
        } else if byte == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

/// UTF-8 byte-order mark.
pub const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Strip a leading UTF-8 BOM from the sample, reporting whether one was
/// present. The `utf-8-sig` default encoding is exactly UTF-8 with this
/// strip applied.
pub fn strip_utf8_bom(sample: &[u8]) -> (&[u8], bool) {
    match sample.strip_prefix(&UTF8_BOM) {
        Some(rest) => (rest, true),
        None => (sample, false),
    }
}

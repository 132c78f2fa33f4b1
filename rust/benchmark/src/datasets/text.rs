//! Line-oriented text inputs: one integer per line, comma separated integer
//! rows, and `low-high` range pairs.
//!
//! Unlike the binary vector files these are strict. A file that cannot be
//! opened, or any malformed line, is a fault naming the file and the 1-based
//! line number.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use rangebench_error::{BenchError, ErrorCodes};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum LineFormatError {
    #[error("Error opening file `{path}`: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Error reading `{path}` at line {line}: {source}")]
    Read {
        path: PathBuf,
        line: usize,
        #[source]
        source: io::Error,
    },
    #[error("Non-integer or empty line in `{path}` at line {line}")]
    NotAnInteger { path: PathBuf, line: usize },
    #[error("More than one value in `{path}` on line {line}")]
    ExtraValues { path: PathBuf, line: usize },
    #[error("Invalid integer `{token}` in `{path}` on line {line}")]
    InvalidInteger {
        path: PathBuf,
        line: usize,
        token: String,
    },
    #[error("Invalid format in `{path}` at line {line}: expected `<low>-<high>`")]
    InvalidRange { path: PathBuf, line: usize },
}

impl LineFormatError {
    /// The 1-based line the fault refers to, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            LineFormatError::Open { .. } => None,
            LineFormatError::Read { line, .. }
            | LineFormatError::NotAnInteger { line, .. }
            | LineFormatError::ExtraValues { line, .. }
            | LineFormatError::InvalidInteger { line, .. }
            | LineFormatError::InvalidRange { line, .. } => Some(*line),
        }
    }
}

impl BenchError for LineFormatError {
    fn code(&self) -> ErrorCodes {
        match self {
            LineFormatError::Open { .. } => ErrorCodes::NotFound,
            _ => ErrorCodes::DataLoss,
        }
    }
}

fn open(path: &Path) -> Result<BufReader<File>, LineFormatError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| LineFormatError::Open {
            path: path.to_path_buf(),
            source,
        })
}

// Feeds each line with its 1-based number to `parse_line`.
fn for_each_line<R: BufRead>(
    reader: R,
    source: &Path,
    mut parse_line: impl FnMut(&str, usize) -> Result<(), LineFormatError>,
) -> Result<(), LineFormatError> {
    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let line = line.map_err(|e| LineFormatError::Read {
            path: source.to_path_buf(),
            line: line_number,
            source: e,
        })?;
        parse_line(&line, line_number)?;
    }
    Ok(())
}

pub fn parse_one_int_per_line<R: BufRead>(
    reader: R,
    source: &Path,
) -> Result<Vec<i32>, LineFormatError> {
    let mut values = Vec::new();
    for_each_line(reader, source, |line, line_number| {
        let mut tokens = line.split_whitespace();
        let value = tokens
            .next()
            .and_then(|token| token.parse::<i32>().ok())
            .ok_or_else(|| LineFormatError::NotAnInteger {
                path: source.to_path_buf(),
                line: line_number,
            })?;
        if tokens.next().is_some() {
            return Err(LineFormatError::ExtraValues {
                path: source.to_path_buf(),
                line: line_number,
            });
        }
        values.push(value);
        Ok(())
    })?;
    Ok(values)
}

pub fn parse_int_rows<R: BufRead>(
    reader: R,
    source: &Path,
) -> Result<Vec<Vec<i32>>, LineFormatError> {
    let mut rows = Vec::new();
    for_each_line(reader, source, |line, line_number| {
        let mut row = Vec::new();
        // Empty fields between consecutive commas are skipped, not zero-filled.
        for token in line.split(',').filter(|token| !token.is_empty()) {
            let value = token.trim().parse::<i32>().map_err(|_| {
                LineFormatError::InvalidInteger {
                    path: source.to_path_buf(),
                    line: line_number,
                    token: token.to_string(),
                }
            })?;
            row.push(value);
        }
        rows.push(row);
        Ok(())
    })?;
    Ok(rows)
}

pub fn parse_range_pairs<R: BufRead>(
    reader: R,
    source: &Path,
) -> Result<Vec<(i32, i32)>, LineFormatError> {
    let mut ranges = Vec::new();
    for_each_line(reader, source, |line, line_number| {
        let invalid = || LineFormatError::InvalidRange {
            path: source.to_path_buf(),
            line: line_number,
        };
        let (low, high) = line.trim_end().split_once('-').ok_or_else(invalid)?;
        let low = low.trim().parse::<i32>().map_err(|_| invalid())?;
        let high = high.trim().parse::<i32>().map_err(|_| invalid())?;
        ranges.push((low, high));
        Ok(())
    })?;
    Ok(ranges)
}

/// Reads a file holding exactly one integer per line.
#[instrument]
pub fn read_one_int_per_line(path: &Path) -> Result<Vec<i32>, LineFormatError> {
    parse_one_int_per_line(open(path)?, path)
}

/// Reads comma separated integer rows, one row per line.
#[instrument]
pub fn read_int_rows(path: &Path) -> Result<Vec<Vec<i32>>, LineFormatError> {
    parse_int_rows(open(path)?, path)
}

/// Reads inclusive `low-high` range pairs, one per line.
#[instrument]
pub fn read_range_pairs(path: &Path) -> Result<Vec<(i32, i32)>, LineFormatError> {
    let ranges = parse_range_pairs(open(path)?, path)?;
    if let Some(line) = ranges.iter().position(|(low, high)| low > high) {
        tracing::warn!(line = line + 1, "Range with low above high matches nothing");
    }
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn source() -> &'static Path {
        Path::new("input.txt")
    }

    #[test]
    fn test_one_int_per_line() {
        let values = parse_one_int_per_line("7\n -3 \n42\n".as_bytes(), source())
            .expect("well formed input should parse");
        assert_eq!(values, vec![7, -3, 42]);
    }

    #[test]
    fn test_one_int_per_line_rejects_two_tokens() {
        let err = parse_one_int_per_line("3 4\n".as_bytes(), source())
            .expect_err("two tokens should fail");
        assert!(matches!(err, LineFormatError::ExtraValues { line: 1, .. }));
        assert_eq!(err.code(), ErrorCodes::DataLoss);
    }

    #[test]
    fn test_one_int_per_line_rejects_empty_and_non_integer() {
        let err = parse_one_int_per_line("1\n\n3\n".as_bytes(), source())
            .expect_err("empty line should fail");
        assert!(matches!(err, LineFormatError::NotAnInteger { line: 2, .. }));
        let err = parse_one_int_per_line("1\n2\nx\n".as_bytes(), source())
            .expect_err("non-integer should fail");
        assert_eq!(err.line(), Some(3));
        assert!(err.to_string().contains("input.txt"));
    }

    #[test]
    fn test_int_rows_skip_empty_fields() {
        let rows = parse_int_rows("3,,5\n\n1,2,3,\n".as_bytes(), source())
            .expect("well formed input should parse");
        assert_eq!(rows, vec![vec![3, 5], vec![], vec![1, 2, 3]]);
    }

    #[test]
    fn test_int_rows_reject_garbage() {
        let err = parse_int_rows("1,2\n4,five\n".as_bytes(), source())
            .expect_err("non-integer should fail");
        assert!(matches!(
            err,
            LineFormatError::InvalidInteger { line: 2, ref token, .. } if token == "five"
        ));
        let err = parse_int_rows("1, ,2\n".as_bytes(), source())
            .expect_err("whitespace-only field should fail");
        assert_eq!(err.line(), Some(1));
        let err = parse_int_rows("99999999999\n".as_bytes(), source())
            .expect_err("overflow should fail");
        assert_eq!(err.line(), Some(1));
    }

    #[test]
    fn test_range_pairs() {
        let ranges = parse_range_pairs("5-10\n0-999\r\n".as_bytes(), source())
            .expect("well formed input should parse");
        assert_eq!(ranges, vec![(5, 10), (0, 999)]);
    }

    #[test]
    fn test_range_pairs_reject_malformed() {
        for input in ["5-10-2\n", "5\n", "-\n", "a-3\n", "5-10x\n", "\n"] {
            let err = parse_range_pairs(input.as_bytes(), source())
                .expect_err("malformed range should fail");
            assert!(
                matches!(err, LineFormatError::InvalidRange { line: 1, .. }),
                "{input:?} gave {err}"
            );
        }
        let err = parse_range_pairs("1-2\n3-4\n5_6\n".as_bytes(), source())
            .expect_err("malformed range should fail");
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn test_missing_files_are_faults() {
        let dir = tempfile::tempdir().expect("Should be able to create temp dir");
        let missing = dir.path().join("ranges.txt");
        for err in [
            read_range_pairs(&missing).expect_err("missing file should fail"),
            read_int_rows(&missing).expect_err("missing file should fail"),
            read_one_int_per_line(&missing).expect_err("missing file should fail"),
        ] {
            assert!(matches!(err, LineFormatError::Open { .. }));
            assert_eq!(err.code(), ErrorCodes::NotFound);
            assert!(err.to_string().contains("ranges.txt"));
        }
    }

    #[test]
    fn test_read_from_files() {
        let dir = tempfile::tempdir().expect("Should be able to create temp dir");
        let ranges = dir.path().join("ranges.txt");
        std::fs::write(&ranges, "0-9\n3-3\n").expect("write should succeed");
        assert_eq!(
            read_range_pairs(&ranges).expect("should parse"),
            vec![(0, 9), (3, 3)]
        );
        let labels = dir.path().join("labels.txt");
        std::fs::write(&labels, "1\n2\n").expect("write should succeed");
        assert_eq!(
            read_one_int_per_line(&labels).expect("should parse"),
            vec![1, 2]
        );
    }

    proptest! {
        #[test]
        fn test_int_rows_preserve_line_order(
            rows in proptest::collection::vec(proptest::collection::vec(any::<i32>(), 0..6), 0..20),
        ) {
            let text: String = rows
                .iter()
                .map(|row| {
                    let fields: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                    format!("{}\n", fields.join(","))
                })
                .collect();
            let parsed = parse_int_rows(text.as_bytes(), source()).expect("should parse");
            prop_assert_eq!(parsed, rows);
        }
    }
}

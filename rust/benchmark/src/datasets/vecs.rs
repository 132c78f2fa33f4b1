//! Binary vector files (`.fvecs` for f32 data, `.ivecs` for i32 id lists).
//!
//! A file is a bare sequence of records `[i32 dim][dim x element]`, little
//! endian, with no header, record count or checksum. Dimensions may differ
//! between records. Decoding stops at the first record that cannot be read in
//! full and keeps every complete record before it, so a corrupt tail yields
//! fewer records rather than an error.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use rangebench_error::{BenchError, ErrorCodes};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

const HEADER_SIZE: usize = 4;

/// A fixed-width, little-endian element of a vector record.
pub trait VecElement: Copy + Send + 'static {
    const SIZE: usize = 4;
    fn from_le_bytes(bytes: [u8; 4]) -> Self;
    fn to_le_bytes(self) -> [u8; 4];
}

impl VecElement for f32 {
    fn from_le_bytes(bytes: [u8; 4]) -> Self {
        f32::from_le_bytes(bytes)
    }
    fn to_le_bytes(self) -> [u8; 4] {
        f32::to_le_bytes(self)
    }
}

impl VecElement for i32 {
    fn from_le_bytes(bytes: [u8; 4]) -> Self {
        i32::from_le_bytes(bytes)
    }
    fn to_le_bytes(self) -> [u8; 4] {
        i32::to_le_bytes(self)
    }
}

/// What to do when a binary input cannot be opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenPolicy {
    /// Report on stderr and continue with an empty dataset. Any later count
    /// check that depends on the dataset then fails.
    #[default]
    Lenient,
    /// Fail immediately with the path.
    Strict,
}

#[derive(Error, Debug)]
pub enum VecsError {
    #[error("Unable to open `{path}` for reading: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Unable to write `{path}`: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BenchError for VecsError {
    fn code(&self) -> ErrorCodes {
        match self {
            VecsError::Open { .. } => ErrorCodes::NotFound,
            VecsError::Write { source, .. } => source.code(),
        }
    }
}

/// Decodes every complete record from `reader`.
pub fn decode_vecs<T: VecElement, R: Read>(mut reader: R) -> Vec<Vec<T>> {
    let mut records = Vec::new();
    let mut header = Vec::with_capacity(HEADER_SIZE);
    let mut payload = Vec::new();
    loop {
        header.clear();
        if let Err(e) = (&mut reader)
            .take(HEADER_SIZE as u64)
            .read_to_end(&mut header)
        {
            tracing::warn!(records = records.len(), "Stopping decode on read error: {e}");
            break;
        }
        if header.len() < HEADER_SIZE {
            break;
        }
        let dimension = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let Some(expected) = usize::try_from(dimension)
            .ok()
            .and_then(|d| d.checked_mul(T::SIZE))
        else {
            tracing::warn!(dimension, "Stopping decode at invalid record dimension");
            break;
        };

        // The dimension is untrusted, so the payload grows with what is
        // actually read instead of being allocated up front.
        payload.clear();
        if let Err(e) = (&mut reader)
            .take(expected as u64)
            .read_to_end(&mut payload)
        {
            tracing::warn!(records = records.len(), "Stopping decode on read error: {e}");
            break;
        }
        if payload.len() < expected {
            tracing::warn!(
                records = records.len(),
                expected,
                found = payload.len(),
                "Discarding truncated trailing record"
            );
            break;
        }
        records.push(
            payload
                .chunks_exact(T::SIZE)
                .map(|c| T::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        );
    }
    records
}

/// Encodes `records` in the binary vector format.
pub fn encode_vecs<T: VecElement, W: Write>(mut writer: W, records: &[Vec<T>]) -> io::Result<()> {
    for record in records {
        let dimension = i32::try_from(record.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("record of {} elements exceeds the i32 dimension field", record.len()),
            )
        })?;
        writer.write_all(&dimension.to_le_bytes())?;
        for element in record {
            writer.write_all(&element.to_le_bytes())?;
        }
    }
    writer.flush()
}

#[instrument(skip(policy), fields(policy = ?policy))]
pub fn read_vecs_with_policy<T: VecElement>(
    path: &Path,
    policy: OpenPolicy,
) -> Result<Vec<Vec<T>>, VecsError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(source) => match policy {
            OpenPolicy::Strict => {
                return Err(VecsError::Open {
                    path: path.to_path_buf(),
                    source,
                })
            }
            OpenPolicy::Lenient => {
                tracing::error!(path = %path.display(), "Unable to open file for reading: {source}");
                eprintln!("Error: Unable to open file for reading: {}", path.display());
                return Ok(Vec::new());
            }
        },
    };
    let records = decode_vecs(BufReader::new(file));
    tracing::debug!(records = records.len(), "Decoded vector file");
    Ok(records)
}

fn read_vecs_lenient<T: VecElement>(path: &Path) -> Vec<Vec<T>> {
    match read_vecs_with_policy(path, OpenPolicy::Lenient) {
        Ok(records) => records,
        // Lenient reads only fail to open, which is reported above.
        Err(_) => Vec::new(),
    }
}

/// Reads an `.fvecs` file. An unopenable file is reported and yields no records.
pub fn read_fvecs(path: &Path) -> Vec<Vec<f32>> {
    read_vecs_lenient(path)
}

/// Reads an `.ivecs` file. An unopenable file is reported and yields no records.
pub fn read_ivecs(path: &Path) -> Vec<Vec<i32>> {
    read_vecs_lenient(path)
}

pub fn write_vecs<T: VecElement>(path: &Path, records: &[Vec<T>]) -> Result<(), VecsError> {
    let write_error = |source| VecsError::Write {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(write_error)?;
    encode_vecs(BufWriter::new(file), records).map_err(write_error)
}

pub fn write_fvecs(path: &Path, records: &[Vec<f32>]) -> Result<(), VecsError> {
    write_vecs(path, records)
}

pub fn write_ivecs(path: &Path, records: &[Vec<i32>]) -> Result<(), VecsError> {
    write_vecs(path, records)
}

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use rangebench_error::{BenchError, ErrorCodes};
use thiserror::Error;
use tracing::instrument;

const ENTRY_SIZE: usize = std::mem::size_of::<u64>();

#[derive(Error, Debug)]
pub enum IdMappingError {
    #[error("Error opening mapping file `{path}`: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Mapping file `{path}` is missing its 4-byte entry count")]
    MissingCount { path: PathBuf },
    #[error("Mapping file `{path}` declares a negative entry count {count}")]
    NegativeCount { path: PathBuf, count: i32 },
    #[error("Mapping file `{path}` declares {expected} entries but holds {found}")]
    Truncated {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    #[error("Error reading mapping file `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Unable to write mapping file `{path}`: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Sorted id {sorted_id} is outside the mapping of {len} entries")]
    OutOfRange { sorted_id: u64, len: usize },
}

impl BenchError for IdMappingError {
    fn code(&self) -> ErrorCodes {
        match self {
            IdMappingError::Open { .. } => ErrorCodes::NotFound,
            IdMappingError::MissingCount { .. }
            | IdMappingError::NegativeCount { .. }
            | IdMappingError::Truncated { .. } => ErrorCodes::DataLoss,
            IdMappingError::Read { source, .. } | IdMappingError::Write { source, .. } => {
                source.code()
            }
            IdMappingError::OutOfRange { .. } => ErrorCodes::OutOfRange,
        }
    }
}

/// Permutation from the engine's sorted id space back to original dataset ids.
///
/// On disk: `[i32 count N][N x u64 original id]`, little endian. Cell `i`
/// holds the original id of sorted position `i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdMapping {
    original_ids: Vec<u64>,
}

impl IdMapping {
    pub fn new(original_ids: Vec<u64>) -> Self {
        Self { original_ids }
    }

    /// Conventional location of the mapping for a dataset file.
    pub fn path_for(data_path: &Path) -> PathBuf {
        let mut path = data_path.as_os_str().to_owned();
        path.push(".mapping");
        PathBuf::from(path)
    }

    #[instrument]
    pub fn load(path: &Path) -> Result<Self, IdMappingError> {
        let file = File::open(path).map_err(|source| IdMappingError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let read_error = |source| IdMappingError::Read {
            path: path.to_path_buf(),
            source,
        };

        let mut count = [0u8; 4];
        reader.read_exact(&mut count).map_err(|source| match source.kind() {
            io::ErrorKind::UnexpectedEof => IdMappingError::MissingCount {
                path: path.to_path_buf(),
            },
            _ => read_error(source),
        })?;
        let count = i32::from_le_bytes(count);
        let expected = usize::try_from(count).map_err(|_| IdMappingError::NegativeCount {
            path: path.to_path_buf(),
            count,
        })?;

        let mut payload = Vec::new();
        reader
            .take((expected * ENTRY_SIZE) as u64)
            .read_to_end(&mut payload)
            .map_err(read_error)?;
        if payload.len() < expected * ENTRY_SIZE {
            return Err(IdMappingError::Truncated {
                path: path.to_path_buf(),
                expected,
                found: payload.len() / ENTRY_SIZE,
            });
        }
        let original_ids = payload
            .chunks_exact(ENTRY_SIZE)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect::<Vec<_>>();
        tracing::debug!(entries = original_ids.len(), "Loaded id mapping");
        Ok(Self { original_ids })
    }

    pub fn write(&self, path: &Path) -> Result<(), IdMappingError> {
        let write_error = |source| IdMappingError::Write {
            path: path.to_path_buf(),
            source,
        };
        let count = i32::try_from(self.original_ids.len()).map_err(|_| {
            write_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "mapping does not fit the i32 count field",
            ))
        })?;
        let file = File::create(path).map_err(write_error)?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&count.to_le_bytes())
            .map_err(write_error)?;
        for id in &self.original_ids {
            writer.write_all(&id.to_le_bytes()).map_err(write_error)?;
        }
        writer.flush().map_err(write_error)
    }

    /// Original id of `sorted_id`. Ids beyond the table are a fault.
    pub fn translate(&self, sorted_id: u64) -> Result<u64, IdMappingError> {
        usize::try_from(sorted_id)
            .ok()
            .and_then(|index| self.original_ids.get(index))
            .copied()
            .ok_or(IdMappingError::OutOfRange {
                sorted_id,
                len: self.original_ids.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.original_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.original_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate() {
        let mapping = IdMapping::new(vec![2, 0, 1]);
        assert_eq!(mapping.translate(0).expect("in range"), 2);
        assert_eq!(mapping.translate(2).expect("in range"), 1);
        let err = mapping.translate(3).expect_err("out of range");
        assert!(matches!(err, IdMappingError::OutOfRange { sorted_id: 3, len: 3 }));
        assert_eq!(err.code(), ErrorCodes::OutOfRange);
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().expect("Should be able to create temp dir");
        let path = dir.path().join("base.fvecs.mapping");
        let mapping = IdMapping::new(vec![4, 3, 2, 1, 0, u64::MAX]);
        mapping.write(&path).expect("write should succeed");
        assert_eq!(IdMapping::load(&path).expect("load should succeed"), mapping);

        let bytes = std::fs::read(&path).expect("read should succeed");
        assert_eq!(bytes.len(), 4 + 6 * 8);
        assert_eq!(&bytes[..4], &6i32.to_le_bytes());
    }

    #[test]
    fn test_path_for() {
        assert_eq!(
            IdMapping::path_for(Path::new("/data/base.fvecs")),
            PathBuf::from("/data/base.fvecs.mapping")
        );
    }

    #[test]
    fn test_load_faults() {
        let dir = tempfile::tempdir().expect("Should be able to create temp dir");
        let err = IdMapping::load(&dir.path().join("absent")).expect_err("missing file");
        assert_eq!(err.code(), ErrorCodes::NotFound);

        let truncated = dir.path().join("truncated");
        let mut bytes = 3i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&7u64.to_le_bytes());
        std::fs::write(&truncated, &bytes).expect("write should succeed");
        let err = IdMapping::load(&truncated).expect_err("short payload");
        assert!(matches!(err, IdMappingError::Truncated { expected: 3, found: 1, .. }));

        let negative = dir.path().join("negative");
        std::fs::write(&negative, (-1i32).to_le_bytes()).expect("write should succeed");
        let err = IdMapping::load(&negative).expect_err("negative count");
        assert!(matches!(err, IdMappingError::NegativeCount { count: -1, .. }));
        assert_eq!(err.code(), ErrorCodes::DataLoss);

        for (name, bytes) in [("empty", &[0u8; 0][..]), ("short", &[1u8, 0][..])] {
            let headless = dir.path().join(name);
            std::fs::write(&headless, bytes).expect("write should succeed");
            let err = IdMapping::load(&headless).expect_err("no count header");
            assert!(matches!(err, IdMappingError::MissingCount { .. }));
            assert_eq!(err.code(), ErrorCodes::DataLoss);
            assert!(err.to_string().contains("missing its 4-byte entry count"));
        }
    }
}

pub mod id_mapping;
pub mod text;
pub mod vecs;

use std::path::Path;

/// On-disk encoding of a groundtruth file, chosen by extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroundtruthFormat {
    /// Binary `.ivecs` records.
    Ivecs,
    /// Comma separated integer rows, one query per line.
    Rows,
}

impl GroundtruthFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("ivecs") => GroundtruthFormat::Ivecs,
            _ => GroundtruthFormat::Rows,
        }
    }
}

//! Model snapshots
//!
//! A snapshot is one JSON document holding a format version, metadata and the
//! per-algorithm state needed to reproduce predictions exactly. Writes go to a
//! temporary file in the destination folder which is then renamed into place,
//! so a failed save never leaves a partial snapshot behind.

use crate::algorithms::als::AlsState;
use crate::algorithms::fma::FmaState;
use crate::algorithms::knn::KnnState;
use crate::algorithms::knn2::Knn2State;
use crate::algorithms::svd::SvdState;
use crate::algorithms::svdknn::SvdKnnState;
use crate::core::{Result, ZeroError};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Version written into every snapshot; loading any other version fails
pub const FORMAT_VERSION: u32 = 1;

/// Per-algorithm state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", content = "state", rename_all = "lowercase")]
pub enum ModelState {
    Als(AlsState),
    Svd(SvdState),
    SvdKnn(SvdKnnState),
    Knn(KnnState),
    Knn2(Knn2State),
    Fma(FmaState),
}

impl ModelState {
    /// Registry name of the algorithm this state belongs to
    pub fn algorithm(&self) -> &'static str {
        match self {
            ModelState::Als(_) => "als",
            ModelState::Svd(_) => "svd",
            ModelState::SvdKnn(_) => "svdknn",
            ModelState::Knn(_) => "knn",
            ModelState::Knn2(_) => "knn2",
            ModelState::Fma(_) => "fma",
        }
    }

    /// Error returned by a model handed another algorithm's state
    pub fn mismatch(&self, expected: &str) -> ZeroError {
        ZeroError::IncompatibleSnapshot(format!(
            "snapshot holds a {} model, expected {expected}",
            self.algorithm()
        ))
    }
}

/// Rejects a stored array whose shape disagrees with the snapshot dimensions
pub fn check_shape(what: &str, actual: (usize, usize), expected: (usize, usize)) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(ZeroError::IncompatibleSnapshot(format!(
            "{what} is {}x{}, expected {}x{}",
            actual.0, actual.1, expected.0, expected.1
        )))
    }
}

/// Same as [`check_shape`] for vectors
pub fn check_len(what: &str, actual: usize, expected: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(ZeroError::IncompatibleSnapshot(format!(
            "{what} has {actual} entries, expected {expected}"
        )))
    }
}

/// Snapshot metadata for tracking and validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Library version used to create the snapshot
    pub library_version: String,
    /// Short name of the model when it was saved
    pub shortname: String,
    /// Creation timestamp
    pub created_at: String,
}

/// On-disk snapshot document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_version: u32,
    pub metadata: SnapshotMetadata,
    pub model: ModelState,
}

impl Snapshot {
    pub fn new(shortname: &str, model: ModelState) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            metadata: SnapshotMetadata {
                library_version: env!("CARGO_PKG_VERSION").to_string(),
                shortname: shortname.to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
            },
            model,
        }
    }
}

/// `folder/filename`, defaulting the filename to `<shortname>.json`
pub fn backup_path(folder: &Path, filename: Option<&str>, shortname: &str) -> PathBuf {
    match filename {
        Some(name) => folder.join(name),
        None => folder.join(format!("{shortname}.json")),
    }
}

/// Atomically write a snapshot to `path`
pub fn write_snapshot(path: &Path, shortname: &str, model: ModelState) -> Result<()> {
    let folder = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(folder)?;

    let snapshot = Snapshot::new(shortname, model);
    let mut tmp = NamedTempFile::new_in(folder)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer(&mut writer, &snapshot)
            .map_err(|e| ZeroError::SerializationError(e.to_string()))?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ZeroError::IoError(e.error))?;

    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    debug!("Saved {shortname} snapshot to {} ({size} bytes)", path.display());
    Ok(())
}

/// Read and validate a snapshot
pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ZeroError::SnapshotNotFound(path.to_path_buf()),
        _ => ZeroError::IoError(e),
    })?;
    let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| ZeroError::SerializationError(e.to_string()))?;

    if snapshot.format_version != FORMAT_VERSION {
        return Err(ZeroError::IncompatibleSnapshot(format!(
            "{} has format version {}, expected {FORMAT_VERSION}",
            path.display(),
            snapshot.format_version
        )));
    }
    debug!(
        "Loaded {} snapshot from {} (created {})",
        snapshot.metadata.shortname,
        path.display(),
        snapshot.metadata.created_at
    );
    Ok(snapshot)
}

/// Delete a snapshot file
pub fn remove_snapshot(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ZeroError::SnapshotNotFound(path.to_path_buf()),
        _ => ZeroError::IoError(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::als::AlsConfig;
    use crate::core::Dimensions;
    use crate::metrics::MetricsRecord;
    use nalgebra::DMatrix;
    use tempfile::TempDir;

    fn als_state() -> ModelState {
        ModelState::Als(AlsState {
            config: AlsConfig::default(),
            dimensions: Dimensions::new(2, 3),
            u: DMatrix::from_row_slice(2, 1, &[0.1, 1.0 / 3.0]),
            vt: DMatrix::from_row_slice(1, 3, &[0.7, std::f64::consts::PI, -2.5e-17]),
            means: vec![3.5, 0.0],
            record: MetricsRecord::default(),
            unzipped: false,
        })
    }

    #[test]
    fn test_backup_path_defaults_to_shortname() {
        let folder = Path::new("/tmp/snaps");
        assert_eq!(
            backup_path(folder, None, "als-20"),
            PathBuf::from("/tmp/snaps/als-20.json")
        );
        assert_eq!(
            backup_path(folder, Some("custom.json"), "als-20"),
            PathBuf::from("/tmp/snaps/custom.json")
        );
    }

    #[test]
    fn test_round_trip_preserves_floats_exactly() -> Result<()> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("als.json");

        write_snapshot(&path, "als-1", als_state())?;
        let snapshot = read_snapshot(&path)?;

        assert_eq!(snapshot.format_version, FORMAT_VERSION);
        assert_eq!(snapshot.metadata.shortname, "als-1");
        match snapshot.model {
            ModelState::Als(state) => {
                assert_eq!(state.u[(1, 0)].to_bits(), (1.0f64 / 3.0).to_bits());
                assert_eq!(state.vt[(0, 1)].to_bits(), std::f64::consts::PI.to_bits());
                assert_eq!(state.vt[(0, 2)].to_bits(), (-2.5e-17f64).to_bits());
            }
            other => panic!("unexpected state {}", other.algorithm()),
        }
        Ok(())
    }

    #[test]
    fn test_write_leaves_no_temporary_files() -> Result<()> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("als.json");
        write_snapshot(&path, "als-1", als_state())?;

        let entries: Vec<_> = fs::read_dir(dir.path())?.collect();
        assert_eq!(entries.len(), 1);
        Ok(())
    }

    #[test]
    fn test_missing_snapshot_is_not_found() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("absent.json");
        match read_snapshot(&path) {
            Err(ZeroError::SnapshotNotFound(p)) => assert_eq!(p, path),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            remove_snapshot(&path),
            Err(ZeroError::SnapshotNotFound(_))
        ));
    }

    #[test]
    fn test_version_mismatch_is_rejected() -> Result<()> {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("old.json");
        let mut snapshot = Snapshot::new("als-1", als_state());
        snapshot.format_version = FORMAT_VERSION + 1;
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| ZeroError::SerializationError(e.to_string()))?;
        fs::write(&path, json)?;

        assert!(matches!(
            read_snapshot(&path),
            Err(ZeroError::IncompatibleSnapshot(_))
        ));
        Ok(())
    }
}

//! Side information: a sparse work × tag matrix

use crate::core::{Result, SparseMatrix, SparseVector};
use crate::data::libsvm::{IndexBase, LibSvmDataset};
use log::{debug, info};
use std::path::Path;

/// Default location of the tag matrix, relative to the working directory
pub const DEFAULT_TAGS_PATH: &str = "tags/tag-matrix.libsvm";

/// Tags attached to works, one row per work
///
/// Works past the last row have no tags.
#[derive(Debug, Clone, PartialEq)]
pub struct SideInformation {
    tags: SparseMatrix,
}

impl Default for SideInformation {
    fn default() -> Self {
        Self::empty()
    }
}

impl SideInformation {
    /// No tags at all
    pub fn empty() -> Self {
        Self {
            tags: SparseMatrix::zeros(0, 0),
        }
    }

    pub fn from_matrix(tags: SparseMatrix) -> Self {
        Self { tags }
    }

    /// Load a 1-based LibSVM tag file, one line per work, labels ignored
    ///
    /// A missing file gives an empty matrix; a malformed one is an error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            debug!("No tag matrix at {}, using no side information", path.display());
            return Ok(Self::empty());
        }
        let dataset = LibSvmDataset::from_file(path, IndexBase::One)?;
        let nb_tags = dataset.dim();
        let tags = SparseMatrix::from_rows(dataset.into_rows(), nb_tags)?;
        info!(
            "Loaded {} tags for {} works from {}",
            tags.ncols(),
            tags.nrows(),
            path.display()
        );
        Ok(Self { tags })
    }

    pub fn nb_tags(&self) -> usize {
        self.tags.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.nnz() == 0
    }

    pub fn matrix(&self) -> &SparseMatrix {
        &self.tags
    }

    /// Tags of a work, `None` when the matrix has no row for it
    pub fn tags_of(&self, work: usize) -> Option<&SparseVector> {
        (work < self.tags.nrows()).then(|| self.tags.row(work))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_is_empty() {
        let side = SideInformation::from_file("/non/existent/tag-matrix.libsvm").unwrap();
        assert_eq!(side.nb_tags(), 0);
        assert!(side.is_empty());
        assert!(side.tags_of(0).is_none());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "0 1:1 3:0.6").unwrap();
        writeln!(file, "0").unwrap();
        writeln!(file, "0 2:1").unwrap();
        file.flush().unwrap();

        let side = SideInformation::from_file(file.path()).unwrap();
        assert_eq!(side.nb_tags(), 3);
        assert_eq!(side.matrix().nrows(), 3);
        assert_eq!(side.tags_of(0).unwrap().indices, vec![0, 2]);
        assert!(side.tags_of(1).unwrap().is_empty());
        assert!(side.tags_of(3).is_none());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "0 1:one").unwrap();
        file.flush().unwrap();
        assert!(SideInformation::from_file(file.path()).is_err());
    }
}

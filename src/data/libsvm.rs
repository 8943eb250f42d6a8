//! LibSVM format reader and writer
//!
//! Format: `label index:value index:value ...`, one sample per line.
//! Tag matrices on disk use the usual 1-based indices; libFM design files
//! are written 0-based, which libFM accepts as-is.

use crate::core::{Result, SparseVector, ZeroError};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// First feature index used in a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBase {
    Zero,
    One,
}

impl IndexBase {
    fn offset(self) -> usize {
        match self {
            IndexBase::Zero => 0,
            IndexBase::One => 1,
        }
    }
}

/// Labelled sparse rows read from a LibSVM file
#[derive(Debug, Clone, PartialEq)]
pub struct LibSvmDataset {
    rows: Vec<SparseVector>,
    labels: Vec<f64>,
    dimensions: usize,
}

impl LibSvmDataset {
    /// Load a dataset from a file
    pub fn from_file<P: AsRef<Path>>(path: P, base: IndexBase) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), base)
    }

    /// Load a dataset from any buffered reader
    pub fn from_reader<R: BufRead>(reader: R, base: IndexBase) -> Result<Self> {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        let mut dimensions = 0;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (label, row) = Self::parse_line(line, base).map_err(|e| {
                ZeroError::ParseError(format!("Error parsing line {}: {}", line_num + 1, e))
            })?;

            if let Some(&max_idx) = row.indices.last() {
                dimensions = dimensions.max(max_idx + 1);
            }
            labels.push(label);
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(ZeroError::EmptyDataset);
        }

        Ok(Self {
            rows,
            labels,
            dimensions,
        })
    }

    /// Parse a single line into its label and 0-based sparse row
    pub fn parse_line(line: &str, base: IndexBase) -> Result<(f64, SparseVector)> {
        let mut parts = line.split_whitespace();

        let label_str = parts
            .next()
            .ok_or_else(|| ZeroError::ParseError("Empty line".to_string()))?;
        let label = label_str
            .parse::<f64>()
            .map_err(|_| ZeroError::ParseError(format!("Invalid label: {}", label_str)))?;

        let mut indices = Vec::new();
        let mut values = Vec::new();

        for part in parts {
            let (idx_str, val_str) = part.split_once(':').ok_or_else(|| {
                ZeroError::ParseError(format!("Invalid feature format: {}", part))
            })?;

            let index = idx_str
                .parse::<usize>()
                .map_err(|_| ZeroError::ParseError(format!("Invalid index: {}", idx_str)))?;
            let index = index.checked_sub(base.offset()).ok_or_else(|| {
                ZeroError::ParseError(format!("Feature index {} is below {}", index, base.offset()))
            })?;

            let value = val_str
                .parse::<f64>()
                .map_err(|_| ZeroError::ParseError(format!("Invalid value: {}", val_str)))?;

            indices.push(index);
            values.push(value);
        }

        Ok((label, SparseVector::new(indices, values)))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// One past the largest feature index seen
    pub fn dim(&self) -> usize {
        self.dimensions
    }

    pub fn rows(&self) -> &[SparseVector] {
        &self.rows
    }

    pub fn labels(&self) -> &[f64] {
        &self.labels
    }

    pub fn into_rows(self) -> Vec<SparseVector> {
        self.rows
    }
}

/// Write labelled rows in LibSVM format
pub fn write_libsvm<W: Write>(
    writer: W,
    rows: &[SparseVector],
    labels: &[f64],
    base: IndexBase,
) -> Result<()> {
    if rows.len() != labels.len() {
        return Err(ZeroError::DimensionMismatch {
            expected: rows.len(),
            actual: labels.len(),
        });
    }
    let mut writer = BufWriter::new(writer);
    for (row, label) in rows.iter().zip(labels) {
        write!(writer, "{label}")?;
        for (index, value) in row.iter() {
            write!(writer, " {}:{value}", index + base.offset())?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write labelled rows to a new file at `path`
pub fn write_libsvm_file<P: AsRef<Path>>(
    path: P,
    rows: &[SparseVector],
    labels: &[f64],
    base: IndexBase,
) -> Result<()> {
    let file = File::create(path)?;
    write_libsvm(file, rows, labels, base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_line_one_based() {
        let (label, row) =
            LibSvmDataset::parse_line("3 1:0.5 3:1.2 5:-0.8", IndexBase::One).unwrap();
        assert_eq!(label, 3.0);
        assert_eq!(row.indices, vec![0, 2, 4]);
        assert_eq!(row.values, vec![0.5, 1.2, -0.8]);

        let (label, row) = LibSvmDataset::parse_line("0", IndexBase::One).unwrap();
        assert_eq!(label, 0.0);
        assert!(row.is_empty());
    }

    #[test]
    fn test_parse_line_zero_based_keeps_indices() {
        let (_, row) = LibSvmDataset::parse_line("4.5 0:1 7:1", IndexBase::Zero).unwrap();
        assert_eq!(row.indices, vec![0, 7]);
    }

    #[test]
    fn test_parse_line_errors() {
        // Invalid label
        assert!(LibSvmDataset::parse_line("abc 1:1.0", IndexBase::One).is_err());
        // Invalid feature format
        assert!(LibSvmDataset::parse_line("1 1-1.0", IndexBase::One).is_err());
        // Invalid index
        assert!(LibSvmDataset::parse_line("1 abc:1.0", IndexBase::One).is_err());
        // Invalid value
        assert!(LibSvmDataset::parse_line("1 1:abc", IndexBase::One).is_err());
        // Zero index in a 1-based file
        assert!(LibSvmDataset::parse_line("1 0:1.0", IndexBase::One).is_err());
    }

    #[test]
    fn test_from_reader_skips_comments_and_blank_lines() {
        let data = "# tags\n0 1:1 3:2\n\n# second work\n0 2:1\n";
        let dataset = LibSvmDataset::from_reader(Cursor::new(data), IndexBase::One).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.dim(), 3);
        assert_eq!(dataset.labels(), &[0.0, 0.0]);
        assert_eq!(dataset.rows()[1].indices, vec![1]);
    }

    #[test]
    fn test_from_reader_reports_line_number() {
        let data = "0 1:1\n0 1:x\n";
        let err = LibSvmDataset::from_reader(Cursor::new(data), IndexBase::One).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_from_reader_empty_dataset() {
        let result = LibSvmDataset::from_reader(Cursor::new("# Only comments\n\n"), IndexBase::One);
        assert!(matches!(result, Err(ZeroError::EmptyDataset)));
    }

    #[test]
    fn test_write_then_read_zero_based() {
        let rows = vec![
            SparseVector::new(vec![0, 6], vec![1.0, 1.0]),
            SparseVector::new(vec![2, 5, 9], vec![1.0, 1.0, 2.0]),
        ];
        let labels = vec![4.0, 2.5];

        let mut buffer = Vec::new();
        write_libsvm(&mut buffer, &rows, &labels, IndexBase::Zero).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, "4 0:1 6:1\n2.5 2:1 5:1 9:2\n");

        let dataset = LibSvmDataset::from_reader(Cursor::new(text), IndexBase::Zero).unwrap();
        assert_eq!(dataset.rows(), rows.as_slice());
        assert_eq!(dataset.labels(), labels.as_slice());
    }

    #[test]
    fn test_write_rejects_label_count_mismatch() {
        let rows = vec![SparseVector::new(vec![0], vec![1.0])];
        let result = write_libsvm(Vec::new(), &rows, &[], IndexBase::Zero);
        assert!(matches!(result, Err(ZeroError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_from_file_io_error() {
        let result = LibSvmDataset::from_file("/non/existent/tags.libsvm", IndexBase::One);
        assert!(matches!(result, Err(ZeroError::IoError(_))));
    }
}

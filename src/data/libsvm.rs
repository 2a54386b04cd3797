//! LibSVM loader producing sparse inputs
//!
//! Each line is `label index:value index:value ...` with 1-based indices:
//!
//! ```text
//! +1 1:0.5 3:1.2 7:0.8
//! -1 2:0.3 5:2.1
//! ```

use crate::core::{CsrMatrix, Error, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Sparse samples with their labels
#[derive(Debug, Clone, PartialEq)]
pub struct LibSvmDataset {
    pub x: CsrMatrix,
    pub labels: Vec<f64>,
}

type SparseRow = (Vec<usize>, Vec<f64>);

impl LibSvmDataset {
    /// Load a dataset from a LibSVM format file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Load a dataset from a reader
    ///
    /// The column count is one past the largest index seen.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        let mut n_features = 0;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (label, row) = Self::parse_line(line).map_err(|e| {
                Error::ParseError(format!("Error parsing line {}: {}", line_num + 1, e))
            })?;
            if let Some(&max) = row.0.iter().max() {
                n_features = n_features.max(max + 1);
            }
            labels.push(label);
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(Error::EmptyDataset);
        }

        Ok(Self {
            x: CsrMatrix::from_sparse_rows(rows, n_features)?,
            labels,
        })
    }

    /// Parse a single line in libsvm format
    fn parse_line(line: &str) -> Result<(f64, SparseRow)> {
        let mut parts = line.split_whitespace();
        let label_str = parts
            .next()
            .ok_or_else(|| Error::ParseError("Empty line".to_string()))?;
        let label = label_str
            .parse::<f64>()
            .map_err(|_| Error::ParseError(format!("Invalid label: {label_str}")))?;

        let mut indices = Vec::new();
        let mut values = Vec::new();
        for feature in parts {
            let (index, value) = feature
                .split_once(':')
                .ok_or_else(|| Error::ParseError(format!("Invalid feature format: {feature}")))?;
            let index = index
                .parse::<usize>()
                .map_err(|_| Error::ParseError(format!("Invalid feature index: {index}")))?;
            let value = value
                .parse::<f64>()
                .map_err(|_| Error::ParseError(format!("Invalid feature value: {value}")))?;
            if index == 0 {
                return Err(Error::ParseError(
                    "Feature index must be positive: 0".to_string(),
                ));
            }
            indices.push(index - 1);
            values.push(value);
        }

        Ok((label, (indices, values)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_line_basic() {
        let (label, (indices, values)) = LibSvmDataset::parse_line("+1 1:0.5 3:1.2").unwrap();
        assert_eq!(label, 1.0);
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(values, vec![0.5, 1.2]);
    }

    #[test]
    fn test_labels_kept_as_written() {
        let (label, _) = LibSvmDataset::parse_line("3 1:1.0").unwrap();
        assert_eq!(label, 3.0);
    }

    #[test]
    fn test_parse_line_invalid_format() {
        assert!(LibSvmDataset::parse_line("+1 1").is_err());
        assert!(LibSvmDataset::parse_line("+1 abc:1.0").is_err());
        assert!(LibSvmDataset::parse_line("+1 1:abc").is_err());
        assert!(LibSvmDataset::parse_line("+1 0:1.0").is_err());
    }

    #[test]
    fn test_from_reader_basic() {
        let data = "# header\n+1 1:0.5 3:1.2\n\n-1 2:0.3 5:2.1\n";
        let dataset = LibSvmDataset::from_reader(Cursor::new(data)).unwrap();

        assert_eq!(dataset.x.rows(), 2);
        assert_eq!(dataset.x.cols(), 5);
        assert_eq!(dataset.x.nnz(), 4);
        assert_eq!(dataset.labels, vec![1.0, -1.0]);
        assert_eq!(dataset.x.dense_row(1), vec![0.0, 0.3, 0.0, 0.0, 2.1]);
    }

    #[test]
    fn test_from_reader_empty_dataset() {
        let result = LibSvmDataset::from_reader(Cursor::new("# Only comments\n\n"));
        assert!(matches!(result, Err(Error::EmptyDataset)));
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(temp_file, "+1 1:0.5 3:1.2").expect("Failed to write");
        writeln!(temp_file, "-1 2:0.3 5:2.1").expect("Failed to write");
        temp_file.flush().expect("Failed to flush");

        let dataset = LibSvmDataset::from_file(temp_file.path()).unwrap();
        assert_eq!(dataset.x.cols(), 5);

        let missing = LibSvmDataset::from_file("/non/existent/file.libsvm");
        assert!(matches!(missing, Err(Error::IoError(_))));
    }
}

//! CSV loader producing dense inputs
//!
//! Every non-empty, non-comment line is one sample. With labels enabled the
//! last column is the label and all other columns are features. A first row
//! made mostly of non-numeric fields is treated as a header.

use crate::core::{DenseMatrix, Error, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Dense samples with optional labels
#[derive(Debug, Clone, PartialEq)]
pub struct CsvDataset {
    pub x: DenseMatrix,
    pub labels: Option<Vec<f64>>,
}

impl CsvDataset {
    /// Load a dataset from a CSV file
    pub fn from_file<P: AsRef<Path>>(path: P, has_labels: bool) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), has_labels)
    }

    /// Load a dataset from a reader, detecting a header row
    pub fn from_reader<R: BufRead>(reader: R, has_labels: bool) -> Result<Self> {
        Self::from_reader_with_options(reader, has_labels, true)
    }

    /// Load a dataset from a reader with explicit header detection
    pub fn from_reader_with_options<R: BufRead>(
        reader: R,
        has_labels: bool,
        auto_detect_header: bool,
    ) -> Result<Self> {
        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut labels = Vec::new();
        let mut seen_data = false;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if !seen_data && auto_detect_header && Self::is_header_line(line) {
                seen_data = true;
                continue;
            }
            seen_data = true;

            let (features, label) = Self::parse_data_line(line, has_labels)
                .map_err(|e| Error::ParseError(format!("line {}: {e}", line_num + 1)))?;
            if let Some(first) = rows.first() {
                if first.len() != features.len() {
                    return Err(Error::ParseError(format!(
                        "line {}: expected {} features, found {}",
                        line_num + 1,
                        first.len(),
                        features.len()
                    )));
                }
            }
            rows.push(features);
            labels.extend(label);
        }

        if rows.is_empty() {
            return Err(Error::EmptyDataset);
        }

        Ok(Self {
            x: DenseMatrix::from_rows(&rows)?,
            labels: has_labels.then_some(labels),
        })
    }

    /// Check if a line appears to be a header
    fn is_header_line(line: &str) -> bool {
        let fields: Vec<&str> = line.split(',').collect();
        let non_numeric = fields
            .iter()
            .filter(|field| field.trim().parse::<f64>().is_err())
            .count();
        non_numeric * 2 > fields.len()
    }

    fn parse_data_line(line: &str, has_labels: bool) -> Result<(Vec<f64>, Option<f64>)> {
        let mut values = line
            .split(',')
            .map(|field| {
                let field = field.trim();
                field
                    .parse::<f64>()
                    .map_err(|_| Error::ParseError(format!("invalid number '{field}'")))
            })
            .collect::<Result<Vec<_>>>()?;

        if !has_labels {
            return Ok((values, None));
        }
        if values.len() < 2 {
            return Err(Error::ParseError(format!("too few fields: {line}")));
        }
        let label = values.pop();
        Ok((values, label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_csv_basic() {
        let data = "1.0,2.0,1\n3.0,4.0,-1\n";
        let dataset = CsvDataset::from_reader(Cursor::new(data), true).unwrap();

        assert_eq!(dataset.x.shape(), (2, 2));
        assert_eq!(dataset.x.row(1), &[3.0, 4.0]);
        assert_eq!(dataset.labels, Some(vec![1.0, -1.0]));
    }

    #[test]
    fn test_csv_without_labels() {
        let data = "1.0,2.0,5\n3.0,4.0,6\n";
        let dataset = CsvDataset::from_reader(Cursor::new(data), false).unwrap();
        assert_eq!(dataset.x.shape(), (2, 3));
        assert!(dataset.labels.is_none());
    }

    #[test]
    fn test_csv_with_headers() {
        let data = "feature1,feature2,label\n1.0,2.0,7\n3.0,4.0,0.5\n";
        let dataset = CsvDataset::from_reader(Cursor::new(data), true).unwrap();

        assert_eq!(dataset.x.rows(), 2);
        // Labels are kept as written.
        assert_eq!(dataset.labels, Some(vec![7.0, 0.5]));
    }

    #[test]
    fn test_csv_manual_header_control() {
        let data = "a,b,c\n";
        let result = CsvDataset::from_reader_with_options(Cursor::new(data), false, false);
        assert!(matches!(result, Err(Error::ParseError(_))));
    }

    #[test]
    fn test_csv_empty_lines_and_comments() {
        let data = "# Comment\n1.0,2.0,1\n\n3.0,4.0,-1\n";
        let dataset = CsvDataset::from_reader(Cursor::new(data), true).unwrap();
        assert_eq!(dataset.x.rows(), 2);

        let result = CsvDataset::from_reader(Cursor::new("# nothing\n"), true);
        assert!(matches!(result, Err(Error::EmptyDataset)));
    }

    #[test]
    fn test_csv_invalid_format() {
        assert!(CsvDataset::from_reader(Cursor::new("1.0\n"), true).is_err());
        assert!(CsvDataset::from_reader(Cursor::new("1.0,abc,-1\n"), true).is_err());
        // Ragged rows
        assert!(CsvDataset::from_reader(Cursor::new("1,2,3\n1,2\n"), false).is_err());
    }

    #[test]
    fn test_is_header_line() {
        assert!(CsvDataset::is_header_line("feature1,feature2,label"));
        assert!(CsvDataset::is_header_line("x1,x2,x3,y"));
        assert!(!CsvDataset::is_header_line("1.0,2.0,3.0,1"));
    }

    #[test]
    fn test_from_file_io_error() {
        let result = CsvDataset::from_file("/non/existent/file.csv", true);
        assert!(matches!(result, Err(Error::IoError(_))));
    }
}

//! Dataset loaders for the command line tool

pub mod csv;
pub mod libsvm;

pub use self::csv::CsvDataset;
pub use self::libsvm::LibSvmDataset;

use crate::core::{InputData, Result};
use std::path::Path;

/// Input data and labels read from a file
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedData {
    pub x: InputData,
    pub labels: Option<Vec<f64>>,
}

/// Load a dataset, choosing the format from the file extension
///
/// `.libsvm`, `.svm` and `.svmlight` files load as sparse data with labels;
/// anything else is read as CSV, labelled when `has_labels` is set.
pub fn load<P: AsRef<Path>>(path: P, has_labels: bool) -> Result<LoadedData> {
    let path = path.as_ref();
    let sparse = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("libsvm" | "svm" | "svmlight")
    );

    if sparse {
        let dataset = LibSvmDataset::from_file(path)?;
        Ok(LoadedData {
            x: dataset.x.into(),
            labels: Some(dataset.labels),
        })
    } else {
        let dataset = CsvDataset::from_file(path, has_labels)?;
        Ok(LoadedData {
            x: dataset.x.into(),
            labels: dataset.labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_load_by_extension() {
        let mut csv = Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(csv, "1.0,2.0,0").unwrap();
        let loaded = load(csv.path(), true).unwrap();
        assert!(!loaded.x.is_sparse());
        assert_eq!(loaded.labels, Some(vec![0.0]));

        let mut svm = Builder::new().suffix(".libsvm").tempfile().unwrap();
        writeln!(svm, "2 1:1.0").unwrap();
        let loaded = load(svm.path(), false).unwrap();
        assert!(loaded.x.is_sparse());
        assert_eq!(loaded.labels, Some(vec![2.0]));
    }
}

//! Core data descriptors shared by the dispatch core and the engines

use crate::core::{Error, Result};
use crate::neighbors::Algorithm;
use std::fmt;

/// Element type of a dense input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Float32,
    Float64,
    Int64,
}

impl DType {
    /// Floating types are the only ones native engines consume directly
    pub fn is_floating(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Float32 => "float32",
            DType::Float64 => "float64",
            DType::Int64 => "int64",
        }
    }

    /// Floating type of a result computed from `self` and `other`
    ///
    /// Two `Float32` operands stay `Float32`; anything else widens to `Float64`.
    pub fn promote(self, other: DType) -> DType {
        match (self, other) {
            (DType::Float32, DType::Float32) => DType::Float32,
            _ => DType::Float64,
        }
    }

    /// Round a value to what this dtype can represent
    pub fn coerce(self, value: f64) -> f64 {
        match self {
            DType::Float32 => value as f32 as f64,
            DType::Float64 => value,
            DType::Int64 => value.trunc(),
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Row-major dense matrix tagged with its logical element type
///
/// Values are held as `f64`; a `Float32` matrix only ever holds values that
/// round-trip through `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    data: Vec<f64>,
    rows: usize,
    cols: usize,
    dtype: DType,
}

impl DenseMatrix {
    /// Create a matrix from row-major values
    pub fn new(rows: usize, cols: usize, data: Vec<f64>, dtype: DType) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::DimensionMismatch {
                expected: rows * cols,
                actual: data.len(),
            });
        }
        let data = data.into_iter().map(|v| dtype.coerce(v)).collect();
        Ok(Self {
            data,
            rows,
            cols,
            dtype,
        })
    }

    pub fn from_f64(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        Self::new(rows, cols, data, DType::Float64)
    }

    pub fn from_f32(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        Self::new(
            rows,
            cols,
            data.into_iter().map(f64::from).collect(),
            DType::Float32,
        )
    }

    pub fn from_i64(rows: usize, cols: usize, data: Vec<i64>) -> Result<Self> {
        Self::new(
            rows,
            cols,
            data.into_iter().map(|v| v as f64).collect(),
            DType::Int64,
        )
    }

    /// Build a `Float64` matrix from equally sized rows
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map(Vec::len).ok_or(Error::EmptyDataset)?;
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return Err(Error::DimensionMismatch {
                    expected: cols,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Self::from_f64(rows.len(), cols, data)
    }

    /// An `n x 1` column vector
    pub fn column(values: Vec<f64>, dtype: DType) -> Self {
        let rows = values.len();
        Self {
            data: values.into_iter().map(|v| dtype.coerce(v)).collect(),
            rows,
            cols: 1,
            dtype,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Get a row by index
    ///
    /// # Panics
    /// Panics if `i >= rows()`
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Copy with every value coerced to `dtype`
    pub fn to_dtype(&self, dtype: DType) -> Self {
        Self {
            data: self.data.iter().map(|&v| dtype.coerce(v)).collect(),
            rows: self.rows,
            cols: self.cols,
            dtype,
        }
    }

    /// Flatten a row or column vector into a 1-D sequence
    pub fn ravel(self) -> Result<Vec<f64>> {
        if self.cols == 1 || self.rows == 1 || self.data.is_empty() {
            Ok(self.data)
        } else {
            Err(Error::DimensionMismatch {
                expected: 1,
                actual: self.cols.min(self.rows),
            })
        }
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// New matrix made of the given rows, in order
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self {
            data,
            rows: indices.len(),
            cols: self.cols,
            dtype: self.dtype,
        }
    }

    /// Population variance over every element
    pub fn variance(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let n = self.data.len() as f64;
        let mean = self.data.iter().sum::<f64>() / n;
        self.data.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n
    }
}

/// Compressed sparse row matrix
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
    cols: usize,
}

impl CsrMatrix {
    /// Build from per-row `(indices, values)` pairs; indices are sorted per row
    pub fn from_sparse_rows(rows: Vec<(Vec<usize>, Vec<f64>)>, cols: usize) -> Result<Self> {
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        indptr.push(0);

        for (row_indices, row_values) in rows {
            if row_indices.len() != row_values.len() {
                return Err(Error::DimensionMismatch {
                    expected: row_indices.len(),
                    actual: row_values.len(),
                });
            }
            let mut pairs: Vec<_> = row_indices.into_iter().zip(row_values).collect();
            pairs.sort_by_key(|&(idx, _)| idx);
            for (idx, value) in pairs {
                if idx >= cols {
                    return Err(Error::InvalidInput(format!(
                        "column index {idx} out of bounds for {cols} columns"
                    )));
                }
                indices.push(idx);
                values.push(value);
            }
            indptr.push(indices.len());
        }

        Ok(Self {
            indptr,
            indices,
            values,
            cols,
        })
    }

    pub fn rows(&self) -> usize {
        self.indptr.len() - 1
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Stored entries of row `i`
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let span = self.indptr[i]..self.indptr[i + 1];
        (&self.indices[span.clone()], &self.values[span])
    }

    /// Row `i` expanded to a dense vector
    pub fn dense_row(&self, i: usize) -> Vec<f64> {
        let mut row = vec![0.0; self.cols];
        let (indices, values) = self.row(i);
        for (&idx, &value) in indices.iter().zip(values) {
            row[idx] = value;
        }
        row
    }

    pub fn to_dense(&self) -> DenseMatrix {
        let mut data = Vec::with_capacity(self.rows() * self.cols);
        for i in 0..self.rows() {
            data.extend(self.dense_row(i));
        }
        DenseMatrix {
            data,
            rows: self.rows(),
            cols: self.cols,
            dtype: DType::Float64,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// Who holds the fitted state of a facade
///
/// Exactly one authority exists at a time: the reference attributes `A`, or
/// the accelerated engine handle `H` together with the reference-shaped
/// attributes mirrored from it.
#[derive(Debug, Default)]
pub enum FitState<A, H> {
    #[default]
    Unfitted,
    Reference(A),
    Accelerated { attrs: A, handle: H },
}

impl<A, H> FitState<A, H> {
    /// Reference-shaped attributes, whichever path produced them
    pub fn attrs(&self) -> Option<&A> {
        match self {
            FitState::Unfitted => None,
            FitState::Reference(attrs) | FitState::Accelerated { attrs, .. } => Some(attrs),
        }
    }

    pub fn handle(&self) -> Option<&H> {
        match self {
            FitState::Accelerated { handle, .. } => Some(handle),
            _ => None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        !matches!(self, FitState::Unfitted)
    }

    pub fn is_accelerated(&self) -> bool {
        matches!(self, FitState::Accelerated { .. })
    }
}

/// An already-built search structure handed in place of raw data
#[derive(Debug, Clone, PartialEq)]
pub struct PrebuiltIndex {
    pub data: DenseMatrix,
    pub method: Algorithm,
}

/// Everything a patched method may receive as its data argument
#[derive(Debug, Clone, PartialEq)]
pub enum InputData {
    Dense(DenseMatrix),
    Sparse(CsrMatrix),
    Index(PrebuiltIndex),
}

impl InputData {
    pub fn n_samples(&self) -> usize {
        match self {
            InputData::Dense(m) => m.rows(),
            InputData::Sparse(m) => m.rows(),
            InputData::Index(index) => index.data.rows(),
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            InputData::Dense(m) => m.cols(),
            InputData::Sparse(m) => m.cols(),
            InputData::Index(index) => index.data.cols(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, InputData::Sparse(_))
    }

    /// Dense matrix with a floating dtype, the shape native engines accept
    pub fn as_native(&self) -> Option<&DenseMatrix> {
        match self {
            InputData::Dense(m) if m.dtype().is_floating() => Some(m),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InputData::Dense(_) => "dense",
            InputData::Sparse(_) => "sparse",
            InputData::Index(_) => "prebuilt index",
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            InputData::Dense(m) => m.is_finite(),
            InputData::Sparse(m) => m.is_finite(),
            InputData::Index(index) => index.data.is_finite(),
        }
    }
}

impl From<DenseMatrix> for InputData {
    fn from(m: DenseMatrix) -> Self {
        InputData::Dense(m)
    }
}

impl From<CsrMatrix> for InputData {
    fn from(m: CsrMatrix) -> Self {
        InputData::Sparse(m)
    }
}

impl From<PrebuiltIndex> for InputData {
    fn from(index: PrebuiltIndex) -> Self {
        InputData::Index(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_from_rows() {
        let m = DenseMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(m.shape(), (2, 2));
        assert_eq!(m.row(1), &[3.0, 4.0]);
        assert_eq!(m.dtype(), DType::Float64);
    }

    #[test]
    fn test_dense_ragged_rows_rejected() {
        let result = DenseMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]);
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
        assert!(matches!(
            DenseMatrix::from_rows(&[]),
            Err(Error::EmptyDataset)
        ));
    }

    #[test]
    fn test_float32_values_are_rounded() {
        let m = DenseMatrix::from_f64(1, 1, vec![0.1]).unwrap();
        let m32 = m.to_dtype(DType::Float32);
        assert_eq!(m32.as_slice()[0], 0.1f32 as f64);
        assert_ne!(m32.as_slice()[0], 0.1);
    }

    #[test]
    fn test_ravel_column_only() {
        let column = DenseMatrix::column(vec![1.0, 2.0, 3.0], DType::Float64);
        assert_eq!(column.ravel().unwrap(), vec![1.0, 2.0, 3.0]);

        let square = DenseMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert!(square.ravel().is_err());
    }

    #[test]
    fn test_dtype_promotion() {
        assert_eq!(DType::Float32.promote(DType::Float32), DType::Float32);
        assert_eq!(DType::Float32.promote(DType::Float64), DType::Float64);
        assert_eq!(DType::Int64.promote(DType::Float32), DType::Float64);
    }

    #[test]
    fn test_fit_state_authority() {
        let mut state: FitState<u8, &str> = FitState::default();
        assert!(!state.is_fitted());
        assert_eq!(state.attrs(), None);

        state = FitState::Reference(1);
        assert_eq!(state.attrs(), Some(&1));
        assert_eq!(state.handle(), None);

        state = FitState::Accelerated {
            attrs: 2,
            handle: "engine",
        };
        assert!(state.is_accelerated());
        assert_eq!(state.attrs(), Some(&2));
        assert_eq!(state.handle(), Some(&"engine"));
    }

    #[test]
    fn test_variance() {
        let m = DenseMatrix::from_rows(&[vec![1.0, 3.0], vec![1.0, 3.0]]).unwrap();
        assert_eq!(m.variance(), 1.0);
    }

    #[test]
    fn test_csr_rows() {
        let csr =
            CsrMatrix::from_sparse_rows(vec![(vec![2, 0], vec![3.0, 1.0]), (vec![], vec![])], 3)
                .unwrap();
        assert_eq!(csr.rows(), 2);
        assert_eq!(csr.nnz(), 2);
        assert_eq!(csr.row(0), (&[0usize, 2][..], &[1.0, 3.0][..]));
        assert_eq!(csr.dense_row(0), vec![1.0, 0.0, 3.0]);
        assert_eq!(csr.dense_row(1), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_csr_out_of_bounds_column() {
        let result = CsrMatrix::from_sparse_rows(vec![(vec![5], vec![1.0])], 3);
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_input_native_view() {
        let dense = InputData::from(DenseMatrix::from_rows(&[vec![1.0]]).unwrap());
        assert!(dense.as_native().is_some());

        let ints = InputData::from(DenseMatrix::from_i64(1, 1, vec![1]).unwrap());
        assert!(ints.as_native().is_none());

        let sparse = InputData::from(CsrMatrix::from_sparse_rows(vec![], 2).unwrap());
        assert!(sparse.is_sparse());
        assert!(sparse.as_native().is_none());
    }
}

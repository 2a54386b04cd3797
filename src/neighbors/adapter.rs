//! Conversion of engine results into the reference result contract

use crate::core::{DType, DenseMatrix, Error, InputData, Result};
use crate::neighbors::engine::{NativeNeighbors, NeighborsFit, NeighborsModel};
use crate::neighbors::FitPlan;

/// k-nearest-neighbor result, `n_queries x k`
#[derive(Debug, Clone, PartialEq)]
pub struct KNeighbors {
    /// Absent when distances were not requested
    pub distances: Option<DenseMatrix>,
    pub indices: Vec<Vec<usize>>,
}

impl KNeighbors {
    /// Pack per-query `(distance, index)` rows of equal length
    pub(crate) fn from_rows(
        rows: Vec<Vec<(f64, usize)>>,
        dtype: DType,
        return_distance: bool,
    ) -> Result<Self> {
        let n_queries = rows.len();
        let k = rows.first().map_or(0, Vec::len);
        let indices = rows
            .iter()
            .map(|row| row.iter().map(|&(_, j)| j).collect())
            .collect();
        let distances = if return_distance {
            let flat = rows.iter().flatten().map(|&(d, _)| d).collect();
            Some(DenseMatrix::new(n_queries, k, flat, dtype)?)
        } else {
            None
        };
        Ok(Self { distances, indices })
    }

    pub fn n_queries(&self) -> usize {
        self.indices.len()
    }

    pub fn n_neighbors(&self) -> usize {
        self.indices.first().map_or(0, Vec::len)
    }
}

/// Radius query result; each query has its own neighbor count
#[derive(Debug, Clone, PartialEq)]
pub struct RadiusNeighbors {
    pub distances: Option<Vec<Vec<f64>>>,
    pub indices: Vec<Vec<usize>>,
}

impl RadiusNeighbors {
    pub(crate) fn from_rows(rows: Vec<Vec<(f64, usize)>>, dtype: DType, return_distance: bool) -> Self {
        let indices = rows
            .iter()
            .map(|row| row.iter().map(|&(_, j)| j).collect())
            .collect();
        let distances = return_distance.then(|| {
            rows.iter()
                .map(|row| row.iter().map(|&(d, _)| dtype.coerce(d)).collect())
                .collect()
        });
        Self { distances, indices }
    }
}

/// Remove each training sample from its own neighbor row
///
/// Rows hold `k + 1` candidates. When duplicates push a sample out of its own
/// row, the farthest candidate is dropped instead.
pub(crate) fn drop_self(rows: &mut [Vec<(f64, usize)>]) {
    for (i, row) in rows.iter_mut().enumerate() {
        match row.iter().position(|&(_, j)| j == i) {
            Some(pos) => {
                row.remove(pos);
            }
            None => {
                row.pop();
            }
        }
    }
}

/// Reshape a native k-NN result into the reference layout
///
/// With `exclude_self` the native result holds `k + 1` columns for a query on
/// the training set and each sample's own index is dropped.
pub fn adapt_kneighbors(
    native: NativeNeighbors,
    dtype: DType,
    return_distance: bool,
    exclude_self: bool,
) -> Result<KNeighbors> {
    let NativeNeighbors {
        distances,
        indices,
        n_queries,
        k,
    } = native;
    if distances.len() != n_queries * k || indices.len() != n_queries * k {
        return Err(Error::Incompatible(format!(
            "engine returned {} distances and {} indices for {n_queries} x {k}",
            distances.len(),
            indices.len()
        )));
    }

    let mut rows = Vec::with_capacity(n_queries);
    for (d_row, i_row) in distances.chunks(k.max(1)).zip(indices.chunks(k.max(1))) {
        let row = d_row
            .iter()
            .zip(i_row)
            .map(|(&d, &j)| {
                if j >= 0.0 && j.fract() == 0.0 {
                    Ok((d, j as usize))
                } else {
                    Err(Error::Incompatible(format!("engine returned index {j}")))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        rows.push(row);
    }

    if exclude_self {
        drop_self(&mut rows);
    }
    KNeighbors::from_rows(rows, dtype, return_distance)
}

/// Reference-shaped attributes read from an engine model
pub fn adapt_fit(model: &dyn NeighborsModel, plan: &FitPlan) -> Result<NeighborsFit> {
    let fit_x = model.fit_x().ok_or(Error::MissingAttribute("_fit_X"))?;
    let n_samples_fit = model
        .n_samples_fit()
        .ok_or(Error::MissingAttribute("n_samples_fit_"))?;
    let fit_method = model
        .fit_method()
        .ok_or(Error::MissingAttribute("_fit_method"))?;

    if n_samples_fit != fit_x.rows() {
        return Err(Error::Incompatible(format!(
            "engine reports {n_samples_fit} samples but holds {}",
            fit_x.rows()
        )));
    }

    Ok(NeighborsFit {
        fit_x: InputData::Dense(fit_x.clone()),
        n_samples_fit,
        n_features_in: fit_x.cols(),
        fit_method,
        effective: plan.effective,
    })
}

/// Decode a column of class indices through the fitted classes
pub fn decode_classes(column: DenseMatrix, classes: &[f64]) -> Result<Vec<f64>> {
    column
        .ravel()?
        .into_iter()
        .map(|code| {
            let class = if code >= 0.0 && code.fract() == 0.0 {
                classes.get(code as usize).copied()
            } else {
                None
            };
            class.ok_or_else(|| Error::Incompatible(format!("engine returned class code {code}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native(distances: Vec<f64>, indices: Vec<f64>, n_queries: usize, k: usize) -> NativeNeighbors {
        NativeNeighbors {
            distances,
            indices,
            n_queries,
            k,
        }
    }

    #[test]
    fn test_adapt_reshapes_and_casts() {
        let raw = native(vec![0.0, 0.1, 0.0, 0.2], vec![0.0, 1.0, 1.0, 0.0], 2, 2);
        let result = adapt_kneighbors(raw, DType::Float32, true, false).unwrap();

        assert_eq!(result.indices, vec![vec![0, 1], vec![1, 0]]);
        let distances = result.distances.unwrap();
        assert_eq!(distances.shape(), (2, 2));
        assert_eq!(distances.dtype(), DType::Float32);
        assert_eq!(distances.as_slice()[1], 0.1f32 as f64);
    }

    #[test]
    fn test_adapt_without_distances() {
        let raw = native(vec![0.0, 1.0], vec![0.0, 1.0], 1, 2);
        let result = adapt_kneighbors(raw, DType::Float64, false, false).unwrap();
        assert!(result.distances.is_none());
        assert_eq!(result.n_neighbors(), 2);
    }

    #[test]
    fn test_adapt_excludes_self() {
        // Second query has a duplicate sitting ahead of itself.
        let raw = native(
            vec![0.0, 1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 2.0],
            2,
            2,
        );
        let result = adapt_kneighbors(raw, DType::Float64, true, true).unwrap();
        assert_eq!(result.indices, vec![vec![1], vec![0]]);
    }

    #[test]
    fn test_adapt_rejects_malformed_output() {
        let short = native(vec![0.0], vec![0.0, 1.0], 1, 2);
        assert!(matches!(
            adapt_kneighbors(short, DType::Float64, true, false),
            Err(Error::Incompatible(_))
        ));
        let negative = native(vec![0.0], vec![-1.0], 1, 1);
        assert!(adapt_kneighbors(negative, DType::Float64, true, false).is_err());
    }

    #[test]
    fn test_decode_classes() {
        let column = DenseMatrix::column(vec![1.0, 0.0, 1.0], DType::Float64);
        let decoded = decode_classes(column, &[-1.0, 7.0]).unwrap();
        assert_eq!(decoded, vec![7.0, -1.0, 7.0]);

        let out_of_range = DenseMatrix::column(vec![2.0], DType::Float64);
        assert!(decode_classes(out_of_range, &[0.0, 1.0]).is_err());
    }
}

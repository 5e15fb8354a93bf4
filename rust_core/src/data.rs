use crate::{Error, Result};

/// A fixed table of observations stored contiguously in row-major layout.
///
/// Each row holds `input_dim` covariates followed by `target_dim` targets.
/// The table is immutable once built; the sampler only ever borrows it.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    values: Vec<f64>,
    rows: usize,
    input_dim: usize,
    target_dim: usize,
}

impl Dataset {
    /// Build a dataset from a flat row-major buffer.
    pub fn new(values: Vec<f64>, input_dim: usize, target_dim: usize) -> Result<Self> {
        if input_dim == 0 || target_dim == 0 {
            return Err(Error::InvalidShape(format!(
                "dataset needs at least one covariate and one target column, got {input_dim} + {target_dim}"
            )));
        }
        let cols = input_dim + target_dim;
        if values.is_empty() || values.len() % cols != 0 {
            return Err(Error::InvalidShape(format!(
                "buffer of length {} is not a non-empty multiple of {cols} columns",
                values.len()
            )));
        }
        if let Some(pos) = values.iter().position(|v| !v.is_finite()) {
            return Err(Error::InvalidData(format!(
                "non-finite value at row {}, column {}",
                pos / cols,
                pos % cols
            )));
        }
        Ok(Self {
            rows: values.len() / cols,
            values,
            input_dim,
            target_dim,
        })
    }

    /// Build a dataset from a list of full rows (covariates then targets).
    pub fn from_rows(rows: &[Vec<f64>], input_dim: usize) -> Result<Self> {
        let first = rows
            .first()
            .ok_or_else(|| Error::InvalidShape("dataset has no rows".to_owned()))?;
        let cols = first.len();
        if cols <= input_dim {
            return Err(Error::InvalidShape(format!(
                "rows have {cols} columns but {input_dim} covariates leave no target"
            )));
        }

        let mut values = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(Error::InvalidShape(format!(
                    "row {i} has {} columns, expected {cols}",
                    row.len()
                )));
            }
            values.extend_from_slice(row);
        }
        Self::new(values, input_dim, cols - input_dim)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    #[inline]
    pub fn target_dim(&self) -> usize {
        self.target_dim
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.input_dim + self.target_dim
    }

    /// Full row `i` (covariates followed by targets).
    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        let cols = self.cols();
        &self.values[i * cols..(i + 1) * cols]
    }

    #[inline]
    pub fn covariates(&self, i: usize) -> &[f64] {
        &self.row(i)[..self.input_dim]
    }

    #[inline]
    pub fn targets(&self, i: usize) -> &[f64] {
        &self.row(i)[self.input_dim..]
    }

    /// The first target column, one value per row. This is what the
    /// likelihood compares predictions against.
    pub fn target_column(&self) -> Vec<f64> {
        (0..self.rows).map(|i| self.targets(i)[0]).collect()
    }
}

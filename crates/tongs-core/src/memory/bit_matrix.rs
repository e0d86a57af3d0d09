use std::fmt;

use thiserror::Error;

use crate::util::{bit, parity};

/// Errors from GF(2) matrix operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatrixError {
    /// Gauss-Jordan elimination found no pivot for a column
    #[error("matrix is singular: no pivot for column {column}")]
    SingularMatrix {
        /// First column without a pivot
        column: usize,
    },
    /// Operand dimensions do not match
    #[error("dimension mismatch: {left} vs {right}")]
    DimensionMismatch {
        /// Dimension of the left operand
        left: usize,
        /// Dimension of the right operand
        right: usize,
    },
}

/// Square matrix over GF(2), one `u64` bit mask per row.
///
/// Row `i` maps an input vector `x` to output bit `i` as `parity(row[i] & x)`, so
/// a matrix of `dim <= 64` rows is applied to an address in one pass of popcounts.
#[derive(Clone, PartialEq, Eq)]
pub struct BitMatrix {
    rows: Vec<u64>,
}

impl BitMatrix {
    /// Builds a matrix from its rows.
    ///
    /// # Panics
    ///
    /// Panics for more than 64 rows or when a row has bits at or above `rows.len()`.
    pub fn from_rows(rows: Vec<u64>) -> Self {
        let dim = rows.len();
        assert!(dim <= 64, "at most 64 rows supported, got {}", dim);
        if dim < 64 {
            for (i, row) in rows.iter().enumerate() {
                assert!(row >> dim == 0, "row {} = 0x{:x} exceeds dimension {}", i, row, dim);
            }
        }
        BitMatrix { rows }
    }

    /// The identity matrix of dimension `dim`.
    pub fn identity(dim: usize) -> Self {
        Self::from_rows((0..dim).map(bit).collect())
    }

    /// Number of rows (and columns).
    pub fn dim(&self) -> usize {
        self.rows.len()
    }

    /// The row masks.
    pub fn rows(&self) -> &[u64] {
        &self.rows
    }

    /// Computes `M · x`.
    #[inline]
    pub fn apply(&self, x: u64) -> u64 {
        self.rows
            .iter()
            .enumerate()
            .fold(0, |acc, (i, row)| acc | ((parity(row & x) as u64) << i))
    }

    /// Computes `self · rhs`.
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::DimensionMismatch`] if the dimensions differ.
    pub fn mul(&self, rhs: &BitMatrix) -> Result<BitMatrix, MatrixError> {
        if self.dim() != rhs.dim() {
            return Err(MatrixError::DimensionMismatch {
                left: self.dim(),
                right: rhs.dim(),
            });
        }
        let rows = self
            .rows
            .iter()
            .map(|&row| {
                (0..rhs.dim())
                    .filter(|&j| row & bit(j) != 0)
                    .fold(0, |acc, j| acc ^ rhs.rows[j])
            })
            .collect();
        Ok(BitMatrix { rows })
    }

    /// Inverts the matrix with Gauss-Jordan elimination over GF(2).
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::SingularMatrix`] if the matrix has no inverse.
    pub fn inverse(&self) -> Result<BitMatrix, MatrixError> {
        let dim = self.dim();
        let mut m = self.rows.clone();
        let mut inv = Self::identity(dim).rows;

        for col in 0..dim {
            let pivot = (col..dim)
                .find(|&r| m[r] & bit(col) != 0)
                .ok_or(MatrixError::SingularMatrix { column: col })?;
            m.swap(col, pivot);
            inv.swap(col, pivot);
            for r in col + 1..dim {
                if m[r] & bit(col) != 0 {
                    m[r] ^= m[col];
                    inv[r] ^= inv[col];
                }
            }
        }
        for col in (0..dim).rev() {
            for r in 0..col {
                if m[r] & bit(col) != 0 {
                    m[r] ^= m[col];
                    inv[r] ^= inv[col];
                }
            }
        }
        debug_assert!(m.iter().enumerate().all(|(i, &row)| row == bit(i)));
        Ok(BitMatrix { rows: inv })
    }
}

impl fmt::Debug for BitMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BitMatrix({}x{}) [", self.dim(), self.dim())?;
        let width = self.dim().max(1);
        for row in &self.rows {
            writeln!(f, "  {:0width$b}", row, width = width)?;
        }
        write!(f, "]")
    }
}

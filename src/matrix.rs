//! Dense row-major matrices and the block operations used by partitioning and combining.

use std::{
    fmt,
    ops::{Mul, Range},
};

use num::{One, Zero};
use rand::{
    Rng,
    distr::uniform::{SampleRange, SampleUniform},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::DataError;

/// The numeric element types a job can multiply.
///
/// Implemented for every type that forms a ring under `+`/`*` and can travel over the wire,
/// e.g. `i32`, `i64`, `f64`.
pub trait Scalar:
    Copy
    + fmt::Debug
    + PartialEq
    + Zero
    + One
    + Mul<Output = Self>
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
    + 'static
{
}

impl<T> Scalar for T where
    T: Copy
        + fmt::Debug
        + PartialEq
        + Zero
        + One
        + Mul<Output = T>
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + 'static
{
}

/// A dense matrix stored in row-major order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMatrix<T>")]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

/// Unchecked wire form of a [`Matrix`], validated on deserialization.
#[derive(Deserialize)]
struct RawMatrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T> TryFrom<RawMatrix<T>> for Matrix<T> {
    type Error = DataError;

    fn try_from(raw: RawMatrix<T>) -> Result<Self, Self::Error> {
        Matrix::new(raw.rows, raw.cols, raw.data)
    }
}

impl<T> Matrix<T> {
    /// Creates a `rows`x`cols` matrix from row-major data.
    pub fn new(rows: usize, cols: usize, data: Vec<T>) -> Result<Self, DataError> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(DataError::InvalidLength {
                rows,
                cols,
                actual: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Creates a matrix from a list of equally long rows.
    pub fn from_rows(rows: Vec<Vec<T>>) -> Result<Self, DataError> {
        let n_rows = rows.len();
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(n_rows * cols);
        for row in rows {
            if row.len() != cols {
                return Err(DataError::InvalidLength {
                    rows: n_rows,
                    cols,
                    actual: row.len(),
                });
            }
            data.extend(row);
        }
        Ok(Self {
            rows: n_rows,
            cols,
            data,
        })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// The element at `(row, col)`.
    ///
    /// # Panics
    /// If the position is out of bounds.
    pub fn get(&self, row: usize, col: usize) -> &T {
        assert!(row < self.rows && col < self.cols, "({row}, {col}) out of bounds");
        &self.data[row * self.cols + col]
    }

    /// A row as a slice.
    pub fn row(&self, row: usize) -> &[T] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// The elements in row-major order.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// The number of elements of `self × rhs`, failing if it exceeds `max`.
    pub fn product_len<U>(&self, rhs: &Matrix<U>, max: usize) -> Result<usize, DataError> {
        self.rows
            .checked_mul(rhs.cols)
            .filter(|&len| len <= max)
            .ok_or(DataError::ProductTooLarge {
                rows: self.rows,
                cols: rhs.cols,
                max,
            })
    }

    /// Applies `f` to every element.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> Matrix<U> {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(f).collect(),
        }
    }

    /// Applies `f` to every element, stopping at the first error.
    pub fn try_map<U, E>(&self, f: impl FnMut(&T) -> Result<U, E>) -> Result<Matrix<U>, E> {
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(f).collect::<Result<_, _>>()?,
        })
    }
}

impl<T: Clone> Matrix<T> {
    /// Copies the block spanning `rows` x `cols`.
    ///
    /// # Panics
    /// If a range reaches past the matrix.
    pub fn slice(&self, rows: Range<usize>, cols: Range<usize>) -> Matrix<T> {
        assert!(rows.end <= self.rows && cols.end <= self.cols);
        let mut data = Vec::with_capacity(rows.len() * cols.len());
        for r in rows.clone() {
            data.extend_from_slice(&self.row(r)[cols.clone()]);
        }
        Matrix {
            rows: rows.len(),
            cols: cols.len(),
            data,
        }
    }

    /// Stacks blocks on top of each other. All blocks must have the same width.
    pub fn vstack(blocks: &[Matrix<T>]) -> Result<Matrix<T>, DataError> {
        let first = blocks.first().ok_or(DataError::NoBlocks("stack vertically"))?;
        let mut data = Vec::with_capacity(blocks.iter().map(|b| b.data.len()).sum());
        for block in blocks {
            if block.cols != first.cols {
                return Err(DataError::ShapeMismatch {
                    op: "stack vertically",
                    left: first.shape(),
                    right: block.shape(),
                });
            }
            data.extend_from_slice(&block.data);
        }
        Ok(Matrix {
            rows: blocks.iter().map(|b| b.rows).sum(),
            cols: first.cols,
            data,
        })
    }

    /// Places blocks side by side. All blocks must have the same height.
    pub fn hstack(blocks: &[Matrix<T>]) -> Result<Matrix<T>, DataError> {
        let first = blocks.first().ok_or(DataError::NoBlocks("stack horizontally"))?;
        if let Some(block) = blocks.iter().find(|b| b.rows != first.rows) {
            return Err(DataError::ShapeMismatch {
                op: "stack horizontally",
                left: first.shape(),
                right: block.shape(),
            });
        }
        let cols = blocks.iter().map(|b| b.cols).sum();
        let mut data = Vec::with_capacity(first.rows * cols);
        for r in 0..first.rows {
            for block in blocks {
                data.extend_from_slice(block.row(r));
            }
        }
        Ok(Matrix {
            rows: first.rows,
            cols,
            data,
        })
    }
}

impl<T> Matrix<T>
where
    T: Clone + Zero,
{
    /// A matrix of zeros.
    pub fn zeros(rows: usize, cols: usize) -> Matrix<T> {
        Matrix {
            rows,
            cols,
            data: vec![T::zero(); rows * cols],
        }
    }

    /// Element-wise sum.
    pub fn add(&self, rhs: &Matrix<T>) -> Result<Matrix<T>, DataError> {
        if self.shape() != rhs.shape() {
            return Err(DataError::ShapeMismatch {
                op: "add",
                left: self.shape(),
                right: rhs.shape(),
            });
        }
        let data = self
            .data
            .iter()
            .zip(&rhs.data)
            .map(|(a, b)| a.clone() + b.clone())
            .collect();
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }
}

impl<T> Matrix<T>
where
    T: Clone + Zero + Mul<Output = T>,
{
    /// Row-by-column product `self × rhs`.
    pub fn multiply(&self, rhs: &Matrix<T>) -> Result<Matrix<T>, DataError> {
        if self.cols != rhs.rows {
            return Err(DataError::ShapeMismatch {
                op: "multiply",
                left: self.shape(),
                right: rhs.shape(),
            });
        }
        let mut data = Vec::with_capacity(self.product_len(rhs, usize::MAX)?);
        for i in 0..self.rows {
            let row = self.row(i);
            for j in 0..rhs.cols {
                let mut acc = T::zero();
                for (k, a) in row.iter().enumerate() {
                    acc = acc + a.clone() * rhs.data[k * rhs.cols + j].clone();
                }
                data.push(acc);
            }
        }
        Ok(Matrix {
            rows: self.rows,
            cols: rhs.cols,
            data,
        })
    }
}

impl<T: SampleUniform> Matrix<T> {
    /// A matrix with elements drawn uniformly from `range`.
    pub fn random<R, S>(rows: usize, cols: usize, range: S, rng: &mut R) -> Matrix<T>
    where
        R: Rng,
        S: SampleRange<T> + Clone,
    {
        let data = (0..rows * cols)
            .map(|_| rng.random_range(range.clone()))
            .collect();
        Matrix { rows, cols, data }
    }
}

impl<T: fmt::Display> fmt::Display for Matrix<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in 0..self.rows {
            f.write_str("[")?;
            for (c, value) in self.row(r).iter().enumerate() {
                if c > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{value}")?;
            }
            f.write_str("]")?;
            if r + 1 < self.rows {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

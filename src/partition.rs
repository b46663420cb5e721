//! Splitting `A × B` into independent block products.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, matrix::Matrix};

/// How the left operand is cut: `horizontal` row bands, each split into `vertical` column
/// slices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    /// Number of row bands (H).
    pub horizontal: usize,
    /// Number of column slices per band (V).
    pub vertical: usize,
}

impl Layout {
    /// A layout of `horizontal` x `vertical` blocks.
    pub fn new(horizontal: usize, vertical: usize) -> Self {
        Self {
            horizontal,
            vertical,
        }
    }

    /// The number of tasks the layout produces.
    pub fn tasks(&self) -> usize {
        self.horizontal * self.vertical
    }

    /// Checks that an `a_shape` x `b_shape` product can be split with this layout.
    pub fn validate(
        &self,
        a_shape: (usize, usize),
        b_shape: (usize, usize),
    ) -> Result<(), ConfigError> {
        let (m, k) = a_shape;
        if k != b_shape.0 {
            return Err(ConfigError::IncompatibleShapes {
                a: a_shape,
                b: b_shape,
            });
        }
        if !(1..=m).contains(&self.horizontal) || !(1..=k).contains(&self.vertical) {
            return Err(ConfigError::InvalidLayout {
                layout: *self,
                rows: m,
                cols: k,
            });
        }
        Ok(())
    }
}

/// Splits `0..len` into `parts` contiguous ranges whose sizes differ by at most one.
///
/// The first `len % parts` ranges are the longer ones. `parts` must not be zero.
pub fn split_ranges(len: usize, parts: usize) -> Vec<Range<usize>> {
    let (base, extra) = (len / parts, len % parts);
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

/// One block product.
#[derive(Clone, Debug, PartialEq)]
pub struct Task<T> {
    /// Position of the block in the layout, `h * V + v`.
    pub index: usize,
    /// Block `(h, v)` of the left operand.
    pub a: Matrix<T>,
    /// Row band `v` of the right operand.
    pub b: Matrix<T>,
}

/// Cuts `A × B` into `H * V` tasks, in index order.
///
/// Summing the products of the tasks of one row band gives that band of `A × B`.
pub fn partition<T: Clone>(
    a: &Matrix<T>,
    b: &Matrix<T>,
    layout: Layout,
) -> Result<Vec<Task<T>>, ConfigError> {
    layout.validate(a.shape(), b.shape())?;
    let row_bands = split_ranges(a.rows(), layout.horizontal);
    let inner = split_ranges(a.cols(), layout.vertical);
    let b_bands: Vec<_> = inner
        .iter()
        .map(|range| b.slice(range.clone(), 0..b.cols()))
        .collect();

    let mut tasks = Vec::with_capacity(layout.tasks());
    for rows in &row_bands {
        for cols in &inner {
            let index = tasks.len();
            tasks.push(Task {
                index,
                a: a.slice(rows.clone(), cols.clone()),
                b: b_bands[index % layout.vertical].clone(),
            });
        }
    }
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_follow_array_split() {
        assert_eq!(split_ranges(7, 3), vec![0..3, 3..5, 5..7]);
        assert_eq!(split_ranges(4, 4), vec![0..1, 1..2, 2..3, 3..4]);
        assert_eq!(split_ranges(5, 1), vec![0..5]);
    }

    #[test]
    fn tasks_pair_blocks_with_matching_b_bands() {
        let a = Matrix::new(4, 4, (0..16).collect()).unwrap();
        let b = Matrix::new(4, 2, (0..8).collect()).unwrap();
        let tasks = partition(&a, &b, Layout::new(2, 2)).unwrap();
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks[1].a, a.slice(0..2, 2..4));
        assert_eq!(tasks[1].b, b.slice(2..4, 0..2));
        assert_eq!(tasks[2].a, a.slice(2..4, 0..2));
        assert_eq!(tasks[2].b, b.slice(0..2, 0..2));
        assert!(tasks.iter().enumerate().all(|(i, t)| t.index == i));
    }

    #[test]
    fn single_column_b() {
        let a = Matrix::new(3, 3, vec![1; 9]).unwrap();
        let b = Matrix::new(3, 1, vec![1, 2, 3]).unwrap();
        let tasks = partition(&a, &b, Layout::new(3, 2)).unwrap();
        assert_eq!(tasks[0].b.shape(), (2, 1));
        assert_eq!(tasks[1].b.shape(), (1, 1));
    }

    #[test]
    fn invalid_layouts_are_rejected() {
        let a = Matrix::<i32>::zeros(4, 3);
        let b = Matrix::<i32>::zeros(3, 2);
        assert!(matches!(
            partition(&a, &b, Layout::new(5, 1)),
            Err(ConfigError::InvalidLayout { .. })
        ));
        assert!(matches!(
            partition(&a, &b, Layout::new(1, 4)),
            Err(ConfigError::InvalidLayout { .. })
        ));
        assert!(matches!(
            partition(&a, &b, Layout::new(0, 1)),
            Err(ConfigError::InvalidLayout { .. })
        ));
        assert!(matches!(
            partition(&a, &Matrix::zeros(4, 2), Layout::new(1, 1)),
            Err(ConfigError::IncompatibleShapes { .. })
        ));
    }
}

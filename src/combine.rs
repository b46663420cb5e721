//! Folding the block products of a job back into `A × B`.

use std::collections::BTreeMap;

use num::Zero;

use crate::{error::DataError, matrix::Matrix, partition::Layout};

/// Block products keyed by task index.
pub type ResultTable<T> = BTreeMap<usize, Matrix<T>>;

/// Sums the `V` products of every row band and stacks the bands.
///
/// The table must hold exactly the indices `0..H * V`.
pub fn combine<T: Clone + Zero>(
    table: &ResultTable<T>,
    layout: Layout,
) -> Result<Matrix<T>, DataError> {
    let total = layout.tasks();
    if total == 0 {
        return Err(DataError::NoBlocks("combine"));
    }
    if let Some((&index, _)) = table.range(total..).next() {
        return Err(DataError::UnexpectedIndex { index, total });
    }
    if let Some(missing) = (0..total).find(|i| !table.contains_key(i)) {
        return Err(DataError::MissingIndex(missing));
    }

    let blocks: Vec<_> = table.values().collect();
    let bands = blocks
        .chunks(layout.vertical)
        .map(|band| {
            band[1..]
                .iter()
                .try_fold(band[0].clone(), |sum, block| sum.add(block))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Matrix::vstack(&bands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::partition;

    fn products(a: &Matrix<i64>, b: &Matrix<i64>, layout: Layout) -> ResultTable<i64> {
        partition(a, b, layout)
            .unwrap()
            .into_iter()
            .map(|t| (t.index, t.a.multiply(&t.b).unwrap()))
            .collect()
    }

    #[test]
    fn combines_to_dense_product() {
        let a = Matrix::new(5, 4, (0..20).collect()).unwrap();
        let b = Matrix::new(4, 3, (0..12).collect()).unwrap();
        let layout = Layout::new(3, 2);
        let table = products(&a, &b, layout);
        assert_eq!(combine(&table, layout).unwrap(), a.multiply(&b).unwrap());
    }

    #[test]
    fn missing_and_unexpected_indices() {
        let a = Matrix::new(2, 2, vec![1, 2, 3, 4]).unwrap();
        let layout = Layout::new(2, 2);
        let mut table = products(&a, &a, layout);

        table.remove(&2);
        assert_eq!(combine(&table, layout), Err(DataError::MissingIndex(2)));

        table.insert(2, Matrix::zeros(1, 2));
        table.insert(7, Matrix::zeros(1, 2));
        assert_eq!(
            combine(&table, layout),
            Err(DataError::UnexpectedIndex { index: 7, total: 4 })
        );
    }

    #[test]
    fn inconsistent_shapes() {
        let mut table = ResultTable::new();
        table.insert(0, Matrix::<i64>::zeros(2, 2));
        table.insert(1, Matrix::zeros(2, 3));
        assert!(matches!(
            combine(&table, Layout::new(1, 2)),
            Err(DataError::ShapeMismatch { op: "add", .. })
        ));
    }
}

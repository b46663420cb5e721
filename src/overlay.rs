//! Value-hiding overlay: redact operand entries behind placeholders and restore them afterwards.
//!
//! Before a task leaves the dispatcher, a random subset of the entries of its first operand is
//! replaced by placeholders `x[id]`. The worker multiplies symbolically and returns a matrix of
//! [`Expr`]essions over those placeholders. Only the dispatcher's [`Redactor`] knows the true
//! values; it substitutes them back and evaluates the expressions to a numeric block.
//!
//! This deters casual inspection of operand values by a worker. It is not a secret-sharing
//! scheme: the untouched entries and the structure of the result are visible to the worker.

use std::{
    collections::BTreeMap,
    ops::{Add, Mul, Range},
};

use num::Zero;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::{error::DataError, matrix::Matrix, matrix::Scalar};

/// A product of placeholders, as a sorted list of placeholder ids (repetitions allowed).
///
/// The empty monomial is the constant term.
type Monomial = Vec<u64>;

/// A polynomial over placeholder ids with coefficients in `T`.
///
/// Zero coefficients are never stored, so structurally equal expressions compare equal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Expr<T> {
    terms: BTreeMap<Monomial, T>,
}

impl<T: Scalar> Expr<T> {
    /// A known number.
    pub fn constant(value: T) -> Self {
        let mut terms = BTreeMap::new();
        if !value.is_zero() {
            terms.insert(vec![], value);
        }
        Self { terms }
    }

    /// The placeholder `x[id]`.
    pub fn placeholder(id: u64) -> Self {
        Self {
            terms: BTreeMap::from([(vec![id], T::one())]),
        }
    }

    /// The placeholder `x[id]` scaled by `coefficient`.
    pub fn scaled_placeholder(id: u64, coefficient: T) -> Self {
        let mut terms = BTreeMap::new();
        if !coefficient.is_zero() {
            terms.insert(vec![id], coefficient);
        }
        Self { terms }
    }

    /// The value of the expression if it contains no placeholder.
    pub fn as_constant(&self) -> Option<T> {
        match self.terms.len() {
            0 => Some(T::zero()),
            1 => self.terms.get(&vec![]).copied(),
            _ => None,
        }
    }

    /// Iterates over every placeholder id referenced by the expression.
    pub fn placeholders(&self) -> impl Iterator<Item = u64> + '_ {
        self.terms.keys().flatten().copied()
    }

    /// Substitutes every placeholder with `lookup(id)` and evaluates the result.
    ///
    /// Fails on the first id for which `lookup` has no value.
    pub fn evaluate(&self, lookup: impl Fn(u64) -> Option<T>) -> Result<T, DataError> {
        let mut acc = T::zero();
        for (monomial, coefficient) in &self.terms {
            let mut term = *coefficient;
            for &id in monomial {
                term = term * lookup(id).ok_or(DataError::UnknownPlaceholder(id))?;
            }
            acc = acc + term;
        }
        Ok(acc)
    }

    fn insert_term(&mut self, monomial: Monomial, coefficient: T) {
        let sum = match self.terms.remove(&monomial) {
            Some(existing) => existing + coefficient,
            None => coefficient,
        };
        if !sum.is_zero() {
            self.terms.insert(monomial, sum);
        }
    }
}

impl<T: Scalar> Add for Expr<T> {
    type Output = Expr<T>;

    fn add(mut self, rhs: Self) -> Self::Output {
        for (monomial, coefficient) in rhs.terms {
            self.insert_term(monomial, coefficient);
        }
        self
    }
}

impl<T: Scalar> Mul for Expr<T> {
    type Output = Expr<T>;

    fn mul(self, rhs: Self) -> Self::Output {
        let mut product = Expr::zero();
        for (left, a) in &self.terms {
            for (right, b) in &rhs.terms {
                let mut monomial = Vec::with_capacity(left.len() + right.len());
                monomial.extend_from_slice(left);
                monomial.extend_from_slice(right);
                monomial.sort_unstable();
                product.insert_term(monomial, *a * *b);
            }
        }
        product
    }
}

impl<T: Scalar> Zero for Expr<T> {
    fn zero() -> Self {
        Self {
            terms: BTreeMap::new(),
        }
    }

    fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }
}

/// The placeholders issued while redacting one task.
///
/// Returned by [`Redactor::redact`] and consumed by [`Redactor::resolve`] once the task's
/// result comes back.
#[derive(Debug, PartialEq, Eq)]
pub struct PlaceholderBinding {
    ids: Range<u64>,
}

impl PlaceholderBinding {
    /// The ids issued for the task.
    pub fn ids(&self) -> Range<u64> {
        self.ids.clone()
    }

    /// Number of redacted entries.
    pub fn len(&self) -> usize {
        (self.ids.end - self.ids.start) as usize
    }

    /// Whether no entry was redacted.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Per-job ledger of redacted values.
///
/// Placeholder ids start at 0 and increase strictly across all tasks of a job; the id of a
/// placeholder is the position of its true value in the ledger, so ids issued and values
/// recorded always agree.
#[derive(Debug)]
pub struct Redactor<T, R = ChaCha20Rng> {
    rng: R,
    probability: f64,
    values: Vec<T>,
}

/// The chance of an entry being redacted.
pub const DEFAULT_REDACTION_PROBABILITY: f64 = 0.5;

impl<T: Scalar> Redactor<T> {
    /// A redactor seeded from the operating system, redacting with probability ½.
    pub fn new() -> Self {
        Self::with_rng(ChaCha20Rng::from_os_rng())
    }
}

impl<T: Scalar> Default for Redactor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar, R: Rng> Redactor<T, R> {
    /// A redactor drawing its coin flips from `rng`.
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            probability: DEFAULT_REDACTION_PROBABILITY,
            values: vec![],
        }
    }

    /// Sets the chance of each entry being redacted, clamped to `0.0..=1.0`.
    pub fn with_probability(mut self, probability: f64) -> Self {
        if !probability.is_nan() {
            self.probability = probability.clamp(0.0, 1.0);
        }
        self
    }

    /// Number of placeholders issued so far in this job.
    pub fn issued(&self) -> u64 {
        self.values.len() as u64
    }

    /// Replaces a random subset of `block`'s entries with fresh placeholders.
    pub fn redact(&mut self, block: &Matrix<T>) -> (Matrix<Expr<T>>, PlaceholderBinding) {
        let start = self.issued();
        let symbolic = block.map(|&value| {
            if self.rng.random_bool(self.probability) {
                let id = self.values.len() as u64;
                self.values.push(value);
                Expr::placeholder(id)
            } else {
                Expr::constant(value)
            }
        });
        let binding = PlaceholderBinding {
            ids: start..self.issued(),
        };
        (symbolic, binding)
    }

    /// Substitutes the true values of `binding` into `symbolic` and evaluates every entry.
    ///
    /// Either every entry resolves or nothing is returned; a placeholder that was not issued
    /// for this binding is an error.
    pub fn resolve(
        &self,
        binding: PlaceholderBinding,
        symbolic: &Matrix<Expr<T>>,
    ) -> Result<Matrix<T>, DataError> {
        let ids = binding.ids;
        symbolic.try_map(|expr| {
            expr.evaluate(|id| {
                if ids.contains(&id) {
                    self.values.get(id as usize).copied()
                } else {
                    None
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn x(id: u64) -> Expr<i64> {
        Expr::placeholder(id)
    }

    fn c(value: i64) -> Expr<i64> {
        Expr::constant(value)
    }

    #[test]
    fn arithmetic_collects_like_terms() {
        let e = x(0) * c(3) + c(2) + x(0) + x(1) * c(0);
        assert_eq!(e, Expr::scaled_placeholder(0, 4) + c(2));
        assert_eq!(e.evaluate(|_| Some(5)).unwrap(), 22);
        assert_eq!((x(0) * c(2) + x(0) * c(-2)).as_constant(), Some(0));
    }

    #[test]
    fn product_of_placeholders_is_a_monomial() {
        let e = (x(1) + c(1)) * (x(2) + c(-1));
        let values = [0, 3, 4];
        assert_eq!(e.evaluate(|id| values.get(id as usize).copied()).unwrap(), 4 * 3 - 3 + 4 - 1);
        assert_eq!(e.placeholders().collect::<Vec<_>>(), vec![1, 1, 2, 2]);
    }

    #[test]
    fn evaluate_reports_missing_placeholder() {
        assert_eq!(
            (x(7) + c(1)).evaluate(|_| None),
            Err(DataError::UnknownPlaceholder(7))
        );
    }

    #[test]
    fn ids_are_shared_across_tasks() {
        let mut redactor = Redactor::with_rng(ChaCha20Rng::seed_from_u64(7)).with_probability(1.0);
        let block = Matrix::from_rows(vec![vec![1i64, 2], vec![3, 4]]).unwrap();
        let (first, b1) = redactor.redact(&block);
        let (second, b2) = redactor.redact(&block);
        assert_eq!(b1.ids(), 0..4);
        assert_eq!(b2.ids(), 4..8);
        assert_eq!(redactor.issued(), 8);
        assert_eq!(first.get(1, 1), &x(3));
        assert_eq!(second.get(0, 0), &x(4));
    }

    #[test]
    fn resolve_restores_product() {
        let mut redactor = Redactor::with_rng(ChaCha20Rng::seed_from_u64(1));
        let a = Matrix::from_rows(vec![vec![1i64, 2, 3], vec![4, 5, 6]]).unwrap();
        let b = Matrix::from_rows(vec![vec![1i64, 0], vec![2, 1], vec![0, 3]]).unwrap();
        let (symbolic, binding) = redactor.redact(&a);
        let product = symbolic.multiply(&b.map(|&v| Expr::constant(v))).unwrap();
        assert_eq!(redactor.resolve(binding, &product).unwrap(), a.multiply(&b).unwrap());
    }

    #[test]
    fn resolve_rejects_foreign_placeholders() {
        let mut redactor = Redactor::with_rng(ChaCha20Rng::seed_from_u64(3)).with_probability(1.0);
        let block = Matrix::from_rows(vec![vec![9i64]]).unwrap();
        let (first, first_binding) = redactor.redact(&block);
        let (_, second_binding) = redactor.redact(&block);
        assert_eq!(
            redactor.resolve(second_binding, &first),
            Err(DataError::UnknownPlaceholder(0))
        );
        assert_eq!(redactor.resolve(first_binding, &first).unwrap(), block);
    }

    #[test]
    fn zero_probability_redacts_nothing() {
        let mut redactor = Redactor::with_rng(ChaCha20Rng::seed_from_u64(0)).with_probability(0.0);
        let block = Matrix::from_rows(vec![vec![1i64, 2]]).unwrap();
        let (symbolic, binding) = redactor.redact(&block);
        assert!(binding.is_empty());
        assert_eq!(symbolic, block.map(|&v| Expr::constant(v)));
    }
}

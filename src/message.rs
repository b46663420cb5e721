//! Messages exchanged between a dispatcher and a worker.
//!
//! Every payload is a tagged enum, so the receiving side decides what it got by matching on the
//! variant instead of guessing from the shape of the data.

use serde::{Deserialize, Serialize};

use crate::{error::DataError, matrix::Matrix, matrix::Scalar, overlay::Expr};

/// The token a worker sends before computing, confirming the request was received.
pub const ACKNOWLEDGEMENT: &[u8] = b"ACK";

/// The left operand of a task, either in the clear or with some entries redacted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Operand<T> {
    /// Every entry is a number.
    Plain(Matrix<T>),
    /// Some entries are placeholders.
    Redacted(Matrix<Expr<T>>),
}

impl<T: Scalar> Operand<T> {
    /// `(rows, cols)` of the operand.
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Operand::Plain(m) => m.shape(),
            Operand::Redacted(m) => m.shape(),
        }
    }

    /// Whether the operand contains placeholders.
    pub fn is_redacted(&self) -> bool {
        matches!(self, Operand::Redacted(_))
    }

    /// Multiplies the operand by `rhs`, symbolically if it is redacted.
    pub fn multiply(&self, rhs: &Matrix<T>) -> Result<Operand<T>, DataError> {
        match self {
            Operand::Plain(a) => a.multiply(rhs).map(Operand::Plain),
            Operand::Redacted(a) => a
                .multiply(&rhs.map(|&v| Expr::constant(v)))
                .map(Operand::Redacted),
        }
    }

    /// Like [`Operand::multiply`], refusing products of more than `max_len` elements.
    pub fn multiply_within(
        &self,
        rhs: &Matrix<T>,
        max_len: usize,
    ) -> Result<Operand<T>, DataError> {
        match self {
            Operand::Plain(a) => a.product_len(rhs, max_len)?,
            Operand::Redacted(a) => a.product_len(rhs, max_len)?,
        };
        self.multiply(rhs)
    }
}

/// Sent by the dispatcher, one per connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Request<T> {
    /// Multiply `a × b` and return the block for position `index`.
    Compute {
        /// The task's position index.
        index: usize,
        /// The left block.
        a: Operand<T>,
        /// The right block.
        b: Matrix<T>,
    },
    /// A liveness check, never answered.
    Probe,
}

/// Sent by a worker after the acknowledgement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Reply<T> {
    /// The product for the task at `index`.
    Result {
        /// The position index echoed from the request.
        index: usize,
        /// The product block.
        block: Operand<T>,
    },
    /// The worker could not compute the product.
    NoResult,
}

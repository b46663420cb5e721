//! Distributed block matrix multiplication over unreliable, semi-trusted workers.
//!
//! A dispatcher splits `A × B` into independent block products, sends them to worker nodes over
//! TCP, retries whatever fails and combines the returned blocks into the full product. Workers
//! can optionally be kept from seeing operand values: entries are replaced by placeholders
//! before sending and only the dispatcher can substitute them back.
//!
//! ## Main Components
//!
//! * [`partition`]: cuts the operands into tasks according to a [`partition::Layout`].
//! * [`registry`] and [`select`]: the ledger of announced workers and the choice of workers
//!   for a job.
//! * [`dispatch`]: the [`dispatch::Dispatcher`], which runs tasks against workers until every
//!   task has a result.
//! * [`combine`]: folds the per-task results into the product.
//! * [`overlay`]: placeholder expressions used to hide operand entries.
//! * [`worker`]: the server side of the protocol.
//! * [`wire`], [`message`] and [`channel`]: framing, message types and connections.
//!
//! ## Example
//!
//! ```no_run
//! use shardmul::{
//!     Matrix,
//!     dispatch::Dispatcher,
//!     partition::Layout,
//!     registry::Registry,
//!     select::{BindProbe, select_workers},
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::new("workers.txt");
//! let workers = select_workers(&registry, Some(2), &BindProbe, &mut rand::rng()).await?;
//!
//! let a = Matrix::new(4, 4, (0..16).collect())?;
//! let b = Matrix::new(4, 2, (0..8).collect())?;
//! let report = Dispatcher::new(workers)?.run(&a, &b, Layout::new(2, 2)).await?;
//! assert_eq!(report.product, a.multiply(&b)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## What redaction does not protect
//!
//! Redaction hides a random subset of the entries of the left operand of every task. Entries
//! that are not redacted, the whole right operand and the shape of the job remain visible to
//! workers. Use it to deter casual inspection, not as a secret-sharing scheme.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod channel;
pub mod combine;
pub mod dispatch;
pub mod error;
pub mod matrix;
pub mod message;
pub mod overlay;
pub mod partition;
pub mod registry;
pub mod select;
pub mod wire;
pub mod worker;

pub use error::{ConfigError, DataError, Error, ProtocolError};
pub use matrix::{Matrix, Scalar};
pub use registry::Address;

//! Error types shared by every stage of a job.

use std::{io, path::PathBuf};

use crate::partition::Layout;

/// The error returned by a dispatch job, grouped by category.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The job could not be set up; nothing was sent over the network.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// A peer violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// A connection failed (refused, reset, aborted, timed out, closed early).
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    /// Blocks or results are inconsistent with the partition layout.
    #[error("data error: {0}")]
    Data(#[from] DataError),
    /// Every selected worker was retired after repeated failures while tasks remained.
    #[error("no worker is reachable, {pending} task(s) remain")]
    NoWorkersReachable {
        /// The number of tasks that were still pending or in flight.
        pending: usize,
    },
    /// A task failed more often than the configured attempt limit.
    #[error("task {index} failed {attempts} time(s), giving up")]
    TaskExhausted {
        /// The position index of the task.
        index: usize,
        /// How many exchanges were attempted for the task.
        attempts: u32,
    },
}

impl Error {
    /// Whether the error is a recoverable transport failure.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Errors detected while setting up a job.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The worker registry file does not exist.
    #[error("worker registry {0:?} does not exist")]
    RegistryMissing(PathBuf),
    /// The worker registry file holds no complete record.
    #[error("worker registry {0:?} is empty")]
    RegistryEmpty(PathBuf),
    /// The worker registry file exists but could not be read.
    #[error("worker registry {path:?} could not be read")]
    RegistryUnreadable {
        /// The registry location.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },
    /// No registered worker is listening.
    #[error("none of the registered workers is listening")]
    NoLiveWorkers,
    /// The requested number of workers cannot be satisfied.
    #[error("cannot select {requested} worker(s), {available} available")]
    InvalidWorkerCount {
        /// The requested number of workers.
        requested: usize,
        /// The number of live candidates.
        available: usize,
    },
    /// The dispatcher was given no worker addresses.
    #[error("no worker addresses were provided")]
    NoWorkers,
    /// The operands cannot be multiplied.
    #[error("cannot multiply a {}x{} matrix by a {}x{} matrix", .a.0, .a.1, .b.0, .b.1)]
    IncompatibleShapes {
        /// Shape of the left operand.
        a: (usize, usize),
        /// Shape of the right operand.
        b: (usize, usize),
    },
    /// The partition layout does not fit the left operand.
    #[error(
        "layout {}x{} does not fit a {rows}x{cols} matrix",
        .layout.horizontal,
        .layout.vertical
    )]
    InvalidLayout {
        /// The requested layout.
        layout: Layout,
        /// Rows of the left operand.
        rows: usize,
        /// Columns of the left operand.
        cols: usize,
    },
}

/// Violations of the wire protocol.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The peer sent something other than the acknowledgement token.
    #[error("invalid acknowledgement {0:?}")]
    InvalidAcknowledgement(String),
    /// The frame header is not a decimal length.
    #[error("malformed frame header {0:?}")]
    MalformedHeader(String),
    /// The frame is longer than allowed.
    #[error("frame of {len} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge {
        /// Declared or actual payload length.
        len: usize,
        /// The configured limit.
        max: usize,
    },
    /// A payload could not be encoded.
    #[error("payload could not be encoded: {0}")]
    Encode(String),
    /// A payload could not be decoded into the expected message.
    #[error("payload could not be decoded: {0}")]
    Decode(String),
    /// A reply was produced for a different task.
    #[error("reply for position {actual} received for task {expected}")]
    IndexMismatch {
        /// The index of the dispatched task.
        expected: usize,
        /// The index carried by the reply.
        actual: usize,
    },
    /// A reply block does not have the shape of the task's product.
    #[error(
        "result for task {index} is {}x{}, expected {}x{}",
        .actual.0,
        .actual.1,
        .expected.0,
        .expected.1
    )]
    ResultShape {
        /// The index of the task.
        index: usize,
        /// The shape of `a × b` for the task.
        expected: (usize, usize),
        /// The shape that was returned.
        actual: (usize, usize),
    },
    /// A plain result was returned for a request containing placeholders.
    #[error("task {0} was redacted but the worker returned a plain result")]
    UnexpectedPlainResult(usize),
}

/// Inconsistent matrix data.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DataError {
    /// The element buffer does not match the declared shape.
    #[error("{actual} elements cannot form a {rows}x{cols} matrix")]
    InvalidLength {
        /// Declared rows.
        rows: usize,
        /// Declared columns.
        cols: usize,
        /// Number of elements provided.
        actual: usize,
    },
    /// Two matrices have shapes that the operation cannot combine.
    #[error("cannot {op} a {}x{} matrix with a {}x{} matrix", .left.0, .left.1, .right.0, .right.1)]
    ShapeMismatch {
        /// The attempted operation.
        op: &'static str,
        /// Shape of the left matrix.
        left: (usize, usize),
        /// Shape of the right matrix.
        right: (usize, usize),
    },
    /// Stacking was asked to join zero blocks.
    #[error("no blocks to {0}")]
    NoBlocks(&'static str),
    /// A task index has no entry in the result table.
    #[error("result table is missing position {0}")]
    MissingIndex(usize),
    /// The result table holds an index outside the partition.
    #[error("result table holds position {index}, but the partition has {total} tasks")]
    UnexpectedIndex {
        /// The unexpected index.
        index: usize,
        /// The number of partitioned tasks.
        total: usize,
    },
    /// A product would hold more elements than allowed.
    #[error("a {rows}x{cols} product exceeds the limit of {max} elements")]
    ProductTooLarge {
        /// Rows of the product.
        rows: usize,
        /// Columns of the product.
        cols: usize,
        /// The largest accepted number of elements.
        max: usize,
    },
    /// A symbolic result references a placeholder the task never issued.
    #[error("placeholder x[{0}] was not issued for this task")]
    UnknownPlaceholder(u64),
}

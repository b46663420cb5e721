//! Job descriptions read from JSON files.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use shardmul::{dispatch::DispatchOptions, partition::Layout};
use tokio::fs;

/// The numeric type of the matrix elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    /// 64-bit signed integers.
    #[default]
    Int,
    /// 64-bit floats.
    Float,
}

/// How the dispatcher checks that a registered worker is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Try to bind the worker's address locally.
    #[default]
    Bind,
    /// Connect to the worker and hang up.
    Connect,
}

/// Everything needed to run one dispatch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobSpec {
    /// Rows of `A`.
    pub rows: usize,
    /// Columns of `A` and rows of `B`.
    pub inner: usize,
    /// Columns of `B`.
    pub cols: usize,
    /// How `A` is cut into tasks.
    pub layout: Layout,
    /// Smallest generated element.
    pub min_value: i64,
    /// Upper bound (exclusive) of generated elements.
    pub max_value: i64,
    /// Number of workers to select. Random if absent.
    pub workers: Option<usize>,
    /// The worker registry.
    pub registry: PathBuf,
    /// The liveness probe used during selection.
    pub probe: ProbeKind,
    /// Element type.
    pub element: ElementKind,
    /// Seed for operand generation, selection and redaction.
    pub seed: Option<u64>,
    /// Options passed to the dispatcher.
    pub dispatch: DispatchOptions,
}

impl Default for JobSpec {
    fn default() -> Self {
        Self {
            rows: 32,
            inner: 32,
            cols: 4,
            layout: Layout::new(16, 2),
            min_value: 0,
            max_value: 5,
            workers: None,
            registry: PathBuf::from("workers.txt"),
            probe: ProbeKind::default(),
            element: ElementKind::default(),
            seed: None,
            dispatch: DispatchOptions::default(),
        }
    }
}

impl JobSpec {
    /// Reads a job description, filling in defaults for missing fields.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let json = fs::read_to_string(path)
            .await
            .with_context(|| format!("could not read job file '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("'{}' is not a valid job file", path.display()))
    }
}

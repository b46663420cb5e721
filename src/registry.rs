//! The worker registry: an append-only ledger of worker announcements.
//!
//! Every line describes one worker at one point in time:
//!
//! ```text
//! 10.0.0.7 5000 16 31.42 linux-x86_64 2025-03-01 12:30:05.123456
//! ```
//!
//! i.e. host, port, capability (available parallelism), available memory in GB, OS description
//! and a timestamp. Later lines supersede earlier lines for the same address. Workers only ever
//! append, so a reader that sees a line without its trailing newline is racing a writer and
//! ignores that line.

use std::{
    collections::HashSet,
    fmt, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info};

use crate::error::ConfigError;

/// Once the ledger reaches this size it is truncated before the next announcement.
pub const MAX_REGISTRY_LEN: u64 = 1_000_000_000;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// The network location of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    /// An address from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host name or IP address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// The error returned when parsing an [`Address`] from `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid worker address {0:?}, expected host:port")]
pub struct AddressParseError(String);

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AddressParseError(s.to_string());
        let (host, port) = s.rsplit_once(':').ok_or_else(err)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(err());
        }
        let port = port.parse().map_err(|_| err())?;
        Ok(Address::new(host, port))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::new(addr.ip().to_string(), addr.port())
    }
}

/// One announcement of a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRecord {
    /// Where the worker listens.
    pub address: Address,
    /// Compute capability, the number of cores the worker can use.
    pub capability: u32,
    /// Available memory in GB.
    pub memory_gb: f64,
    /// Short OS description.
    pub os: String,
    /// When the announcement was made, in the worker's local time.
    pub timestamp: Option<NaiveDateTime>,
}

impl WorkerRecord {
    /// Describes the local machine listening at `address`.
    pub fn describe(address: Address, memory_gb: f64) -> Self {
        let capability = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        Self {
            address,
            capability,
            memory_gb,
            os: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            timestamp: Some(Local::now().naive_local()),
        }
    }

    /// Parses one ledger line (without its newline).
    ///
    /// Returns `None` unless host, port, capability and memory are present and valid.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut fields = line.trim_end_matches('\r').splitn(6, ' ');
        let host = fields.next().filter(|h| !h.is_empty())?;
        let port = fields.next()?.parse().ok()?;
        let capability = fields.next()?.parse().ok()?;
        let memory_gb: f64 = fields.next()?.parse().ok()?;
        if !memory_gb.is_finite() {
            return None;
        }
        let os = fields.next().unwrap_or_default().to_string();
        let timestamp = fields
            .next()
            .and_then(|ts| NaiveDateTime::parse_from_str(ts.trim(), "%Y-%m-%d %H:%M:%S%.f").ok());
        Some(Self {
            address: Address::new(host, port),
            capability,
            memory_gb,
            os,
            timestamp,
        })
    }

    /// Formats the record as one ledger line, including its newline.
    pub fn to_line(&self) -> String {
        let os = if self.os.is_empty() {
            "unknown".to_string()
        } else {
            self.os.replace(char::is_whitespace, "-")
        };
        let timestamp = self
            .timestamp
            .unwrap_or_else(|| Local::now().naive_local())
            .format(TIMESTAMP_FORMAT);
        format!(
            "{} {} {} {:.2} {os} {timestamp}\n",
            self.address.host, self.address.port, self.capability, self.memory_gb
        )
    }
}

/// A registry file shared by workers and dispatchers.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    /// The registry stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The location of the ledger.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The newest record of every announced worker, newest first.
    pub async fn latest(&self) -> Result<Vec<WorkerRecord>, ConfigError> {
        let snapshot = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::RegistryMissing(self.path.clone()));
            }
            Err(source) => {
                return Err(ConfigError::RegistryUnreadable {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let complete = match snapshot.iter().rposition(|&b| b == b'\n') {
            Some(end) => &snapshot[..end],
            None => return Err(ConfigError::RegistryEmpty(self.path.clone())),
        };
        let text = String::from_utf8_lossy(complete);

        let mut seen = HashSet::new();
        let mut records = vec![];
        for line in text.rsplit('\n') {
            if line.trim().is_empty() {
                continue;
            }
            match WorkerRecord::parse_line(line) {
                Some(record) => {
                    if seen.insert(record.address.clone()) {
                        records.push(record);
                    }
                }
                None => debug!(line, "skipping malformed registry line"),
            }
        }
        if records.is_empty() {
            return Err(ConfigError::RegistryEmpty(self.path.clone()));
        }
        Ok(records)
    }

    /// Appends `record` to the ledger, starting a fresh ledger once it has grown too large.
    pub async fn announce(&self, record: &WorkerRecord) -> io::Result<()> {
        let truncate = match fs::metadata(&self.path).await {
            Ok(meta) => meta.len() >= MAX_REGISTRY_LEN,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e),
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let mut options = fs::OpenOptions::new();
        if truncate {
            info!(path = ?self.path, "registry reached its size limit, truncating");
            options.write(true).truncate(true).create(true);
        } else {
            options.append(true).create(true);
        }
        let mut file = options.open(&self.path).await?;
        file.write_all(record.to_line().as_bytes()).await?;
        file.flush().await?;
        info!(worker = %record.address, "announced worker");
        Ok(())
    }
}

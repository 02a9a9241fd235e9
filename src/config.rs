// src/config.rs

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

use crate::errors::ProcmonError;

/// Reserved id prefix for the supervisor's own lockfiles (`procmon1` and
/// `procmon2`). Config entries must not collide with it.
pub const RESERVED_ID_PREFIX: &str = "procmon";

/// Supervisor-level settings: everything that is about *this* supervisor
/// instance rather than the managed processes.
///
/// Loaded from an optional `procmon` settings file in the working directory
/// plus `PROCMON_*` environment overrides (e.g. `PROCMON_LOCK_DIR`).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SupervisorSettings {
    /// Directory holding the `procmon.<id>` lockfiles.
    pub lock_dir: PathBuf,

    /// Default diagnostic verbosity; the `-v` flag raises it as well.
    pub verbose: bool,
}

impl SupervisorSettings {
    pub fn load() -> Result<Self, ProcmonError> {
        let builder = Config::builder()
            .set_default("lock_dir", "/tmp")
            .map_err(|e| ProcmonError::Config(e.to_string()))?
            .set_default("verbose", false)
            .map_err(|e| ProcmonError::Config(e.to_string()))?
            .add_source(File::with_name("procmon").required(false))
            .add_source(Environment::with_prefix("PROCMON"));

        builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| ProcmonError::Config(e.to_string()))
    }
}

/// The process document: the declared set of processes to start and monitor.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub processes: Vec<ProcessEntry>,
}

/// One declared process.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    /// Unique identifier; also names the lockfile.
    pub id: String,

    /// Command line to execute (program plus space-separated arguments).
    pub exec: String,

    /// Seconds to let this process settle after starting it, before any of
    /// its dependents are started.
    #[serde(default, deserialize_with = "de_seconds")]
    pub wait: u64,

    /// Whether this is a long-running service (restarted on death) rather
    /// than a run-to-exit task.
    #[serde(default)]
    pub monitored: bool,

    /// Extra diagnostics while managing this process.
    #[serde(default)]
    pub verbose: bool,

    /// Recognize and link the process into the graph, but never launch it.
    #[serde(default)]
    pub skip: bool,

    /// Re-initialize this process whenever one of its parents restarts.
    #[serde(default)]
    pub restart_on_parent_death: bool,

    /// Ids of the processes this one depends on.
    #[serde(default)]
    pub depends: Vec<String>,
}

impl MonitorConfig {
    /// Loads and validates the process document at `path`.
    ///
    /// # Errors
    /// Returns `ProcmonError::Io` if the file is unreadable and
    /// `ProcmonError::Config` for malformed JSON, wrong-typed values, or
    /// entries that fail [`MonitorConfig::validate`].
    pub fn load(path: &Path) -> Result<Self, ProcmonError> {
        let text = fs::read_to_string(path)?;
        let config: MonitorConfig = serde_json::from_str(&text)
            .map_err(|e| ProcmonError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that do not need the dependency graph: ids and
    /// commands must be present, ids must be unique, and the reserved
    /// supervisor id prefix is off limits.
    pub fn validate(&self) -> Result<(), ProcmonError> {
        let mut seen = std::collections::HashSet::new();

        for entry in &self.processes {
            if entry.id.is_empty() {
                return Err(ProcmonError::Config(
                    "process with empty id in configuration".to_string(),
                ));
            }
            if entry.exec.trim().is_empty() {
                return Err(ProcmonError::Config(format!(
                    "process {} has no exec command",
                    entry.id
                )));
            }
            if entry.id.starts_with(RESERVED_ID_PREFIX) {
                return Err(ProcmonError::Config(format!(
                    "process id {} collides with the reserved supervisor ids",
                    entry.id
                )));
            }
            if entry.id.contains('/') || entry.id.chars().any(char::is_whitespace) {
                return Err(ProcmonError::Config(format!(
                    "process id {} contains path or whitespace characters",
                    entry.id
                )));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(ProcmonError::Config(format!(
                    "duplicate process id {}",
                    entry.id
                )));
            }
        }

        Ok(())
    }
}

/// Seconds fields accept either a JSON number or the numeric-string form
/// used by existing documents (`"wait": "10"`).
fn de_seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct SecondsVisitor;

    impl<'de> Visitor<'de> for SecondsVisitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a non-negative number of seconds")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(|_| E::custom("seconds value must not be negative"))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            v.trim()
                .parse::<u64>()
                .map_err(|_| E::custom(format!("invalid seconds value {:?}", v)))
        }
    }

    deserializer.deserialize_any(SecondsVisitor)
}

//! Logging: global `tracing` subscriber plus one append-only text sink per job.
//!
//! Job logs are plain comma-joined lines so downstream analysis scripts can
//! grep them (`eval, ...`, `stats, ...`). Every line is mirrored to `tracing`.

use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Install the global fmt subscriber. Subsequent calls are no-ops.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // A subscriber installed by the host (tests, embedding apps) wins.
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

/// Append-only log sink owned by a single job.
#[derive(Debug)]
pub struct JobLog {
    name: String,
    path: Option<PathBuf>,
    file: Option<Mutex<File>>,
}

impl JobLog {
    /// Open (or create) `<dir>/<name>.log` in append mode.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(dir: P, name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        let path = dir.as_ref().join(format!("{name}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            name,
            path: Some(path),
            file: Some(Mutex::new(file)),
        })
    }

    /// Log that only mirrors to `tracing`.
    #[must_use]
    pub fn tracing_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            file: None,
        }
    }

    /// Job name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing file, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one line.
    pub fn log(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        tracing::info!(job = %self.name, "{line}");
        let Some(file) = &self.file else {
            return;
        };
        let stamped = format!("{}, {line}\n", Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"));
        let result = file
            .lock()
            .map_err(|_| std::io::Error::other("job log mutex poisoned"))
            .and_then(|mut f| f.write_all(stamped.as_bytes()));
        if let Err(e) = result {
            tracing::warn!(job = %self.name, error = %e, "failed to write job log line");
        }
    }

    /// Append the fields joined by `", "`.
    pub fn log_fields<I, T>(&self, fields: I)
    where
        I: IntoIterator<Item = T>,
        T: std::fmt::Display,
    {
        let joined = fields
            .into_iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.log(joined);
    }
}

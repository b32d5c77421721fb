//! Relay event log.  One JSON line per relayed request goes to `LOG_FILE`
//! when configured, optionally mirrored to `tracing`.  Submitted code and
//! result summaries are never written, only their shape.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::config::RotationConfig;
use crate::error::Outcome;
use crate::Decision;

pub const SCHEMA_VERSION: u32 = 1;

/// Size-bounded append-only log file.  When the active file grows past
/// `max_bytes` it is shifted to `<path>.1` (older backups move up to
/// `<path>.<keep>`), the newest backup is gzipped if requested, and a fresh
/// file is started.
pub struct RotatingWriter {
    path: PathBuf,
    file: File,
    rotation: RotationConfig,
}

impl RotatingWriter {
    pub fn open(path: impl AsRef<Path>, rotation: RotationConfig) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file,
            rotation,
        })
    }

    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if let Some(limit) = self.rotation.max_bytes {
            if self.size().unwrap_or(0) >= limit {
                self.rotate()?;
            }
        }
        writeln!(self.file, "{}", line)
    }

    pub fn size(&self) -> Option<u64> {
        self.path.metadata().ok().map(|m| m.len())
    }

    fn backup_path(&self, idx: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", idx));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        let keep = self.rotation.keep;
        if keep > 0 {
            for idx in (1..keep).rev() {
                let from = self.backup_path(idx);
                if from.exists() {
                    fs::rename(&from, self.backup_path(idx + 1))?;
                }
            }
            fs::rename(&self.path, self.backup_path(1))?;
            if self.rotation.compress {
                self.compress_newest_backup();
            }
        }
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }

    fn compress_newest_backup(&self) {
        let backup = self.backup_path(1);
        let data = match fs::read(&backup) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(path = %backup.display(), error = %e, "could not read backup for compression");
                return;
            }
        };
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        let compressed = gz.write_all(&data).and_then(|_| gz.finish());
        match compressed {
            Ok(buf) => {
                let mut gz_path = backup.clone().into_os_string();
                gz_path.push(".gz");
                if fs::write(&gz_path, buf).is_ok() {
                    let _ = fs::remove_file(&backup);
                }
            }
            Err(e) => tracing::warn!(error = %e, "backup compression failed"),
        }
    }
}

/// What happened to one relayed request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEvent<'a> {
    pub schema_version: u32,
    pub ts: String,
    pub client_id: &'a str,
    pub outcome: &'static str,
    pub status: u16,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub findings: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub malformed_findings: Option<usize>,
}

impl<'a> RelayEvent<'a> {
    pub fn new(client_id: &'a str, outcome: Outcome, status: u16, latency_ms: u64) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            ts: chrono::Utc::now().to_rfc3339(),
            client_id,
            outcome: outcome.as_str(),
            status,
            latency_ms,
            code_chars: None,
            decision: None,
            findings: None,
            malformed_findings: None,
        }
    }
}

#[derive(Clone)]
pub struct TelemetrySink {
    writer: Option<Arc<Mutex<RotatingWriter>>>,
    log_stdout: bool,
    lines_total: Arc<AtomicU64>,
    write_errors_total: Arc<AtomicU64>,
}

impl TelemetrySink {
    pub fn new(writer: Option<RotatingWriter>, log_stdout: bool) -> Self {
        Self {
            writer: writer.map(|w| Arc::new(Mutex::new(w))),
            log_stdout,
            lines_total: Arc::new(AtomicU64::new(0)),
            write_errors_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A sink that records nothing.
    pub fn disabled() -> Self {
        Self::new(None, false)
    }

    pub fn emit(&self, event: &RelayEvent<'_>) {
        if let Some(writer) = &self.writer {
            let line = match serde_json::to_string(event) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize relay event");
                    return;
                }
            };
            let written = match writer.lock() {
                Ok(mut guard) => guard.write_line(&line),
                Err(poisoned) => poisoned.into_inner().write_line(&line),
            };
            match written {
                Ok(()) => {
                    self.lines_total.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to write relay event");
                    self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if self.log_stdout {
            tracing::info!(
                target: "telemetry",
                clientId = %event.client_id,
                outcome = event.outcome,
                status = event.status,
                latencyMs = event.latency_ms,
                codeChars = ?event.code_chars,
                decision = ?event.decision,
                findings = ?event.findings,
                malformedFindings = ?event.malformed_findings,
                "relay event"
            );
        }
    }

    pub fn lines_total(&self) -> u64 {
        self.lines_total.load(Ordering::Relaxed)
    }

    pub fn write_errors_total(&self) -> u64 {
        self.write_errors_total.load(Ordering::Relaxed)
    }
}

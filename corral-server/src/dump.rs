//! Request/response dump facility.
//!
//! When `server.dumps_dir` is set, every inference request writes a
//! `<timestamp>-<seq>.req.json` before forwarding and a matching
//! `.resp.json` as the response arrives (streamed chunks are appended as
//! received). Dumping is best-effort: failures are logged and never fail
//! the request.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

pub struct DumpWriter {
    dir: PathBuf,
    seq: AtomicU64,
}

impl DumpWriter {
    /// Prepare the dump directory, optionally purging dumps from earlier
    /// runs.
    pub fn new(dir: PathBuf, purge: bool) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        if purge {
            purge_dumps(&dir);
        }
        Ok(Self {
            dir,
            seq: AtomicU64::new(0),
        })
    }

    /// Allocate the file pair for one request.
    pub fn begin(&self) -> RequestDump {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let stamp = Utc::now().format("%Y%m%d-%H%M%S%.3f");
        let base = format!("{stamp}-{seq}");
        RequestDump {
            req_path: self.dir.join(format!("{base}.req.json")),
            resp_path: self.dir.join(format!("{base}.resp.json")),
            resp_file: Mutex::new(None),
        }
    }
}

fn purge_dumps(dir: &std::path::Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            warn!(dir = %dir.display(), %error, "cannot read dumps dir for purge");
            return;
        }
    };
    let mut removed = 0usize;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".req.json") || name.ends_with(".resp.json") {
            if std::fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
    }
    debug!(dir = %dir.display(), removed, "purged prior dumps");
}

/// The dump files of a single request.
pub struct RequestDump {
    req_path: PathBuf,
    resp_path: PathBuf,
    resp_file: Mutex<Option<File>>,
}

impl RequestDump {
    pub fn write_request(&self, body: &Value) {
        let rendered = match serde_json::to_vec_pretty(body) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%error, "cannot render request dump");
                return;
            }
        };
        if let Err(error) = std::fs::write(&self.req_path, rendered) {
            warn!(path = %self.req_path.display(), %error, "cannot write request dump");
        }
    }

    pub fn write_response(&self, body: &Value) {
        match serde_json::to_vec_pretty(body) {
            Ok(bytes) => {
                if let Err(error) = std::fs::write(&self.resp_path, bytes) {
                    warn!(path = %self.resp_path.display(), %error, "cannot write response dump");
                }
            }
            Err(error) => warn!(%error, "cannot render response dump"),
        }
    }

    /// Append one streamed chunk; the file is created on the first chunk.
    pub fn append_chunk(&self, chunk: &[u8]) {
        let mut guard = self
            .resp_file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            match OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.resp_path)
            {
                Ok(file) => *guard = Some(file),
                Err(error) => {
                    warn!(path = %self.resp_path.display(), %error, "cannot open response dump");
                    return;
                }
            }
        }
        if let Some(file) = guard.as_mut() {
            let _ = file.write_all(chunk);
            let _ = file.flush();
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

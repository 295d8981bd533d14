//! Append-only audit trail of install, uninstall and reconcile attempts.
//!
//! Each attempt writes a `started` line when it begins and a `finished` line
//! when it ends. Reading folds the lines by attempt id; an attempt without a
//! `finished` line is still `running`, or was interrupted.

use crate::lock::StoreLock;
use crate::{io_at, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Running,
    Success,
    Failed,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttemptStatus::Running => "running",
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: String,
    pub trigger: String,
    pub app: Option<String>,
    pub status: AttemptStatus,
    pub log: Option<String>,
    pub error: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum AttemptEvent {
    Started {
        id: String,
        trigger: String,
        app: Option<String>,
        log: Option<String>,
        at: String,
    },
    Finished {
        id: String,
        status: AttemptStatus,
        error: Option<String>,
        at: String,
    },
}

static SEQ: AtomicU64 = AtomicU64::new(0);

pub struct AttemptLog {
    path: PathBuf,
    lock_path: PathBuf,
}

impl AttemptLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("jsonl.lock");
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the start of an attempt. Returns its id.
    pub fn begin(
        &self,
        trigger: &str,
        app: Option<&str>,
        log: Option<&str>,
    ) -> Result<String, StoreError> {
        let now = chrono::Utc::now();
        let seed = format!(
            "{trigger}:{}:{}:{}",
            app.unwrap_or(""),
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let id = format!(
            "{}-{}",
            now.format("%Y%m%d%H%M%S%3f"),
            &blake3::hash(seed.as_bytes()).to_hex()[..8]
        );
        self.append(&AttemptEvent::Started {
            id: id.clone(),
            trigger: trigger.to_owned(),
            app: app.map(str::to_owned),
            log: log.map(str::to_owned),
            at: now.to_rfc3339(),
        })?;
        debug!("attempt {id} started: {trigger} {}", app.unwrap_or("-"));
        Ok(id)
    }

    pub fn finish(
        &self,
        id: &str,
        status: AttemptStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.append(&AttemptEvent::Finished {
            id: id.to_owned(),
            status,
            error: error.map(str::to_owned),
            at: chrono::Utc::now().to_rfc3339(),
        })?;
        debug!("attempt {id} finished: {status}");
        Ok(())
    }

    /// All attempts, oldest first. Unparseable lines are skipped.
    pub fn list(&self) -> Result<Vec<AttemptRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(io_at("read", &self.path))?;
        let mut order = Vec::new();
        let mut attempts: BTreeMap<String, AttemptRecord> = BTreeMap::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AttemptEvent>(line) {
                Ok(AttemptEvent::Started {
                    id,
                    trigger,
                    app,
                    log,
                    at,
                }) => {
                    order.push(id.clone());
                    attempts.insert(
                        id.clone(),
                        AttemptRecord {
                            id,
                            trigger,
                            app,
                            status: AttemptStatus::Running,
                            log,
                            error: None,
                            started_at: at,
                            finished_at: None,
                        },
                    );
                }
                Ok(AttemptEvent::Finished {
                    id,
                    status,
                    error,
                    at,
                }) => match attempts.get_mut(&id) {
                    Some(record) => {
                        record.status = status;
                        record.error = error;
                        record.finished_at = Some(at);
                    }
                    None => warn!("attempt log: finish for unknown attempt {id}"),
                },
                Err(e) => warn!(
                    "attempt log {}:{}: skipping corrupt line: {e}",
                    self.path.display(),
                    lineno + 1
                ),
            }
        }
        Ok(order
            .into_iter()
            .filter_map(|id| attempts.remove(&id))
            .collect())
    }

    /// Close out attempts left `running` by a process that died.
    ///
    /// Call only while holding the state lock, otherwise a live attempt in
    /// another process would be marked failed. Returns the number closed.
    pub fn recover_interrupted(&self) -> Result<usize, StoreError> {
        let stale: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|a| a.status == AttemptStatus::Running)
            .map(|a| a.id)
            .collect();
        for id in &stale {
            info!("attempt {id} was interrupted, marking failed");
            self.finish(id, AttemptStatus::Failed, Some("interrupted"))?;
        }
        Ok(stale.len())
    }

    fn append(&self, event: &AttemptEvent) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_at("create directory", dir))?;
        }
        let _guard = StoreLock::acquire(&self.lock_path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_at("open", &self.path))?;
        file.write_all(line.as_bytes())
            .map_err(io_at("append to", &self.path))?;
        file.sync_data().map_err(io_at("sync", &self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_in(dir: &tempfile::TempDir) -> AttemptLog {
        AttemptLog::new(dir.path().join("attempts.jsonl"))
    }

    #[test]
    fn missing_log_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(log_in(&dir).list().unwrap().is_empty());
    }

    #[test]
    fn begin_then_finish_folds_into_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        let id = log.begin("install", Some("radarr"), None).unwrap();
        log.finish(&id, AttemptStatus::Success, None).unwrap();

        let all = log.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, id);
        assert_eq!(all[0].app.as_deref(), Some("radarr"));
        assert_eq!(all[0].status, AttemptStatus::Success);
        assert!(all[0].finished_at.is_some());

        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn unfinished_attempt_is_running() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.begin("reconcile", None, Some("/var/log/bosun/reconcile.log"))
            .unwrap();
        let all = log.list().unwrap();
        assert_eq!(all[0].status, AttemptStatus::Running);
        assert!(all[0].app.is_none());
        assert_eq!(all[0].log.as_deref(), Some("/var/log/bosun/reconcile.log"));
    }

    #[test]
    fn failed_attempt_keeps_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        let id = log.begin("uninstall", Some("sonarr"), None).unwrap();
        log.finish(&id, AttemptStatus::Failed, Some("apply failed"))
            .unwrap();
        let all = log.list().unwrap();
        assert_eq!(all[0].error.as_deref(), Some("apply failed"));
    }

    #[test]
    fn order_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        let first = log.begin("install", Some("a"), None).unwrap();
        let second = log.begin("install", Some("b"), None).unwrap();
        log.finish(&second, AttemptStatus::Success, None).unwrap();
        log.finish(&first, AttemptStatus::Success, None).unwrap();
        let ids: Vec<_> = log.list().unwrap().into_iter().map(|a| a.app).collect();
        assert_eq!(ids, vec![Some("a".to_owned()), Some("b".to_owned())]);
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        let id = log.begin("install", Some("radarr"), None).unwrap();
        let mut f = OpenOptions::new().append(true).open(log.path()).unwrap();
        f.write_all(b"{not json\n").unwrap();
        log.finish(&id, AttemptStatus::Success, None).unwrap();
        let all = log.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, AttemptStatus::Success);
    }

    #[test]
    fn interrupted_attempts_are_closed() {
        let dir = tempfile::tempdir().unwrap();
        let log = log_in(&dir);
        log.begin("install", Some("radarr"), None).unwrap();
        let done = log.begin("install", Some("sonarr"), None).unwrap();
        log.finish(&done, AttemptStatus::Success, None).unwrap();

        assert_eq!(log.recover_interrupted().unwrap(), 1);
        assert_eq!(log.recover_interrupted().unwrap(), 0);
        let all = log.list().unwrap();
        assert_eq!(all[0].status, AttemptStatus::Failed);
        assert_eq!(all[0].error.as_deref(), Some("interrupted"));
        assert_eq!(all[1].status, AttemptStatus::Success);
    }
}

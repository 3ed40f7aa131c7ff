use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{TaskError, TaskResult};
use crate::notify::TriggerPayload;
use crate::task::TaskId;

/// One-shot wake-ups keyed by task id.
#[async_trait]
pub trait AlarmClock: Send + Sync {
    /// Replaces any alarm already registered under `key`. Fails with
    /// [`TaskError::PermissionDenied`] when exact alarms are not allowed.
    async fn schedule_once(
        &self,
        key: TaskId,
        trigger_at: DateTime<Utc>,
        payload: TriggerPayload,
    ) -> TaskResult<()>;

    /// Idempotent.
    async fn cancel(&self, key: TaskId) -> TaskResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledAlarm {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub trigger_at: DateTime<Utc>,
    pub payload: TriggerPayload,
}

/// Alarm book persisted as `alarms.json`, standing in for the platform
/// alarm service.
#[derive(Debug)]
pub struct FileAlarmBook {
    path: PathBuf,
    exact_allowed: bool,
    entries: Mutex<BTreeMap<TaskId, ScheduledAlarm>>,
}

impl FileAlarmBook {
    /// Opens `alarms.json` in `data_dir`. A malformed book starts empty;
    /// the next write replaces it.
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path, exact_allowed: bool) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let path = data_dir.join("alarms.json");
        let entries = if path.exists() {
            load_alarms(&path).unwrap_or_else(|err| {
                warn!(
                    file = %path.display(),
                    error = %format!("{err:#}"),
                    "alarm book unreadable; starting empty"
                );
                BTreeMap::new()
            })
        } else {
            BTreeMap::new()
        };

        info!(
            file = %path.display(),
            scheduled = entries.len(),
            exact_allowed,
            "opened alarm book"
        );
        Ok(Self {
            path,
            exact_allowed,
            entries: Mutex::new(entries),
        })
    }

    pub async fn pending(&self) -> Vec<(TaskId, ScheduledAlarm)> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|(id, alarm)| (*id, alarm.clone()))
            .collect()
    }

    /// Removes and returns alarms due at `now`, earliest first.
    #[tracing::instrument(skip(self))]
    pub async fn take_due(&self, now: DateTime<Utc>) -> TaskResult<Vec<TriggerPayload>> {
        let mut entries = self.entries.lock().await;
        let mut due: Vec<(TaskId, ScheduledAlarm)> = entries
            .iter()
            .filter(|(_, alarm)| alarm.trigger_at <= now)
            .map(|(id, alarm)| (*id, alarm.clone()))
            .collect();
        if due.is_empty() {
            return Ok(vec![]);
        }

        let mut next = entries.clone();
        for (id, _) in &due {
            next.remove(id);
        }
        self.persist(&next).await?;
        *entries = next;

        due.sort_by_key(|(_, alarm)| alarm.trigger_at);
        debug!(count = due.len(), "took due alarms");
        Ok(due.into_iter().map(|(_, alarm)| alarm.payload).collect())
    }

    /// Re-reads the book written by other processes. On failure the
    /// in-memory entries stay as they were.
    #[tracing::instrument(skip(self))]
    pub async fn reload(&self) -> bool {
        let mut entries = self.entries.lock().await;
        let path = self.path.clone();
        let loaded = tokio::task::spawn_blocking(move || {
            if path.exists() {
                load_alarms(&path)
            } else {
                Ok(BTreeMap::new())
            }
        })
        .await
        .map_err(|err| anyhow!("alarm loader panicked: {err}"))
        .and_then(|result| result);

        match loaded {
            Ok(next) => {
                *entries = next;
                true
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "alarm reload failed; keeping entries");
                false
            }
        }
    }

    async fn persist(&self, entries: &BTreeMap<TaskId, ScheduledAlarm>) -> TaskResult<()> {
        let path = self.path.clone();
        let snapshot = entries.clone();
        tokio::task::spawn_blocking(move || save_alarms_atomic(&path, &snapshot))
            .await
            .map_err(|err| anyhow!("alarm writer panicked: {err}"))??;
        Ok(())
    }
}

#[async_trait]
impl AlarmClock for FileAlarmBook {
    #[tracing::instrument(skip(self, trigger_at, payload), fields(trigger_at = %trigger_at))]
    async fn schedule_once(
        &self,
        key: TaskId,
        trigger_at: DateTime<Utc>,
        payload: TriggerPayload,
    ) -> TaskResult<()> {
        if !self.exact_allowed {
            warn!(key, "exact alarms are disabled");
            return Err(TaskError::PermissionDenied(
                "exact alarms are disabled (alarms.exact=off)".to_string(),
            ));
        }

        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.insert(
            key,
            ScheduledAlarm {
                trigger_at,
                payload,
            },
        );
        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn cancel(&self, key: TaskId) -> TaskResult<()> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(&key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(&key);
        self.persist(&next).await?;
        *entries = next;
        debug!(key, "cancelled alarm");
        Ok(())
    }
}

fn load_alarms(path: &Path) -> anyhow::Result<BTreeMap<TaskId, ScheduledAlarm>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn save_alarms_atomic(
    path: &Path,
    entries: &BTreeMap<TaskId, ScheduledAlarm>,
) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, entries)?;
    writeln!(temp)?;
    temp.flush()?;
    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
    Ok(())
}

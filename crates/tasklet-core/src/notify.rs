use std::collections::BTreeMap;
use std::io::{self, Write};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::TaskResult;
use crate::store::TaskStore;
use crate::task::TaskId;

pub const REMINDER_HEADING: &str = "Task reminder";
const FALLBACK_TITLE: &str = "Task";

/// Data an alarm carries back when it fires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerPayload {
    pub task_id: TaskId,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Showing a notification with a tag already on screen replaces it.
    pub tag: TaskId,
    pub heading: String,
    pub body: String,
}

pub fn reminder_message(title: &str) -> String {
    let title = title.trim();
    let title = if title.is_empty() { FALLBACK_TITLE } else { title };
    format!("Time to do: {title}")
}

pub trait Notifier: Send + Sync {
    fn show(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Handles a fired alarm. Returns whether a notification was shown; an
/// alarm outliving its task is a silent no-op.
#[instrument(skip(store, notifier, payload), fields(id = payload.task_id))]
pub async fn handle_trigger(
    store: &dyn TaskStore,
    notifier: &dyn Notifier,
    payload: &TriggerPayload,
) -> TaskResult<bool> {
    let Some(task) = store.get(payload.task_id).await? else {
        debug!("reminder fired for a task that no longer exists");
        return Ok(false);
    };
    if task.is_completed {
        debug!("reminder fired for a completed task");
        return Ok(false);
    }

    let title = if task.title.trim().is_empty() {
        payload.title.as_str()
    } else {
        task.title.as_str()
    };
    notifier.show(Notification {
        tag: task.id,
        heading: REMINDER_HEADING.to_string(),
        body: reminder_message(title),
    })?;
    Ok(true)
}

/// Prints notifications and keeps the latest one per tag.
#[derive(Debug, Default)]
pub struct ConsoleNotifier {
    shown: Mutex<BTreeMap<TaskId, Notification>>,
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Vec<Notification> {
        self.shown.lock().values().cloned().collect()
    }
}

impl Notifier for ConsoleNotifier {
    fn show(&self, notification: Notification) -> anyhow::Result<()> {
        let replaced = self
            .shown
            .lock()
            .insert(notification.tag, notification.clone())
            .is_some();
        info!(tag = notification.tag, replaced, "showing notification");

        let mut out = io::stdout().lock();
        writeln!(out, "[{}] {}", notification.heading, notification.body)?;
        Ok(())
    }
}

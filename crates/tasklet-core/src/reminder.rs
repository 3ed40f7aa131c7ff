//! Reminder planning and alarm bookkeeping.
//!
//! Whether a task should have a reminder is a pure function of the task,
//! the lead offset and the current time ([`plan`]). [`ReminderScheduler`]
//! turns a plan into calls against an [`AlarmClock`]: it always cancels the
//! task's alarm first, so the alarm clock is the only state involved.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use crate::alarm::AlarmClock;
use crate::error::{TaskError, TaskResult};
use crate::notify::TriggerPayload;
use crate::task::{Task, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderPlan {
    Unscheduled,
    Scheduled(DateTime<Utc>),
}

/// What happened to a task's reminder after a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderOutcome {
    Scheduled(DateTime<Utc>),
    Unscheduled,
    /// Exact alarms are not allowed; no reminder will fire until the
    /// permission is granted and the task is synced again.
    PermissionDenied,
}

pub fn trigger_time(due: DateTime<Utc>, offset_minutes: u32) -> DateTime<Utc> {
    due - Duration::minutes(i64::from(offset_minutes))
}

/// A trigger at or before `now` is too late and is never fired early.
pub fn plan(task: &Task, offset_minutes: u32, now: DateTime<Utc>) -> ReminderPlan {
    if !task.is_persisted() || !task.notification_enabled || task.is_completed {
        return ReminderPlan::Unscheduled;
    }
    let Some(due) = task.execution_time else {
        return ReminderPlan::Unscheduled;
    };

    let at = trigger_time(due, offset_minutes);
    if at <= now {
        ReminderPlan::Unscheduled
    } else {
        ReminderPlan::Scheduled(at)
    }
}

#[derive(Clone)]
pub struct ReminderScheduler {
    alarms: Arc<dyn AlarmClock>,
}

impl ReminderScheduler {
    pub fn new(alarms: Arc<dyn AlarmClock>) -> Self {
        Self { alarms }
    }

    /// Brings the alarm for `task` in line with its current fields.
    #[instrument(skip(self, task, now), fields(id = task.id))]
    pub async fn sync(
        &self,
        task: &Task,
        offset_minutes: u32,
        now: DateTime<Utc>,
    ) -> TaskResult<ReminderOutcome> {
        if !task.is_persisted() {
            warn!("task has no id yet; not touching alarms");
            return Ok(ReminderOutcome::Unscheduled);
        }

        self.alarms.cancel(task.id).await?;

        let ReminderPlan::Scheduled(at) = plan(task, offset_minutes, now) else {
            debug!("reminder unscheduled");
            return Ok(ReminderOutcome::Unscheduled);
        };

        let payload = TriggerPayload {
            task_id: task.id,
            title: task.title.clone(),
        };
        match self.alarms.schedule_once(task.id, at, payload).await {
            Ok(()) => {
                info!(trigger_at = %at, "reminder scheduled");
                Ok(ReminderOutcome::Scheduled(at))
            }
            Err(TaskError::PermissionDenied(reason)) => {
                warn!(reason = %reason, "reminder not scheduled");
                Ok(ReminderOutcome::PermissionDenied)
            }
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, id: TaskId) -> TaskResult<()> {
        self.alarms.cancel(id).await
    }
}

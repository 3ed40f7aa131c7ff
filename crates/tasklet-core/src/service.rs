use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::attachments::AttachmentStore;
use crate::category::CategoryRegistry;
use crate::error::{TaskError, TaskResult};
use crate::notify::{self, Notifier, TriggerPayload};
use crate::reminder::{ReminderOutcome, ReminderScheduler};
use crate::settings::{AppSettings, SettingsPatch, SettingsStore};
use crate::store::TaskStore;
use crate::task::{Task, TaskId, UNASSIGNED_ID};
use crate::view::{self, VisibleTasks};

/// User-editable task fields, as submitted by a form or the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskInput {
    pub title: String,
    pub description: Option<String>,
    pub execution_time: Option<DateTime<Utc>>,
    pub notification_enabled: bool,
    pub category: Option<String>,
    pub attachments: Vec<String>,
}

impl TaskInput {
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            execution_time: task.execution_time,
            notification_enabled: task.notification_enabled,
            category: task.category.clone(),
            attachments: task.attachments.clone(),
        }
    }

    fn apply_to(self, task: &mut Task) {
        task.title = self.title;
        task.description = self.description;
        task.execution_time = self.execution_time;
        task.notification_enabled = self.notification_enabled;
        task.category = self.category;
        task.attachments = self.attachments;
    }
}

/// A written task together with what happened to its reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Saved {
    pub task: Task,
    pub reminder: ReminderOutcome,
}

/// Sole writer of tasks and settings for a session. Every mutation is
/// awaited in the store before reminders are brought in line with it.
pub struct TaskService {
    tasks: Arc<dyn TaskStore>,
    settings: Arc<dyn SettingsStore>,
    attachments: Arc<dyn AttachmentStore>,
    reminders: ReminderScheduler,
    registry: CategoryRegistry,
    search: watch::Sender<String>,
}

impl TaskService {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        settings: Arc<dyn SettingsStore>,
        attachments: Arc<dyn AttachmentStore>,
        reminders: ReminderScheduler,
    ) -> Self {
        let (search, _) = watch::channel(String::new());
        Self {
            tasks,
            settings,
            attachments,
            reminders,
            registry: CategoryRegistry::default(),
            search,
        }
    }

    pub fn settings(&self) -> AppSettings {
        self.settings.snapshot()
    }

    pub async fn get_task(&self, id: TaskId) -> TaskResult<Task> {
        self.tasks.get(id).await?.ok_or(TaskError::NotFound(id))
    }

    /// Live view of one task. Needs a running tokio runtime.
    pub fn watch_task(&self, id: TaskId) -> watch::Receiver<Option<Task>> {
        view::watch_task(self.tasks.watch_all(), id).0
    }

    #[instrument(skip(self, input, now), fields(title_len = input.title.len()))]
    pub async fn create_task(&self, input: TaskInput, now: DateTime<Utc>) -> TaskResult<Saved> {
        let mut task = Task::new(String::new(), now);
        input.apply_to(&mut task);
        task.normalize()?;

        task.id = self.tasks.insert(task.clone()).await?;
        info!(id = task.id, "task created");
        let reminder = self.sync_reminder(&task, now).await;
        Ok(Saved { task, reminder })
    }

    #[instrument(skip(self, input, now))]
    pub async fn edit_task(
        &self,
        id: TaskId,
        input: TaskInput,
        now: DateTime<Utc>,
    ) -> TaskResult<Saved> {
        let mut task = self.get_task(id).await?;
        input.apply_to(&mut task);
        task.normalize()?;

        self.tasks.update(&task).await?;
        info!(id, "task edited");
        let reminder = self.sync_reminder(&task, now).await;
        Ok(Saved { task, reminder })
    }

    #[instrument(skip(self, now))]
    pub async fn toggle_completed(&self, id: TaskId, now: DateTime<Utc>) -> TaskResult<Saved> {
        let mut task = self.get_task(id).await?;
        task.toggle_completed();

        self.tasks.update(&task).await?;
        info!(id, completed = task.is_completed, "completion toggled");
        let reminder = self.sync_reminder(&task, now).await;
        Ok(Saved { task, reminder })
    }

    #[instrument(skip(self))]
    pub async fn toggle_hidden(&self, id: TaskId) -> TaskResult<Task> {
        let mut task = self.get_task(id).await?;
        task.toggle_hidden()?;
        self.tasks.update(&task).await?;
        info!(id, hidden = task.is_individually_hidden, "hide toggled");
        Ok(task)
    }

    /// Cancels the reminder, deletes the row, then releases attachments.
    /// Alarm and attachment failures are logged; only the row delete can
    /// fail the call.
    #[instrument(skip(self))]
    pub async fn delete_task(&self, id: TaskId) -> TaskResult<Task> {
        let task = self.get_task(id).await?;

        if let Err(err) = self.reminders.cancel(id).await {
            warn!(id, error = %err, "failed to cancel reminder; a stale alarm may fire");
        }
        self.tasks.delete(id).await?;
        let released = self.attachments.release(&task.attachments).await;
        info!(id, released, "task deleted");
        Ok(task)
    }

    pub fn visible(&self) -> VisibleTasks {
        view::derive(
            &self.tasks.watch_all().borrow(),
            &self.settings.snapshot(),
            &self.search.borrow(),
        )
    }

    /// Continuously recomputed visible list. Needs a running tokio runtime.
    pub fn live_view(&self) -> watch::Receiver<VisibleTasks> {
        view::spawn_live_view(
            self.tasks.watch_all(),
            self.settings.watch(),
            self.search.subscribe(),
        )
        .0
    }

    pub fn set_search(&self, query: impl Into<String>) {
        self.search.send_replace(query.into());
    }

    pub async fn set_category_filters(&self, filters: BTreeSet<String>) -> TaskResult<()> {
        let filters = filters
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        self.settings
            .write(SettingsPatch {
                category_filters: Some(filters),
                ..SettingsPatch::default()
            })
            .await?;
        Ok(())
    }

    pub async fn set_show_only_hidden(&self, show: bool) -> TaskResult<()> {
        self.settings
            .write(SettingsPatch {
                show_only_hidden: Some(show),
                ..SettingsPatch::default()
            })
            .await?;
        Ok(())
    }

    pub async fn set_hide_completed(&self, hide: bool) -> TaskResult<()> {
        self.settings
            .write(SettingsPatch {
                hide_completed_tasks: Some(hide),
                ..SettingsPatch::default()
            })
            .await?;
        Ok(())
    }

    /// Stores the new lead offset and re-syncs every task's reminder with it.
    #[instrument(skip(self, now))]
    pub async fn set_notification_offset(
        &self,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> TaskResult<Vec<(TaskId, ReminderOutcome)>> {
        self.settings
            .write(SettingsPatch {
                notification_offset_minutes: Some(minutes),
                ..SettingsPatch::default()
            })
            .await?;
        Ok(self.resync_reminders(now).await)
    }

    pub async fn resync_reminders(&self, now: DateTime<Utc>) -> Vec<(TaskId, ReminderOutcome)> {
        let tasks = self.tasks.watch_all().borrow().clone();
        let mut out = Vec::with_capacity(tasks.len());
        for task in &tasks {
            out.push((task.id, self.sync_reminder(task, now).await));
        }
        out
    }

    /// Delivers a fired alarm against the current state of its task.
    pub async fn deliver_reminder(
        &self,
        notifier: &dyn Notifier,
        payload: &TriggerPayload,
    ) -> TaskResult<bool> {
        notify::handle_trigger(self.tasks.as_ref(), notifier, payload).await
    }

    pub fn categories(&self) -> Vec<String> {
        self.registry.all(&self.settings.snapshot().user_categories)
    }

    pub async fn add_category(&self, name: &str) -> TaskResult<String> {
        let mut user = self.settings.snapshot().user_categories;
        let added = self.registry.add(name, &mut user)?;
        self.settings
            .write(SettingsPatch {
                user_categories: Some(user),
                ..SettingsPatch::default()
            })
            .await?;
        Ok(added)
    }

    /// Tasks keep the category text they were saved with.
    pub async fn remove_category(&self, name: &str) -> TaskResult<bool> {
        let mut user = self.settings.snapshot().user_categories;
        if !self.registry.remove(name, &mut user) {
            return Ok(false);
        }
        self.settings
            .write(SettingsPatch {
                user_categories: Some(user),
                ..SettingsPatch::default()
            })
            .await?;
        Ok(true)
    }

    async fn sync_reminder(&self, task: &Task, now: DateTime<Utc>) -> ReminderOutcome {
        if task.id == UNASSIGNED_ID {
            return ReminderOutcome::Unscheduled;
        }
        let offset = self.settings.snapshot().notification_offset_minutes;
        match self.reminders.sync(task, offset, now).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(id = task.id, error = %err, "reminder sync failed; no reminder will fire");
                ReminderOutcome::Unscheduled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::Path;
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::tempdir;

    use super::{TaskInput, TaskService};
    use crate::alarm::FileAlarmBook;
    use crate::attachments::DirAttachmentStore;
    use crate::error::TaskError;
    use crate::reminder::{ReminderOutcome, ReminderScheduler};
    use crate::settings::FileSettingsStore;
    use crate::store::FileTaskStore;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 10, 9, 0, 0)
            .single()
            .expect("valid now")
    }

    fn service(dir: &Path, exact: bool) -> (TaskService, Arc<FileAlarmBook>) {
        let alarms = Arc::new(FileAlarmBook::open(dir, exact).expect("alarms"));
        let service = TaskService::new(
            Arc::new(FileTaskStore::open(dir).expect("tasks")),
            Arc::new(FileSettingsStore::open(dir).expect("settings")),
            Arc::new(DirAttachmentStore::new(dir)),
            ReminderScheduler::new(alarms.clone()),
        );
        (service, alarms)
    }

    fn reminded(title: &str, due_in: Duration) -> TaskInput {
        TaskInput {
            title: title.to_string(),
            execution_time: Some(now() + due_in),
            notification_enabled: true,
            ..TaskInput::default()
        }
    }

    #[tokio::test]
    async fn create_schedules_reminder_before_due_time() {
        let temp = tempdir().expect("tempdir");
        let (service, alarms) = service(temp.path(), true);

        let saved = service
            .create_task(reminded("call the dentist", Duration::hours(2)), now())
            .await
            .expect("create");

        let expected = now() + Duration::hours(2) - Duration::minutes(15);
        assert_eq!(saved.task.id, 1);
        assert_eq!(saved.reminder, ReminderOutcome::Scheduled(expected));
        let pending = alarms.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].1.trigger_at, expected);
        assert_eq!(pending[0].1.payload.title, "call the dentist");
    }

    #[tokio::test]
    async fn completing_cancels_and_reopening_reschedules() {
        let temp = tempdir().expect("tempdir");
        let (service, alarms) = service(temp.path(), true);
        let id = service
            .create_task(reminded("pay rent", Duration::days(1)), now())
            .await
            .expect("create")
            .task
            .id;

        let done = service.toggle_completed(id, now()).await.expect("done");
        assert_eq!(done.reminder, ReminderOutcome::Unscheduled);
        assert!(alarms.pending().await.is_empty());

        let reopened = service.toggle_completed(id, now()).await.expect("reopen");
        assert!(matches!(reopened.reminder, ReminderOutcome::Scheduled(_)));
        assert_eq!(alarms.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn hiding_requires_completion_and_reopening_unhides() {
        let temp = tempdir().expect("tempdir");
        let (service, _) = service(temp.path(), true);
        let id = service
            .create_task(
                TaskInput {
                    title: "sort photos".to_string(),
                    ..TaskInput::default()
                },
                now(),
            )
            .await
            .expect("create")
            .task
            .id;

        let err = service.toggle_hidden(id).await.expect_err("not completed");
        assert!(matches!(err, TaskError::Validation(_)));

        service.toggle_completed(id, now()).await.expect("done");
        let hidden = service.toggle_hidden(id).await.expect("hide");
        assert!(hidden.is_individually_hidden);
        assert!(service.visible().tasks.is_empty());

        let reopened = service.toggle_completed(id, now()).await.expect("reopen");
        assert!(!reopened.task.is_completed);
        assert!(!reopened.task.is_individually_hidden);
        assert_eq!(service.visible().tasks.len(), 1);
    }

    #[tokio::test]
    async fn delete_cancels_alarm_and_releases_attachments() {
        let temp = tempdir().expect("tempdir");
        let (service, alarms) = service(temp.path(), true);
        let attachments_dir = temp.path().join("attachments");
        std::fs::create_dir_all(&attachments_dir).expect("mkdir");
        std::fs::write(attachments_dir.join("receipt.jpg"), b"jpg").expect("write");

        let mut input = reminded("file taxes", Duration::hours(5));
        input.attachments = vec!["receipt.jpg".to_string()];
        let id = service.create_task(input, now()).await.expect("create").task.id;
        assert_eq!(alarms.pending().await.len(), 1);

        service.delete_task(id).await.expect("delete");
        assert!(alarms.pending().await.is_empty());
        assert!(!attachments_dir.join("receipt.jpg").exists());
        assert!(matches!(
            service.get_task(id).await,
            Err(TaskError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn denied_exact_alarms_still_save_the_task() {
        let temp = tempdir().expect("tempdir");
        let (service, alarms) = service(temp.path(), false);

        let saved = service
            .create_task(reminded("renew passport", Duration::days(3)), now())
            .await
            .expect("create");

        assert_eq!(saved.reminder, ReminderOutcome::PermissionDenied);
        assert!(service.get_task(saved.task.id).await.is_ok());
        assert!(alarms.pending().await.is_empty());
    }

    #[tokio::test]
    async fn offset_change_resyncs_every_reminder() {
        let temp = tempdir().expect("tempdir");
        let (service, alarms) = service(temp.path(), true);
        service
            .create_task(reminded("standup", Duration::hours(1)), now())
            .await
            .expect("create");

        let outcomes = service
            .set_notification_offset(90, now())
            .await
            .expect("offset");

        assert_eq!(outcomes, vec![(1, ReminderOutcome::Unscheduled)]);
        assert!(alarms.pending().await.is_empty());
        assert_eq!(service.settings().notification_offset_minutes, 90);
    }

    #[tokio::test]
    async fn category_filters_and_user_categories_persist() {
        let temp = tempdir().expect("tempdir");
        {
            let (service, _) = service(temp.path(), true);
            service.add_category("Garden").await.expect("add");
            service
                .set_category_filters(BTreeSet::from(["Garden".to_string(), "  ".to_string()]))
                .await
                .expect("filters");
            assert!(service.add_category("home").await.is_err());
        }

        let (reopened, _) = service(temp.path(), true);
        let settings = reopened.settings();
        assert_eq!(settings.category_filters, BTreeSet::from(["Garden".to_string()]));
        assert_eq!(
            reopened.categories(),
            vec!["Garden", "Home", "Personal", "Work"]
        );
        assert!(reopened.remove_category("garden").await.expect("remove"));
        assert!(!reopened.remove_category("Work").await.expect("predefined"));
    }

    #[tokio::test]
    async fn watched_task_follows_edits() {
        let temp = tempdir().expect("tempdir");
        let (service, _) = service(temp.path(), true);
        let saved = service
            .create_task(
                TaskInput {
                    title: "draft".to_string(),
                    ..TaskInput::default()
                },
                now(),
            )
            .await
            .expect("create");
        let id = saved.task.id;
        let mut watched = service.watch_task(id);
        assert_eq!(
            watched.borrow_and_update().as_ref().map(|task| task.title.clone()),
            Some("draft".to_string())
        );

        let mut input = TaskInput::from_task(&saved.task);
        input.title = "final".to_string();
        service.edit_task(id, input, now()).await.expect("edit");

        watched.changed().await.expect("watcher alive");
        assert_eq!(
            watched.borrow().as_ref().map(|task| task.title.clone()),
            Some("final".to_string())
        );
    }

    #[tokio::test]
    async fn blank_title_is_rejected_without_writing() {
        let temp = tempdir().expect("tempdir");
        let (service, _) = service(temp.path(), true);

        let err = service
            .create_task(TaskInput::default(), now())
            .await
            .expect_err("blank title");
        assert!(matches!(err, TaskError::Validation(_)));
        assert!(service.visible().tasks.is_empty());
    }
}

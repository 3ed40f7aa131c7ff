use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::error::{TaskError, TaskResult};
use crate::task::{Task, TaskId, UNASSIGNED_ID};

/// Durable keyed task records.
///
/// `watch_all` carries every task ordered by creation time, newest first;
/// it emits after each successful write.
#[async_trait]
pub trait TaskStore: Send + Sync {
    fn watch_all(&self) -> watch::Receiver<Vec<Task>>;

    async fn get(&self, id: TaskId) -> TaskResult<Option<Task>> {
        Ok(self
            .watch_all()
            .borrow()
            .iter()
            .find(|task| task.id == id)
            .cloned())
    }

    /// Stores `task` and returns its id. An unassigned id gets the next
    /// free one; an assigned id replaces the existing row.
    async fn insert(&self, task: Task) -> TaskResult<TaskId>;

    async fn update(&self, task: &Task) -> TaskResult<()>;

    async fn delete(&self, id: TaskId) -> TaskResult<()>;
}

#[derive(Debug)]
pub struct FileTaskStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    tx: watch::Sender<Vec<Task>>,
    write_lock: Mutex<()>,
}

impl FileTaskStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join("tasks.data");
        if !tasks_path.exists() {
            fs::write(&tasks_path, "")?;
        }

        let mut tasks = load_jsonl(&tasks_path).context("failed to load tasks.data")?;
        sort_for_listing(&mut tasks);

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            count = tasks.len(),
            "opened task store"
        );

        let (tx, _) = watch::channel(tasks);
        Ok(Self {
            data_dir,
            tasks_path,
            tx,
            write_lock: Mutex::new(()),
        })
    }

    /// Re-reads the file. On failure the last-known snapshot stays live.
    #[tracing::instrument(skip(self))]
    pub async fn reload(&self) -> bool {
        let _guard = self.write_lock.lock().await;
        let path = self.tasks_path.clone();
        let loaded = tokio::task::spawn_blocking(move || load_jsonl(&path))
            .await
            .map_err(|err| anyhow!("task loader panicked: {err}"))
            .and_then(|result| result);

        match loaded {
            Ok(mut tasks) => {
                sort_for_listing(&mut tasks);
                self.tx.send_replace(tasks);
                true
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "reload failed; keeping last snapshot");
                false
            }
        }
    }

    fn snapshot(&self) -> Vec<Task> {
        self.tx.borrow().clone()
    }

    async fn commit(&self, mut tasks: Vec<Task>) -> TaskResult<()> {
        sort_for_listing(&mut tasks);
        let path = self.tasks_path.clone();
        let to_save = tasks.clone();
        tokio::task::spawn_blocking(move || save_jsonl_atomic(&path, &to_save))
            .await
            .map_err(|err| anyhow!("task writer panicked: {err}"))?
            .context("failed to save tasks.data")?;
        self.tx.send_replace(tasks);
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    fn watch_all(&self) -> watch::Receiver<Vec<Task>> {
        self.tx.subscribe()
    }

    #[tracing::instrument(skip(self, task), fields(id = task.id))]
    async fn insert(&self, mut task: Task) -> TaskResult<TaskId> {
        let _guard = self.write_lock.lock().await;
        let mut tasks = self.snapshot();

        if task.id == UNASSIGNED_ID {
            task.id = next_id(&tasks);
        } else {
            tasks.retain(|existing| existing.id != task.id);
        }
        let id = task.id;
        tasks.push(task);
        self.commit(tasks).await?;

        debug!(id, "inserted task");
        Ok(id)
    }

    #[tracing::instrument(skip(self, task), fields(id = task.id))]
    async fn update(&self, task: &Task) -> TaskResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tasks = self.snapshot();

        let slot = tasks
            .iter_mut()
            .find(|existing| existing.id == task.id)
            .ok_or(TaskError::NotFound(task.id))?;
        *slot = task.clone();
        self.commit(tasks).await
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: TaskId) -> TaskResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tasks = self.snapshot();
        let before = tasks.len();
        tasks.retain(|task| task.id != id);
        if tasks.len() == before {
            debug!(id, "delete of absent task; nothing to do");
            return Ok(());
        }
        self.commit(tasks).await
    }
}

pub fn next_id(tasks: &[Task]) -> TaskId {
    tasks.iter().map(|task| task.id).max().unwrap_or(0) + 1
}

/// Newest first; ids break ties so equal timestamps list deterministically.
fn sort_for_listing(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        b.creation_time
            .cmp(&a.creation_time)
            .then_with(|| b.id.cmp(&a.id))
    });
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Task>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let task: Task = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(task);
    }

    debug!(count = out.len(), "loaded tasks from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, tasks))]
fn save_jsonl_atomic(path: &Path, tasks: &[Task]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = tasks.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for task in tasks {
        let serialized = serde_json::to_string(task)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::tempdir;

    use super::{FileTaskStore, TaskStore};
    use crate::error::TaskError;
    use crate::task::Task;

    #[tokio::test]
    async fn assigns_ids_and_lists_newest_first() {
        let temp = tempdir().expect("tempdir");
        let store = FileTaskStore::open(temp.path()).expect("open");
        let t0 = Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).single().expect("t0");

        let first = store.insert(Task::new("first", t0)).await.expect("insert");
        let second = store
            .insert(Task::new("second", t0 + Duration::minutes(1)))
            .await
            .expect("insert");
        assert_eq!((first, second), (1, 2));

        let titles: Vec<String> = store
            .watch_all()
            .borrow()
            .iter()
            .map(|task| task.title.clone())
            .collect();
        assert_eq!(titles, vec!["second", "first"]);

        let reopened = FileTaskStore::open(temp.path()).expect("reopen");
        let loaded = reopened.get(first).await.expect("get");
        assert_eq!(loaded.map(|task| task.title), Some("first".to_string()));
    }

    #[tokio::test]
    async fn update_missing_task_is_not_found() {
        let temp = tempdir().expect("tempdir");
        let store = FileTaskStore::open(temp.path()).expect("open");
        let mut ghost = Task::new("ghost", Utc::now());
        ghost.id = 42;

        let err = store.update(&ghost).await.expect_err("missing id");
        assert!(matches!(err, TaskError::NotFound(42)));
    }

    #[tokio::test]
    async fn writes_notify_subscribers() {
        let temp = tempdir().expect("tempdir");
        let store = FileTaskStore::open(temp.path()).expect("open");
        let mut rx = store.watch_all();
        rx.borrow_and_update();

        let id = store.insert(Task::new("ping", Utc::now())).await.expect("insert");
        assert!(rx.has_changed().expect("open"));
        assert_eq!(rx.borrow_and_update().len(), 1);

        store.delete(id).await.expect("delete");
        assert!(rx.has_changed().expect("open"));
        assert!(rx.borrow().is_empty());
    }

    #[tokio::test]
    async fn reload_picks_up_rows_written_elsewhere() {
        let temp = tempdir().expect("tempdir");
        let reader = FileTaskStore::open(temp.path()).expect("open reader");
        let writer = FileTaskStore::open(temp.path()).expect("open writer");
        writer.insert(Task::new("from cron", Utc::now())).await.expect("insert");

        assert!(reader.watch_all().borrow().is_empty());
        assert!(reader.reload().await);
        assert_eq!(reader.watch_all().borrow().len(), 1);
    }

    #[tokio::test]
    async fn reload_keeps_snapshot_when_file_is_corrupt() {
        let temp = tempdir().expect("tempdir");
        let store = FileTaskStore::open(temp.path()).expect("open");
        store.insert(Task::new("keep me", Utc::now())).await.expect("insert");

        std::fs::write(&store.tasks_path, "{broken").expect("corrupt");
        assert!(!store.reload().await);
        assert_eq!(store.watch_all().borrow().len(), 1);
    }
}

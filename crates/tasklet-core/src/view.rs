//! Derives the displayed task list from the store, the settings and the
//! session search text.
//!
//! [`visible_tasks`] is the whole pipeline as a pure function. The live
//! variant only re-runs it whenever one of its inputs emits.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::filter::Filter;
use crate::settings::AppSettings;
use crate::task::{Task, TaskId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub search: String,
    pub category_filters: BTreeSet<String>,
    pub show_only_hidden: bool,
}

impl ViewState {
    /// Persisted selection from `settings` combined with session search text.
    pub fn from_settings(settings: &AppSettings, search: &str) -> Self {
        Self {
            search: search.to_string(),
            category_filters: settings.category_filters.clone(),
            show_only_hidden: settings.show_only_hidden,
        }
    }

    pub fn dimensions(&self) -> ActiveDimensions {
        ActiveDimensions {
            search: !self.search.trim().is_empty(),
            categories: !self.category_filters.is_empty(),
            show_only_hidden: self.show_only_hidden,
        }
    }
}

/// Which filter dimensions narrowed the list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveDimensions {
    pub search: bool,
    pub categories: bool,
    pub show_only_hidden: bool,
}

impl ActiveDimensions {
    pub fn any(&self) -> bool {
        self.search || self.categories || self.show_only_hidden
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibleTasks {
    pub tasks: Vec<Task>,
    pub dimensions: ActiveDimensions,
}

impl VisibleTasks {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[tracing::instrument(skip_all, fields(input = tasks.len()))]
pub fn visible_tasks(tasks: &[Task], view: &ViewState, settings: &AppSettings) -> Vec<Task> {
    let filter = Filter::from_view(view, settings);
    let mut out: Vec<Task> = tasks
        .iter()
        .filter(|task| filter.matches(task))
        .cloned()
        .collect();
    sort_by_due(&mut out);
    trace!(output = out.len(), "derived visible tasks");
    out
}

/// Stable ascending sort on due time; tasks without one go last.
pub fn sort_by_due(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| match (a.execution_time, b.execution_time) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

pub fn derive(tasks: &[Task], settings: &AppSettings, search: &str) -> VisibleTasks {
    let view = ViewState::from_settings(settings, search);
    VisibleTasks {
        tasks: visible_tasks(tasks, &view, settings),
        dimensions: view.dimensions(),
    }
}

/// Recomputes [`VisibleTasks`] on every emission of any input. The loop
/// ends once every output receiver is dropped or an input closes.
pub fn spawn_live_view(
    mut tasks: watch::Receiver<Vec<Task>>,
    mut settings: watch::Receiver<AppSettings>,
    mut search: watch::Receiver<String>,
) -> (watch::Receiver<VisibleTasks>, JoinHandle<()>) {
    let initial = derive(
        &tasks.borrow_and_update(),
        &settings.borrow_and_update(),
        &search.borrow_and_update(),
    );
    let (tx, rx) = watch::channel(initial);

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = tasks.changed() => if changed.is_err() { break },
                changed = settings.changed() => if changed.is_err() { break },
                changed = search.changed() => if changed.is_err() { break },
                _ = tx.closed() => break,
            }

            let next = derive(
                &tasks.borrow_and_update(),
                &settings.borrow_and_update(),
                &search.borrow_and_update(),
            );
            debug!(
                visible = next.tasks.len(),
                dimensions = ?next.dimensions,
                "recomputed visible tasks"
            );
            if tx.send(next).is_err() {
                break;
            }
        }
        debug!("live view stopped");
    });

    (rx, handle)
}

/// Live view of one task; yields `None` once the task is gone.
pub fn watch_task(
    mut tasks: watch::Receiver<Vec<Task>>,
    id: TaskId,
) -> (watch::Receiver<Option<Task>>, JoinHandle<()>) {
    let find = move |all: &[Task]| all.iter().find(|task| task.id == id).cloned();
    let (tx, rx) = watch::channel(find(&tasks.borrow_and_update()));

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = tasks.changed() => if changed.is_err() { break },
                _ = tx.closed() => break,
            }
            let current = find(&tasks.borrow_and_update());
            tx.send_if_modified(|slot| {
                if *slot == current {
                    false
                } else {
                    *slot = current;
                    true
                }
            });
        }
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tokio::sync::watch;

    use super::{ViewState, derive, spawn_live_view, visible_tasks, watch_task};
    use crate::settings::AppSettings;
    use crate::task::Task;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 7, 30, 0).single().expect("t0")
    }

    fn task(id: u64, title: &str, due_minutes: Option<i64>) -> Task {
        let mut task = Task::new(title, t0() - Duration::minutes(id as i64));
        task.id = id;
        task.execution_time = due_minutes.map(|m| t0() + Duration::minutes(m));
        task
    }

    fn ids(tasks: &[Task]) -> Vec<u64> {
        tasks.iter().map(|task| task.id).collect()
    }

    #[test]
    fn blank_search_keeps_all_sorted_with_missing_due_last() {
        let tasks = vec![
            task(1, "a", None),
            task(2, "b", Some(30)),
            task(3, "c", None),
            task(4, "d", Some(-10)),
            task(5, "e", Some(30)),
        ];
        let view = ViewState {
            search: "   ".to_string(),
            ..ViewState::default()
        };

        let out = visible_tasks(&tasks, &view, &AppSettings::default());
        assert_eq!(ids(&out), vec![4, 2, 5, 1, 3]);
    }

    #[test]
    fn category_filter_is_case_insensitive() {
        let mut work = task(1, "report", None);
        work.category = Some("Work".to_string());
        let mut home = task(2, "dishes", None);
        home.category = Some("Home".to_string());

        let view = ViewState {
            category_filters: BTreeSet::from(["work".to_string()]),
            ..ViewState::default()
        };
        let out = visible_tasks(&[work, home], &view, &AppSettings::default());
        assert_eq!(ids(&out), vec![1]);
    }

    #[test]
    fn hide_completed_applies_only_outside_hidden_view() {
        let mut done = task(1, "done", None);
        done.is_completed = true;
        let open = task(2, "open", None);
        let mut archived = task(3, "archived", None);
        archived.is_completed = true;
        archived.is_individually_hidden = true;
        let tasks = vec![done, open, archived];

        let settings = AppSettings {
            hide_completed_tasks: true,
            ..AppSettings::default()
        };
        let shown = visible_tasks(&tasks, &ViewState::default(), &settings);
        assert_eq!(ids(&shown), vec![2]);

        let hidden_view = ViewState {
            show_only_hidden: true,
            ..ViewState::default()
        };
        let hidden = visible_tasks(&tasks, &hidden_view, &settings);
        assert_eq!(ids(&hidden), vec![3]);
    }

    #[test]
    fn filtering_is_idempotent() {
        let mut tasks = vec![
            task(1, "Buy milk", Some(5)),
            task(2, "milk the cow", None),
            task(3, "taxes", Some(1)),
        ];
        tasks[1].category = Some("Farm".to_string());
        let view = ViewState {
            search: "MILK".to_string(),
            ..ViewState::default()
        };
        let settings = AppSettings::default();

        let once = visible_tasks(&tasks, &view, &settings);
        let twice = visible_tasks(&once, &view, &settings);
        assert_eq!(once, twice);
        assert_eq!(ids(&once), vec![1, 2]);
    }

    #[test]
    fn dimensions_report_active_filters() {
        let settings = AppSettings {
            category_filters: BTreeSet::from(["Home".to_string()]),
            ..AppSettings::default()
        };
        let result = derive(&[], &settings, "x");
        assert!(result.is_empty());
        assert!(result.dimensions.search);
        assert!(result.dimensions.categories);
        assert!(!result.dimensions.show_only_hidden);
    }

    #[tokio::test]
    async fn live_view_recomputes_on_each_input() {
        let (tasks_tx, tasks_rx) = watch::channel(vec![task(1, "alpha", None)]);
        let (settings_tx, settings_rx) = watch::channel(AppSettings::default());
        let (search_tx, search_rx) = watch::channel(String::new());

        let (mut view, _handle) = spawn_live_view(tasks_rx, settings_rx, search_rx);
        assert_eq!(ids(&view.borrow_and_update().tasks), vec![1]);

        tasks_tx.send_replace(vec![task(1, "alpha", None), task(2, "beta", Some(1))]);
        view.changed().await.expect("recompute");
        assert_eq!(ids(&view.borrow_and_update().tasks), vec![2, 1]);

        search_tx.send_replace("bet".to_string());
        view.changed().await.expect("recompute");
        assert_eq!(ids(&view.borrow_and_update().tasks), vec![2]);

        settings_tx.send_replace(AppSettings {
            show_only_hidden: true,
            ..AppSettings::default()
        });
        view.changed().await.expect("recompute");
        let current = view.borrow_and_update().clone();
        assert!(current.tasks.is_empty());
        assert!(current.dimensions.show_only_hidden);
    }

    #[tokio::test]
    async fn watch_task_tracks_updates_and_removal() {
        let (tasks_tx, tasks_rx) = watch::channel(vec![task(7, "seven", None)]);
        let (mut one, _handle) = watch_task(tasks_rx, 7);
        assert_eq!(
            one.borrow_and_update().as_ref().map(|t| t.title.clone()),
            Some("seven".to_string())
        );

        tasks_tx.send_replace(vec![task(7, "SEVEN", None)]);
        one.changed().await.expect("update");
        assert_eq!(
            one.borrow_and_update().as_ref().map(|t| t.title.clone()),
            Some("SEVEN".to_string())
        );

        tasks_tx.send_replace(vec![]);
        one.changed().await.expect("removal");
        assert!(one.borrow().is_none());
    }
}

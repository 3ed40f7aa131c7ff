use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::error::TaskResult;

pub const DEFAULT_NOTIFICATION_OFFSET_MINUTES: u32 = 15;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppSettings {
    pub notification_offset_minutes: u32,
    pub user_categories: BTreeSet<String>,
    pub category_filters: BTreeSet<String>,
    pub show_only_hidden: bool,
    pub hide_completed_tasks: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            notification_offset_minutes: DEFAULT_NOTIFICATION_OFFSET_MINUTES,
            user_categories: BTreeSet::new(),
            category_filters: BTreeSet::new(),
            show_only_hidden: false,
            hide_completed_tasks: false,
        }
    }
}

/// Partial settings update; `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub notification_offset_minutes: Option<u32>,
    pub user_categories: Option<BTreeSet<String>>,
    pub category_filters: Option<BTreeSet<String>>,
    pub show_only_hidden: Option<bool>,
    pub hide_completed_tasks: Option<bool>,
}

impl AppSettings {
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(minutes) = patch.notification_offset_minutes {
            self.notification_offset_minutes = minutes;
        }
        if let Some(categories) = patch.user_categories {
            self.user_categories = categories;
        }
        if let Some(filters) = patch.category_filters {
            self.category_filters = filters;
        }
        if let Some(show) = patch.show_only_hidden {
            self.show_only_hidden = show;
        }
        if let Some(hide) = patch.hide_completed_tasks {
            self.hide_completed_tasks = hide;
        }
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Live snapshot; emits after every successful write.
    fn watch(&self) -> watch::Receiver<AppSettings>;

    fn snapshot(&self) -> AppSettings {
        self.watch().borrow().clone()
    }

    async fn write(&self, patch: SettingsPatch) -> TaskResult<AppSettings>;
}

#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    tx: watch::Sender<AppSettings>,
    write_lock: Mutex<()>,
}

impl FileSettingsStore {
    /// Opens `settings.toml` in `data_dir`. An unreadable or malformed file
    /// degrades to defaults instead of failing.
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let path = data_dir.join("settings.toml");

        let settings = if path.exists() {
            load_settings(&path).unwrap_or_else(|err| {
                warn!(
                    file = %path.display(),
                    error = %format!("{err:#}"),
                    "settings unreadable; using defaults"
                );
                AppSettings::default()
            })
        } else {
            AppSettings::default()
        };

        info!(
            file = %path.display(),
            offset = settings.notification_offset_minutes,
            "opened settings store"
        );
        let (tx, _) = watch::channel(settings);
        Ok(Self {
            path,
            tx,
            write_lock: Mutex::new(()),
        })
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    fn watch(&self) -> watch::Receiver<AppSettings> {
        self.tx.subscribe()
    }

    #[tracing::instrument(skip(self))]
    async fn write(&self, patch: SettingsPatch) -> TaskResult<AppSettings> {
        let _guard = self.write_lock.lock().await;
        let mut next = self.tx.borrow().clone();
        next.apply(patch);

        let path = self.path.clone();
        let to_save = next.clone();
        tokio::task::spawn_blocking(move || save_settings_atomic(&path, &to_save))
            .await
            .map_err(|err| anyhow!("settings writer panicked: {err}"))??;

        self.tx.send_replace(next.clone());
        debug!("settings written");
        Ok(next)
    }
}

fn load_settings(path: &Path) -> anyhow::Result<AppSettings> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn save_settings_atomic(path: &Path, settings: &AppSettings) -> anyhow::Result<()> {
    let serialized = toml::to_string(settings).context("failed to serialize settings")?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(serialized.as_bytes())?;
    temp.flush()?;
    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
    Ok(())
}

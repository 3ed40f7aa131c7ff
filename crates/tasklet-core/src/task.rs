use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TaskError, TaskResult};

pub type TaskId = u64;

/// Id carried by a task the store has not assigned yet.
pub const UNASSIGNED_ID: TaskId = 0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    #[serde(default)]
    pub id: TaskId,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub creation_time: DateTime<Utc>,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub execution_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub is_completed: bool,

    #[serde(default)]
    pub notification_enabled: bool,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub attachments: Vec<String>,

    #[serde(default)]
    pub is_individually_hidden: bool,
}

impl Task {
    pub fn new(title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: UNASSIGNED_ID,
            title: title.into(),
            description: None,
            creation_time: now,
            execution_time: None,
            is_completed: false,
            notification_enabled: false,
            category: None,
            attachments: vec![],
            is_individually_hidden: false,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id != UNASSIGNED_ID
    }

    /// Flips completion. Un-completing always clears the hidden flag.
    pub fn toggle_completed(&mut self) {
        self.is_completed = !self.is_completed;
        if !self.is_completed {
            self.is_individually_hidden = false;
        }
    }

    pub fn toggle_hidden(&mut self) -> TaskResult<()> {
        if !self.is_completed {
            return Err(TaskError::validation(format!(
                "task {} must be completed before it can be hidden",
                self.id
            )));
        }
        self.is_individually_hidden = !self.is_individually_hidden;
        Ok(())
    }

    /// Trims user text and rejects a blank title.
    pub fn normalize(&mut self) -> TaskResult<()> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(TaskError::validation("title must not be blank"));
        }
        self.title = title.to_string();
        self.description = non_blank(self.description.take());
        self.category = non_blank(self.category.take());
        self.attachments = self
            .attachments
            .iter()
            .map(|reference| reference.trim())
            .filter(|reference| !reference.is_empty())
            .map(ToString::to_string)
            .collect();
        if !self.is_completed {
            self.is_individually_hidden = false;
        }
        Ok(())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::alarm::ScheduledAlarm;
use crate::category::NO_CATEGORY_LABEL;
use crate::config::Config;
use crate::datetime::format_local;
use crate::reminder::ReminderOutcome;
use crate::settings::AppSettings;
use crate::task::{Task, TaskId};
use crate::view::ActiveDimensions;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config, tz: Tz) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color, tz })
    }

    #[tracing::instrument(skip(self, tasks, now), fields(count = tasks.len()))]
    pub fn print_task_table(&self, tasks: &[Task], now: DateTime<Utc>) -> anyhow::Result<()> {
        let (headers, rows) = self.task_table(tasks, now);
        let mut out = io::stdout().lock();
        write_table(&mut out, headers, rows)
    }

    fn task_table(&self, tasks: &[Task], now: DateTime<Utc>) -> (Vec<String>, Vec<Vec<String>>) {
        let headers = ["ID", "Due", "Category", "Title", "Flags"]
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks {
            let due = task
                .execution_time
                .map(|at| {
                    let text = format_local(at, &self.tz);
                    if at < now && !task.is_completed {
                        self.paint(&text, "31")
                    } else {
                        text
                    }
                })
                .unwrap_or_default();

            let title = if task.is_completed {
                self.paint(&task.title, "2")
            } else {
                task.title.clone()
            };

            rows.push(vec![
                self.paint(&task.id.to_string(), "33"),
                due,
                category_label(task).to_string(),
                title,
                flags(task),
            ]);
        }
        (headers, rows)
    }

    #[tracing::instrument(skip(self, task), fields(id = task.id))]
    pub fn print_task_info(&self, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id           {}", task.id)?;
        writeln!(out, "title        {}", task.title)?;
        writeln!(
            out,
            "description  {}",
            task.description.as_deref().unwrap_or_default()
        )?;
        writeln!(out, "category     {}", category_label(task))?;
        writeln!(out, "created      {}", format_local(task.creation_time, &self.tz))?;
        if let Some(due) = task.execution_time {
            writeln!(out, "due          {}", format_local(due, &self.tz))?;
        }
        writeln!(out, "completed    {}", yes_no(task.is_completed))?;
        writeln!(out, "reminder     {}", yes_no(task.notification_enabled))?;
        writeln!(out, "hidden       {}", yes_no(task.is_individually_hidden))?;
        if !task.attachments.is_empty() {
            writeln!(out, "attachments  {}", task.attachments.join(", "))?;
        }

        Ok(())
    }

    /// Explains an empty list: either nothing exists yet or the active
    /// filters rule everything out.
    pub fn print_empty_hint(&self, dimensions: ActiveDimensions) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if !dimensions.any() {
            writeln!(out, "No tasks yet. Add one with `tasklet add <title>`.")?;
            return Ok(());
        }

        let mut active = Vec::new();
        if dimensions.search {
            active.push("search");
        }
        if dimensions.categories {
            active.push("category filter");
        }
        if dimensions.show_only_hidden {
            active.push("hidden-only view");
        }
        writeln!(out, "No tasks match the active {}.", active.join(" and "))?;
        Ok(())
    }

    pub fn print_categories(&self, categories: &[String], active: &AppSettings) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        for name in categories {
            let selected = active
                .category_filters
                .iter()
                .any(|f| crate::category::same_category(f, name));
            if selected {
                writeln!(out, "{} *", self.paint(name, "32"))?;
            } else {
                writeln!(out, "{name}")?;
            }
        }
        Ok(())
    }

    pub fn print_settings(&self, settings: &AppSettings) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "offset          {} min", settings.notification_offset_minutes)?;
        writeln!(out, "hide-completed  {}", on_off(settings.hide_completed_tasks))?;
        writeln!(out, "hidden-only     {}", on_off(settings.show_only_hidden))?;
        let filters = settings
            .category_filters
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(out, "categories      {filters}")?;
        Ok(())
    }

    pub fn print_reminder_outcome(&self, id: TaskId, outcome: &ReminderOutcome) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        match outcome {
            ReminderOutcome::Scheduled(at) => {
                writeln!(out, "Reminder for task {id} set for {}.", format_local(*at, &self.tz))?;
            }
            ReminderOutcome::Unscheduled => {}
            ReminderOutcome::PermissionDenied => {
                writeln!(
                    out,
                    "{} exact alarms are not allowed; task {id} has no reminder. \
                     Enable them with rc.alarms.exact=on.",
                    self.paint("warning:", "31")
                )?;
            }
        }
        Ok(())
    }

    pub fn print_alarms(&self, alarms: &[(TaskId, ScheduledAlarm)]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let headers = vec!["ID".to_string(), "Fires".to_string(), "Title".to_string()];
        let rows = alarms
            .iter()
            .map(|(id, alarm)| {
                vec![
                    self.paint(&id.to_string(), "33"),
                    format_local(alarm.trigger_at, &self.tz),
                    alarm.payload.title.clone(),
                ]
            })
            .collect();
        write_table(&mut out, headers, rows)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn category_label(task: &Task) -> &str {
    task.category.as_deref().unwrap_or(NO_CATEGORY_LABEL)
}

fn flags(task: &Task) -> String {
    let mut out = String::new();
    if task.is_completed {
        out.push('x');
    }
    if task.notification_enabled {
        out.push('!');
    }
    if task.is_individually_hidden {
        out.push('h');
    }
    if !task.attachments.is_empty() {
        out.push('@');
    }
    out
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let header_line = headers
        .iter()
        .zip(&widths)
        .map(|(header, width)| format!("{header:width$}"))
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(writer, "{}", header_line.trim_end())?;

    let rule = widths
        .iter()
        .map(|width| "-".repeat(*width))
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(writer, "{rule}")?;

    for row in rows {
        let mut line = String::new();
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            if idx > 0 {
                line.push(' ');
            }
            line.push_str(cell);
            line.push_str(&" ".repeat(padding));
        }
        writeln!(writer, "{}", line.trim_end())?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            escaped = ch != 'm';
            continue;
        }
        if ch == '\x1b' {
            escaped = true;
            continue;
        }
        out.push(ch);
    }

    out
}

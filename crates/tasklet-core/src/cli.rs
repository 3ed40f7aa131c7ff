use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::task::TaskId;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tasklet",
    version,
    about = "Tasklet: personal tasks with categories and reminders"
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "taskletrc", global = true)]
    pub taskletrc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Create a task.
    Add(AddArgs),
    /// Change fields of an existing task.
    Edit(EditArgs),
    /// Toggle completion.
    Done { id: TaskId },
    /// Toggle the hidden flag of a completed task.
    Hide { id: TaskId },
    /// Delete a task, its reminder and its attachments.
    Delete { id: TaskId },
    /// Show every field of one task.
    Info { id: TaskId },
    /// List visible tasks.
    List {
        /// Case-insensitive text to look for in titles and descriptions.
        #[arg(short = 's', long = "search")]
        search: Option<String>,
    },
    /// Change the persisted category filter or hidden-task view.
    Filter(FilterArgs),
    /// List, add or remove categories.
    Categories {
        #[command(subcommand)]
        action: Option<CategoryAction>,
    },
    /// Show or change preferences.
    Settings(SettingsArgs),
    /// Deliver every reminder that is due.
    Remind {
        /// Keep running, re-reading the data files every SECS seconds.
        #[arg(long = "watch", value_name = "SECS")]
        watch: Option<u64>,
    },
    /// List scheduled reminders.
    Alarms,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct AddArgs {
    #[arg(required = true, num_args = 1..)]
    pub title: Vec<String>,

    #[arg(short = 'd', long = "desc")]
    pub description: Option<String>,

    /// Due time, e.g. `tomorrow`, `+2h`, `18:30`, `2026-03-01 09:00`.
    #[arg(long = "due")]
    pub due: Option<String>,

    #[arg(short = 'n', long = "notify")]
    pub notify: bool,

    #[arg(short = 'c', long = "category")]
    pub category: Option<String>,

    #[arg(short = 'a', long = "attach")]
    pub attachments: Vec<String>,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct EditArgs {
    pub id: TaskId,

    #[arg(long = "title")]
    pub title: Option<String>,

    #[arg(short = 'd', long = "desc")]
    pub description: Option<String>,

    #[arg(long = "due", conflicts_with = "no_due")]
    pub due: Option<String>,

    #[arg(long = "no-due")]
    pub no_due: bool,

    #[arg(long = "notify", value_parser = parse_switch)]
    pub notify: Option<bool>,

    #[arg(short = 'c', long = "category", conflicts_with = "no_category")]
    pub category: Option<String>,

    #[arg(long = "no-category")]
    pub no_category: bool,

    #[arg(short = 'a', long = "attach")]
    pub attach: Vec<String>,

    #[arg(long = "detach")]
    pub detach: Vec<String>,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct FilterArgs {
    /// Replace the active category filter with these categories.
    #[arg(short = 'c', long = "category")]
    pub categories: Vec<String>,

    /// Clear the category filter.
    #[arg(long = "clear", conflicts_with = "categories")]
    pub clear: bool,

    /// Show only hidden tasks (`on`) or the regular view (`off`).
    #[arg(long = "hidden", value_parser = parse_switch)]
    pub hidden: Option<bool>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CategoryAction {
    List,
    Add { name: Vec<String> },
    Remove { name: Vec<String> },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct SettingsArgs {
    /// Minutes before the due time at which reminders fire.
    #[arg(long = "offset")]
    pub offset: Option<u32>,

    #[arg(long = "hide-completed", value_parser = parse_switch)]
    pub hide_completed: Option<bool>,
}

fn parse_switch(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "y" | "yes" | "on" | "true" => Ok(true),
        "0" | "n" | "no" | "off" | "false" => Ok(false),
        other => Err(format!("expected on/off, got: {other}")),
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest
                .split_once('=')
                .or_else(|| rest.split_once(':'))
                .map(|(k, v)| (format!("rc.{k}"), v.to_string()));

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

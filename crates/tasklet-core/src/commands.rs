use std::collections::BTreeSet;
use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, instrument, warn};

use crate::alarm::FileAlarmBook;
use crate::category::same_category;
use crate::cli::{AddArgs, CategoryAction, Command, EditArgs, FilterArgs, SettingsArgs};
use crate::datetime::parse_date_expr;
use crate::notify::ConsoleNotifier;
use crate::render::Renderer;
use crate::service::{Saved, TaskInput, TaskService};
use crate::store::FileTaskStore;

/// Everything a command needs besides its own arguments.
pub struct Session<'a> {
    pub service: &'a TaskService,
    pub tasks: &'a FileTaskStore,
    pub alarms: &'a FileAlarmBook,
    pub renderer: &'a Renderer,
    pub tz: Tz,
    pub now: DateTime<Utc>,
}

#[instrument(skip(session, command))]
pub async fn dispatch(session: &Session<'_>, command: Option<Command>) -> anyhow::Result<()> {
    let command = command.unwrap_or(Command::List { search: None });
    debug!(?command, "dispatching");

    match command {
        Command::Add(args) => cmd_add(session, args).await,
        Command::Edit(args) => cmd_edit(session, args).await,
        Command::Done { id } => {
            let saved = session.service.toggle_completed(id, session.now).await?;
            let state = if saved.task.is_completed { "Completed" } else { "Reopened" };
            println!("{state} task {id} '{}'.", saved.task.title);
            report_reminder(session, &saved)
        }
        Command::Hide { id } => {
            let task = session.service.toggle_hidden(id).await?;
            let state = if task.is_individually_hidden { "Hid" } else { "Unhid" };
            println!("{state} task {id} '{}'.", task.title);
            Ok(())
        }
        Command::Delete { id } => {
            let task = session.service.delete_task(id).await?;
            println!("Deleted task {id} '{}'.", task.title);
            Ok(())
        }
        Command::Info { id } => {
            let task = session.service.get_task(id).await?;
            session.renderer.print_task_info(&task)
        }
        Command::List { search } => cmd_list(session, search),
        Command::Filter(args) => cmd_filter(session, args).await,
        Command::Categories { action } => cmd_categories(session, action).await,
        Command::Settings(args) => cmd_settings(session, args).await,
        Command::Remind { watch } => cmd_remind(session, watch).await,
        Command::Alarms => {
            let pending = session.alarms.pending().await;
            if pending.is_empty() {
                println!("No reminders scheduled.");
                return Ok(());
            }
            session.renderer.print_alarms(&pending)
        }
    }
}

#[instrument(skip(session, args))]
async fn cmd_add(session: &Session<'_>, args: AddArgs) -> anyhow::Result<()> {
    info!("command add");

    let execution_time = args
        .due
        .as_deref()
        .map(|raw| parse_date_expr(raw, session.now, &session.tz))
        .transpose()
        .context("invalid --due value")?;

    let input = TaskInput {
        title: args.title.join(" "),
        description: args.description,
        execution_time,
        notification_enabled: args.notify,
        category: args.category.map(|name| canonical_category(session.service, &name)),
        attachments: args.attachments,
    };

    let saved = session.service.create_task(input, session.now).await?;
    println!("Created task {}.", saved.task.id);
    report_reminder(session, &saved)
}

#[instrument(skip(session, args), fields(id = args.id))]
async fn cmd_edit(session: &Session<'_>, args: EditArgs) -> anyhow::Result<()> {
    info!("command edit");

    let current = session.service.get_task(args.id).await?;
    let mut input = TaskInput::from_task(&current);

    if let Some(title) = args.title {
        input.title = title;
    }
    if let Some(description) = args.description {
        input.description = Some(description);
    }
    if args.no_due {
        input.execution_time = None;
    } else if let Some(raw) = args.due.as_deref() {
        input.execution_time =
            Some(parse_date_expr(raw, session.now, &session.tz).context("invalid --due value")?);
    }
    if let Some(notify) = args.notify {
        input.notification_enabled = notify;
    }
    if args.no_category {
        input.category = None;
    } else if let Some(name) = args.category {
        input.category = Some(canonical_category(session.service, &name));
    }
    input.attachments.retain(|existing| !args.detach.contains(existing));
    for reference in args.attach {
        if !input.attachments.contains(&reference) {
            input.attachments.push(reference);
        }
    }

    let saved = session.service.edit_task(args.id, input, session.now).await?;
    println!("Modified task {}.", saved.task.id);
    report_reminder(session, &saved)
}

fn cmd_list(session: &Session<'_>, search: Option<String>) -> anyhow::Result<()> {
    if let Some(query) = search {
        session.service.set_search(query);
    }
    let visible = session.service.visible();
    if visible.is_empty() {
        return session.renderer.print_empty_hint(visible.dimensions);
    }
    session.renderer.print_task_table(&visible.tasks, session.now)
}

#[instrument(skip(session, args))]
async fn cmd_filter(session: &Session<'_>, args: FilterArgs) -> anyhow::Result<()> {
    if args.clear {
        session.service.set_category_filters(BTreeSet::new()).await?;
    } else if !args.categories.is_empty() {
        let filters = args
            .categories
            .iter()
            .map(|name| canonical_category(session.service, name))
            .collect();
        session.service.set_category_filters(filters).await?;
    }
    if let Some(hidden) = args.hidden {
        session.service.set_show_only_hidden(hidden).await?;
    }

    session
        .renderer
        .print_categories(&session.service.categories(), &session.service.settings())
}

async fn cmd_categories(session: &Session<'_>, action: Option<CategoryAction>) -> anyhow::Result<()> {
    match action.unwrap_or(CategoryAction::List) {
        CategoryAction::List => {}
        CategoryAction::Add { name } => {
            let added = session.service.add_category(&name.join(" ")).await?;
            println!("Added category '{added}'.");
        }
        CategoryAction::Remove { name } => {
            let name = name.join(" ");
            if session.service.remove_category(&name).await? {
                println!("Removed category '{name}'.");
            } else {
                println!("'{name}' is not a user category; nothing removed.");
            }
        }
    }
    session
        .renderer
        .print_categories(&session.service.categories(), &session.service.settings())
}

async fn cmd_settings(session: &Session<'_>, args: SettingsArgs) -> anyhow::Result<()> {
    if let Some(hide) = args.hide_completed {
        session.service.set_hide_completed(hide).await?;
    }
    if let Some(minutes) = args.offset {
        let outcomes = session
            .service
            .set_notification_offset(minutes, session.now)
            .await?;
        for (id, outcome) in &outcomes {
            session.renderer.print_reminder_outcome(*id, outcome)?;
        }
    }
    session.renderer.print_settings(&session.service.settings())
}

#[instrument(skip(session))]
async fn cmd_remind(session: &Session<'_>, watch: Option<u64>) -> anyhow::Result<()> {
    let notifier = ConsoleNotifier::new();
    let Some(every) = watch else {
        if deliver_due(session, &notifier, session.now).await? == 0 {
            println!("No reminders due.");
        }
        return Ok(());
    };

    info!(every, "watching for due reminders");
    let mut ticker = tokio::time::interval(StdDuration::from_secs(every.max(1)));
    loop {
        ticker.tick().await;
        // Other invocations write the files between passes.
        session.tasks.reload().await;
        session.alarms.reload().await;
        deliver_due(session, &notifier, Utc::now()).await?;
    }
}

/// One delivery pass: takes every alarm due at `now` and shows the ones
/// whose task still wants a reminder. Returns how many were shown.
async fn deliver_due(
    session: &Session<'_>,
    notifier: &ConsoleNotifier,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    let due = session.alarms.take_due(now).await?;
    let mut shown = 0usize;
    for payload in &due {
        match session.service.deliver_reminder(notifier, payload).await {
            Ok(true) => shown += 1,
            Ok(false) => {}
            Err(err) => warn!(id = payload.task_id, error = %err, "failed to deliver reminder"),
        }
    }
    debug!(due = due.len(), shown, "delivery pass finished");
    Ok(shown)
}

fn report_reminder(session: &Session<'_>, saved: &Saved) -> anyhow::Result<()> {
    session
        .renderer
        .print_reminder_outcome(saved.task.id, &saved.reminder)
}

/// Reuses the registered spelling when a category differs only in case.
fn canonical_category(service: &TaskService, name: &str) -> String {
    let trimmed = name.trim();
    service
        .categories()
        .into_iter()
        .find(|known| same_category(known, trimmed))
        .unwrap_or_else(|| trimmed.to_string())
}

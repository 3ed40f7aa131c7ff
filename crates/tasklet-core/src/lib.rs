pub mod alarm;
pub mod attachments;
pub mod category;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod error;
pub mod filter;
pub mod notify;
pub mod reminder;
pub mod render;
pub mod service;
pub mod settings;
pub mod store;
pub mod task;
pub mod view;

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting tasklet CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.taskletrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;
  let tz = cfg.timezone()?;

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  runtime.block_on(async {
    let tasks = Arc::new(
      store::FileTaskStore::open(
        &data_dir
      )
      .with_context(|| {
        format!(
          "failed to open task store at \
           {}",
          data_dir.display()
        )
      })?
    );
    let settings = Arc::new(
      settings::FileSettingsStore::open(
        &data_dir
      )?
    );
    let alarms = Arc::new(
      alarm::FileAlarmBook::open(
        &data_dir,
        cfg.exact_alarms_allowed()
      )?
    );
    let attachments = Arc::new(
      attachments::DirAttachmentStore::new(
        &data_dir
      )
    );

    let service =
      service::TaskService::new(
        tasks.clone(),
        settings,
        attachments,
        reminder::ReminderScheduler::new(
          alarms.clone()
        )
      );
    let renderer =
      render::Renderer::new(&cfg, tz)?;

    let session = commands::Session {
      service: &service,
      tasks: &tasks,
      alarms: &alarms,
      renderer: &renderer,
      tz,
      now: Utc::now()
    };
    commands::dispatch(
      &session,
      cli.command
    )
    .await
  })?;

  info!("done");
  Ok(())
}

pub mod bucket;
pub mod cli;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod datetime;
pub mod error;
pub mod grid;
pub mod period;
pub mod render;
pub mod resolve;
pub mod source;
pub mod task;

use std::ffi::OsString;
use std::io;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

pub use crate::coordinator::{
  GridFetchCoordinator,
  LoadedGrid
};
pub use crate::datetime::{
  DateKeyer,
  DayKey
};
pub use crate::error::CalendarError;
pub use crate::period::{
  Period,
  PeriodKind,
  PeriodResolver
};
pub use crate::source::{
  FetchWindow,
  TaskSource
};
pub use crate::task::Task;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let cli =
    cli::GlobalCli::parse_from(raw_args);

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting almanac"
  );

  let cfg = config::AlmanacConfig::load(
    cli.config.as_deref()
  )?;
  let keyer = cfg.keyer();
  debug!(
    timezone = %keyer.zone(),
    base_url = %cfg.api.base_url,
    config = ?cfg.loaded_file,
    "resolved configuration"
  );

  let source =
    source::HttpTaskSource::new(
      &cfg.api.base_url,
      cfg.request_timeout(),
      keyer
    )
    .context(
      "failed to set up task store \
       client"
    )?;

  let period_file = cfg
    .period_file()
    .context(
      "failed to resolve period state \
       file"
    )?;
  let store =
    period::FilePeriodStore::new(
      period_file
    );

  let app = commands::App::new(
    keyer,
    source,
    store,
    cfg.grid,
    render::Renderer::for_stdout(keyer)
  );

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  let mut out = io::stdout().lock();
  runtime.block_on(app.dispatch(
    &mut out,
    cli.command.unwrap_or_default(),
    Utc::now()
  ))?;

  info!("done");
  Ok(())
}

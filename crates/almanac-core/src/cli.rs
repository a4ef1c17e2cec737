use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::period::PeriodKind;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "almanac",
    version,
    about = "Calendar grid over a REST task store",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    /// TOML config file; overrides ALMANAC_CONFIG and the default locations.
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the calendar grid for a period.
    Grid(GridArgs),
    /// List the tasks of one day.
    Day {
        /// Day as YYYY-MM-DD in the reference zone.
        day: String,
    },
}

impl Default for Command {
    fn default() -> Self {
        Self::Grid(GridArgs::default())
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct GridArgs {
    /// week, month, year or custom. Without it the saved period is reused.
    #[arg(long = "period")]
    pub period: Option<PeriodKind>,

    #[arg(long = "from", requires = "to")]
    pub from: Option<NaiveDate>,

    #[arg(long = "to", requires = "from")]
    pub to: Option<NaiveDate>,

    #[arg(long = "prev", conflicts_with = "next")]
    pub prev: bool,

    #[arg(long = "next")]
    pub next: bool,

    /// Also list the top tasks of each day.
    #[arg(long = "summary")]
    pub summary: bool,
}

impl GridArgs {
    /// -1, 0 or 1 periods to move after resolving.
    pub fn step(&self) -> i64 {
        match (self.prev, self.next) {
            (true, false) => -1,
            (false, true) => 1,
            _ => 0,
        }
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
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

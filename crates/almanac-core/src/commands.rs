use std::io::Write;

use anyhow::{Context, anyhow, bail};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::cli::{Command, GridArgs};
use crate::config::GridConfig;
use crate::coordinator::GridFetchCoordinator;
use crate::datetime::{DateKeyer, DayKey};
use crate::period::{Period, PeriodKind, PeriodResolver, PeriodStore};
use crate::render::Renderer;
use crate::source::TaskSource;

/// Everything one invocation needs, wired from config at startup.
pub struct App<S, P> {
    keyer: DateKeyer,
    resolver: PeriodResolver<P>,
    coordinator: GridFetchCoordinator<S>,
    renderer: Renderer,
}

impl<S: TaskSource, P: PeriodStore> App<S, P> {
    pub fn new(keyer: DateKeyer, source: S, store: P, grid: GridConfig, renderer: Renderer) -> Self {
        Self {
            keyer,
            resolver: PeriodResolver::new(keyer, store),
            coordinator: GridFetchCoordinator::new(source, keyer, grid),
            renderer,
        }
    }

    pub fn resolver(&self) -> &PeriodResolver<P> {
        &self.resolver
    }

    pub fn coordinator(&self) -> &GridFetchCoordinator<S> {
        &self.coordinator
    }

    #[instrument(skip(self, out, now))]
    pub async fn dispatch<W: Write>(
        &self,
        out: &mut W,
        command: Command,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        match command {
            Command::Grid(args) => self.cmd_grid(out, &args, now).await,
            Command::Day { day } => self.cmd_day(out, &day, now).await,
        }
    }

    /// The period a `grid` invocation shows: an explicit range, a named
    /// kind around `now`, or the saved selection, then moved by
    /// `--prev`/`--next`. Every choice is persisted.
    pub fn select_period(&self, args: &GridArgs, now: DateTime<Utc>) -> anyhow::Result<Period> {
        let base = match (args.from, args.to, args.period) {
            (Some(_), Some(_), Some(kind)) if kind != PeriodKind::Custom => {
                bail!("--from/--to select a custom period, not {kind}");
            }
            (Some(from), Some(to), _) => self.resolver.resolve(
                PeriodKind::Custom,
                Some(self.keyer.start_of_day(from)),
                Some(self.keyer.end_of_day(to)),
                now,
            )?,
            (_, _, Some(kind)) => self.resolver.resolve(kind, None, None, now)?,
            _ => self.resolver.restore(now),
        };

        let step = args.step();
        if step == 0 {
            return Ok(base);
        }
        Ok(self.resolver.shift(&base, step))
    }

    async fn cmd_grid<W: Write>(
        &self,
        out: &mut W,
        args: &GridArgs,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let period = self.select_period(args, now)?;
        let loaded = self
            .coordinator
            .load_grid(&period, now)
            .await
            .context("failed loading calendar grid")?;

        info!(
            tasks = loaded.buckets.total(),
            unfetched = loaded.unfetched.len(),
            "grid loaded"
        );
        self.renderer
            .write_grid(out, &loaded, self.keyer.today(now))?;

        if args.summary {
            writeln!(out)?;
            self.renderer.write_summaries(out, &loaded)?;
        }
        Ok(())
    }

    async fn cmd_day<W: Write>(&self, out: &mut W, raw: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        let day: DayKey = raw
            .parse()
            .with_context(|| format!("expected a day as YYYY-MM-DD, got {raw:?}"))?;
        let date = day
            .date()
            .ok_or_else(|| anyhow!("invalid day: {raw}"))?;

        let saved = self.resolver.restore(now);
        let period = if self.coordinator.build_cells(&saved).contains_day(day) {
            saved
        } else {
            // Outside the saved view; look at that day alone without
            // replacing the saved selection.
            self.resolver.compute(
                PeriodKind::Custom,
                Some(self.keyer.start_of_day(date)),
                Some(self.keyer.end_of_day(date)),
                now,
            )?
        };

        let loaded = self
            .coordinator
            .load_grid(&period, now)
            .await
            .context("failed loading calendar grid")?;
        if let Some(err) = loaded.fetch_error.as_ref() {
            warn!(error = %err, unfetched = loaded.unfetched.len(), "grid loaded without bulk tasks");
        }

        let tasks = self
            .coordinator
            .on_cell_interact(day, now)
            .await
            .with_context(|| format!("failed fetching tasks for {day}"))?;
        self.renderer.write_day(out, day, &tasks, now)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use parking_lot::Mutex;

    use super::*;
    use crate::error::CalendarError;
    use crate::period::MemoryPeriodStore;
    use crate::source::FetchWindow;
    use crate::task::{Deadlines, Priority, Status, Task};

    /// Returns every task whose due date falls inside the window and
    /// records the windows it saw.
    struct FixedSource {
        tasks: Vec<Task>,
        fail: bool,
        windows: Mutex<Vec<FetchWindow>>,
    }

    impl FixedSource {
        fn new(tasks: Vec<Task>) -> Self {
            Self {
                tasks,
                fail: false,
                windows: Mutex::new(Vec::new()),
            }
        }
    }

    impl TaskSource for FixedSource {
        async fn fetch_tasks(&self, window: &FetchWindow) -> Result<Vec<Task>, CalendarError> {
            self.windows.lock().push(*window);
            if self.fail {
                return Err(CalendarError::fetch(window.to_string(), "connection refused"));
            }
            Ok(self
                .tasks
                .iter()
                .filter(|task| window.from() <= task.deadlines.due_at && task.deadlines.due_at <= window.to())
                .cloned()
                .collect())
        }
    }

    fn keyer() -> DateKeyer {
        DateKeyer::new(chrono_tz::Europe::Moscow)
    }

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("valid rfc3339")
            .with_timezone(&Utc)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn task(id: u64, title: &str, due: &str) -> Task {
        Task {
            id,
            title: title.to_string(),
            note: None,
            status: Status::Planned,
            priority: Priority::Routine,
            deadlines: Deadlines {
                due_at: at(due),
                planned_at: None,
                grace_end: None,
            },
            completed_at: None,
            tags: vec![],
        }
    }

    fn app(source: FixedSource) -> App<FixedSource, MemoryPeriodStore> {
        App::new(
            keyer(),
            source,
            MemoryPeriodStore::default(),
            GridConfig::default(),
            Renderer::new(keyer(), false),
        )
    }

    #[test]
    fn explicit_range_is_custom_and_saved() {
        let app = app(FixedSource::new(vec![]));
        let now = at("2025-03-04T12:00:00Z");
        let args = GridArgs {
            from: Some(date(2025, 3, 5)),
            to: Some(date(2025, 3, 18)),
            ..GridArgs::default()
        };
        let period = app.select_period(&args, now).expect("select");
        assert_eq!(period.kind(), PeriodKind::Custom);
        assert_eq!(app.resolver().restore(now), period);
    }

    #[test]
    fn explicit_range_rejects_named_kind() {
        let app = app(FixedSource::new(vec![]));
        let args = GridArgs {
            period: Some(PeriodKind::Week),
            from: Some(date(2025, 3, 5)),
            to: Some(date(2025, 3, 18)),
            ..GridArgs::default()
        };
        assert!(app.select_period(&args, at("2025-03-04T12:00:00Z")).is_err());
    }

    #[test]
    fn next_moves_from_saved_period() {
        let app = app(FixedSource::new(vec![]));
        let now = at("2025-03-04T12:00:00Z");
        let month = GridArgs {
            period: Some(PeriodKind::Month),
            ..GridArgs::default()
        };
        app.select_period(&month, now).expect("month");

        let next = GridArgs {
            next: true,
            ..GridArgs::default()
        };
        let period = app.select_period(&next, now).expect("next");
        assert_eq!(period.kind(), PeriodKind::Month);
        assert_eq!(keyer().local_date(period.start()), date(2025, 4, 1));
        assert_eq!(keyer().local_date(period.end()), date(2025, 4, 30));
    }

    #[tokio::test]
    async fn grid_command_prints_counts() {
        let app = app(FixedSource::new(vec![
            task(1, "dentist", "2025-03-05T09:00:00Z"),
            task(2, "gym", "2025-03-05T15:00:00Z"),
        ]));
        let now = at("2025-03-04T12:00:00Z");
        let mut out = Vec::new();
        let command = Command::Grid(GridArgs {
            from: Some(date(2025, 3, 3)),
            to: Some(date(2025, 3, 9)),
            summary: true,
            ..GridArgs::default()
        });
        app.dispatch(&mut out, command, now).await.expect("grid");

        let text = String::from_utf8(out).expect("utf8");
        assert!(text.contains("  5 2"));
        assert!(text.contains("2025-03-05  dentist, gym"));
        assert_eq!(app.coordinator().source().windows.lock().len(), 1);
    }

    #[tokio::test]
    async fn day_outside_saved_view_loads_that_day() {
        let app = app(FixedSource::new(vec![task(7, "file taxes", "2025-04-15T08:00:00Z")]));
        let now = at("2025-03-04T12:00:00Z");
        let mut out = Vec::new();
        app.dispatch(
            &mut out,
            Command::Day {
                day: "2025-04-15".to_string(),
            },
            now,
        )
        .await
        .expect("day");

        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("2025-04-15: 1 task(s)"));
        assert!(text.contains("file taxes"));
        // The saved view is still the current week.
        assert_eq!(app.resolver().restore(now).kind(), PeriodKind::Week);
    }

    #[tokio::test]
    async fn day_inside_failed_grid_reports_error() {
        let mut source = FixedSource::new(vec![]);
        source.fail = true;
        let app = app(source);
        let now = at("2025-03-04T12:00:00Z");
        let mut out = Vec::new();
        let err = app
            .dispatch(
                &mut out,
                Command::Day {
                    day: "2025-03-05".to_string(),
                },
                now,
            )
            .await
            .expect_err("fetch failure surfaces");
        assert!(format!("{err:#}").contains("connection refused"));
    }

    #[tokio::test]
    async fn malformed_day_is_rejected() {
        let app = app(FixedSource::new(vec![]));
        let mut out = Vec::new();
        let result = app
            .dispatch(
                &mut out,
                Command::Day {
                    day: "03/05/2025".to_string(),
                },
                at("2025-03-04T12:00:00Z"),
            )
            .await;
        assert!(result.is_err());
    }
}

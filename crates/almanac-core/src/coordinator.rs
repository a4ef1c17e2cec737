use std::collections::{
  BTreeSet,
  HashMap
};
use std::sync::Arc;

use chrono::{
  DateTime,
  Utc
};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{
  debug,
  info,
  warn
};

use crate::bucket::TaskBucketStore;
use crate::config::GridConfig;
use crate::datetime::{
  DateKeyer,
  DayKey
};
use crate::error::CalendarError;
use crate::grid::{
  CalendarGrid,
  GridBuilder
};
use crate::period::Period;
use crate::resolve::display_day_key;
use crate::source::{
  FetchWindow,
  TaskSource
};
use crate::task::Task;

/// Result of one full render.
#[derive(Debug, Clone)]
pub struct LoadedGrid {
  pub period:      Period,
  pub grid:        CalendarGrid,
  pub buckets:     TaskBucketStore,
  pub bulk_window: FetchWindow,
  /// Phantom days the bulk fetch did
  /// not cover; populated on first
  /// interaction.
  pub unfetched:   BTreeSet<DayKey>,
  /// Set when the bulk fetch failed;
  /// calling `load_grid` again retries.
  pub fetch_error: Option<CalendarError>
}

impl LoadedGrid {
  #[must_use]
  pub fn tasks_for(
    &self,
    day: DayKey
  ) -> &[Task] {
    self.buckets.tasks_for(day)
  }

  #[must_use]
  pub fn is_degraded(&self) -> bool {
    self.fetch_error.is_some()
  }
}

type PhantomSlot = Arc<OnceCell<Vec<Task>>>;

struct GridState {
  generation: u64,
  buckets:    TaskBucketStore,
  /// Phantom days not covered by a
  /// successful bulk fetch. An
  /// initialized slot is fetched.
  phantoms:   HashMap<DayKey, PhantomSlot>,
  /// Failure of the current
  /// generation's bulk fetch.
  bulk_error: Option<CalendarError>
}

/// Owns the per-render bucket map and
/// the phantom-day fetch cache.
///
/// Every fetch is tagged with the
/// generation it was issued for; a
/// response that lands after the grid
/// changed is dropped.
pub struct GridFetchCoordinator<S> {
  source:   S,
  keyer:    DateKeyer,
  builder:  GridBuilder,
  settings: GridConfig,
  state:    Mutex<GridState>
}

impl<S: TaskSource> GridFetchCoordinator<S> {
  #[must_use]
  pub fn new(
    source: S,
    keyer: DateKeyer,
    settings: GridConfig
  ) -> Self {
    Self {
      source,
      keyer,
      builder: GridBuilder::new(keyer),
      settings,
      state: Mutex::new(GridState {
        generation: 0,
        buckets:    TaskBucketStore::new(
          keyer
        ),
        phantoms:   HashMap::new(),
        bulk_error: None
      })
    }
  }

  #[must_use]
  pub fn source(&self) -> &S {
    &self.source
  }

  #[must_use]
  pub fn build_cells(
    &self,
    period: &Period
  ) -> CalendarGrid {
    self.builder.build_cells(period)
  }

  /// The bulk window for `grid`: its
  /// rendered span widened by the fetch
  /// buffer, or just the selected
  /// period when that would exceed
  /// `max_bulk_span_days`.
  #[must_use]
  pub fn bulk_window(
    &self,
    period: &Period,
    grid: &CalendarGrid
  ) -> FetchWindow {
    let period_window =
      FetchWindow::for_days(
        &self.keyer,
        self.keyer.local_date(period.start()),
        self.keyer.local_date(period.end())
      );
    let Some((first, last)) =
      grid.rendered_span()
    else {
      return period_window;
    };

    let extended = FetchWindow::for_days(
      &self.keyer,
      first,
      last
    )
    .widened(
      &self.keyer,
      self.settings.fetch_buffer_days
    );

    if extended.span_days()
      > self.settings.max_bulk_span_days
    {
      warn!(
        span_days = extended.span_days(),
        max = self.settings.max_bulk_span_days,
        "bulk window too wide; phantom days load on demand"
      );
      return period_window;
    }
    extended
  }

  /// Builds the grid for `period` and
  /// populates its buckets with one bulk
  /// fetch.
  ///
  /// A failed bulk fetch still returns
  /// the cells, with empty buckets and
  /// `fetch_error` set. Only a newer
  /// `load_grid`/`invalidate` makes this
  /// return `Err(Superseded)`.
  #[tracing::instrument(skip(self, period, now), fields(kind = %period.kind()))]
  pub async fn load_grid(
    &self,
    period: &Period,
    now: DateTime<Utc>
  ) -> Result<LoadedGrid, CalendarError> {
    let grid = self.build_cells(period);
    let window =
      self.bulk_window(period, &grid);
    let phantom_keys = grid.phantom_keys();

    let generation = {
      let mut state = self.state.lock();
      state.generation += 1;
      state.buckets =
        TaskBucketStore::new(self.keyer);
      state.bulk_error = None;
      state.phantoms = phantom_keys
        .iter()
        .map(|key| {
          (*key, PhantomSlot::default())
        })
        .collect();
      state.generation
    };

    info!(
      generation,
      window = %window,
      phantoms = phantom_keys.len(),
      "loading calendar grid"
    );
    let fetched =
      self.source.fetch_tasks(&window).await;

    let mut state = self.state.lock();
    if state.generation != generation {
      debug!(
        generation,
        current = state.generation,
        "dropping stale bulk response"
      );
      return Err(CalendarError::Superseded);
    }

    let fetch_error = match fetched {
      | Ok(tasks) => {
        apply_bulk(
          &mut state,
          &self.keyer,
          &window,
          tasks,
          now
        );
        None
      }
      | Err(err) => {
        warn!(
          error = %err,
          "bulk fetch failed; rendering empty grid"
        );
        state.bulk_error = Some(err.clone());
        Some(err)
      }
    };

    let unfetched = state
      .phantoms
      .iter()
      .filter(|(_, slot)| {
        !slot.initialized()
      })
      .map(|(key, _)| *key)
      .collect();

    Ok(LoadedGrid {
      period: *period,
      grid,
      buckets: state.buckets.clone(),
      bulk_window: window,
      unfetched,
      fetch_error
    })
  }

  /// Tasks for `day` when the user hovers
  /// or opens it.
  ///
  /// Unfetched phantom days trigger one
  /// single-day fetch; concurrent calls
  /// for the same day share it, and a
  /// failed fetch is retried by the next
  /// call. Other days come from the
  /// buckets; while the current grid's
  /// bulk fetch has failed they return
  /// that error instead.
  #[tracing::instrument(skip(self, day, now), fields(day = %day))]
  pub async fn on_cell_interact(
    &self,
    day: DayKey,
    now: DateTime<Utc>
  ) -> Result<Vec<Task>, CalendarError> {
    let (generation, slot) = {
      let state = self.state.lock();
      match state.phantoms.get(&day) {
        | Some(slot)
          if !slot.initialized() =>
        {
          (
            state.generation,
            Arc::clone(slot)
          )
        }
        | Some(_) => {
          return Ok(
            state
              .buckets
              .tasks_for(day)
              .to_vec()
          );
        }
        | None => {
          if let Some(err) =
            state.bulk_error.as_ref()
          {
            return Err(err.clone());
          }
          return Ok(
            state
              .buckets
              .tasks_for(day)
              .to_vec()
          );
        }
      }
    };

    let Some(date) = day.date() else {
      return Ok(Vec::new());
    };

    let tasks = slot
      .get_or_try_init(|| async {
        let window = FetchWindow::single_day(
          &self.keyer,
          date
        );
        debug!(
          generation,
          "fetching phantom day"
        );
        let fetched = self
          .source
          .fetch_tasks(&window)
          .await?;
        Ok::<_, CalendarError>(
          fetched
            .into_iter()
            .filter(|task| {
              display_day_key(
                task,
                now,
                &self.keyer
              ) == day
            })
            .collect::<Vec<_>>()
        )
      })
      .await
      .inspect_err(|err| {
        warn!(
          error = %err,
          "phantom day fetch failed; will retry on next interaction"
        );
      })?;

    let mut state = self.state.lock();
    if state.generation != generation {
      debug!(
        generation,
        current = state.generation,
        "dropping stale phantom day response"
      );
      return Err(CalendarError::Superseded);
    }
    state
      .buckets
      .replace_day(day, tasks.clone(), now);
    Ok(tasks.clone())
  }

  /// Whether `day` can be served
  /// without a network call.
  #[must_use]
  pub fn is_fetched(
    &self,
    day: DayKey
  ) -> bool {
    self
      .state
      .lock()
      .phantoms
      .get(&day)
      .is_none_or(|slot| {
        slot.initialized()
      })
  }

  /// Discards the current grid; any
  /// fetch still in flight for it will
  /// be dropped on arrival.
  pub fn invalidate(&self) {
    let mut state = self.state.lock();
    state.generation += 1;
    state.buckets =
      TaskBucketStore::new(self.keyer);
    state.bulk_error = None;
    state.phantoms.clear();
    debug!(
      generation = state.generation,
      "invalidated calendar grid"
    );
  }
}

/// Buckets a bulk response. Days already
/// filled by an on-demand fetch keep that
/// result, including the tasks it holds
/// that the bulk snapshot places on
/// another day; covered phantom days
/// become fetched.
fn apply_bulk(
  state: &mut GridState,
  keyer: &DateKeyer,
  window: &FetchWindow,
  tasks: Vec<Task>,
  now: DateTime<Utc>
) {
  let received = tasks.len();
  let mut kept = 0_usize;

  for task in tasks {
    let key =
      display_day_key(&task, now, keyer);
    let Some(date) = key.date() else {
      continue;
    };
    if !window.covers_day(date) {
      continue;
    }
    let held = state.buckets.day_of(task.id);
    if filled_on_demand(&state.phantoms, key)
      || held.is_some_and(|day| {
        filled_on_demand(
          &state.phantoms,
          day
        )
      })
    {
      continue;
    }
    state.buckets.insert(task, now);
    kept += 1;
  }

  state.phantoms.retain(|key, slot| {
    slot.initialized()
      || !key
        .date()
        .is_some_and(|date| {
          window.covers_day(date)
        })
  });

  debug!(
    received,
    kept,
    unfetched = state
      .phantoms
      .values()
      .filter(|slot| !slot.initialized())
      .count(),
    "applied bulk response"
  );
}

fn filled_on_demand(
  phantoms: &HashMap<DayKey, PhantomSlot>,
  day: DayKey
) -> bool {
  phantoms
    .get(&day)
    .is_some_and(|slot| slot.initialized())
}

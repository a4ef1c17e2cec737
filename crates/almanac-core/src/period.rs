use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  Utc
};
use parking_lot::Mutex;
use serde::{
  Deserialize,
  Serialize
};
use tempfile::NamedTempFile;
use tracing::{
  debug,
  info,
  warn
};

use crate::datetime::{
  DateKeyer,
  add_days,
  days_since_monday,
  first_day_of_month,
  last_day_of_month,
  shift_months
};
use crate::error::CalendarError;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
  Week,
  Month,
  Year,
  Custom
}

impl PeriodKind {
  #[must_use]
  pub fn as_key(self) -> &'static str {
    match self {
      | Self::Week => "week",
      | Self::Month => "month",
      | Self::Year => "year",
      | Self::Custom => "custom"
    }
  }

  #[must_use]
  pub fn from_key(
    raw: &str
  ) -> Option<Self> {
    match raw
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "week" => Some(Self::Week),
      | "month" => Some(Self::Month),
      | "year" => Some(Self::Year),
      | "custom" => Some(Self::Custom),
      | _ => None
    }
  }
}

impl fmt::Display for PeriodKind {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_key())
  }
}

impl FromStr for PeriodKind {
  type Err = CalendarError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    Self::from_key(s).ok_or_else(|| {
      CalendarError::InvalidPeriodKind(
        s.to_string()
      )
    })
  }
}

/// A selected `[start, end]` range.
/// `start <= end` always holds for
/// values built through `Period::new`.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct Period {
  kind:  PeriodKind,
  start: DateTime<Utc>,
  end:   DateTime<Utc>
}

impl Period {
  pub fn new(
    kind: PeriodKind,
    start: DateTime<Utc>,
    end: DateTime<Utc>
  ) -> Result<Self, CalendarError> {
    if start > end {
      return Err(
        CalendarError::InvalidRange(
          format!(
            "start {} is after end {}",
            start.to_rfc3339(),
            end.to_rfc3339()
          )
        )
      );
    }
    Ok(Self { kind, start, end })
  }

  #[must_use]
  pub fn kind(&self) -> PeriodKind {
    self.kind
  }

  #[must_use]
  pub fn start(&self) -> DateTime<Utc> {
    self.start
  }

  #[must_use]
  pub fn end(&self) -> DateTime<Utc> {
    self.end
  }
}

/// Where the last selected period is
/// kept between sessions.
pub trait PeriodStore {
  fn load(
    &self
  ) -> anyhow::Result<Option<Period>>;

  fn save(
    &self,
    period: &Period
  ) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub struct FilePeriodStore {
  path: PathBuf
}

impl FilePeriodStore {
  #[must_use]
  pub fn new(path: PathBuf) -> Self {
    Self { path }
  }

  #[must_use]
  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl PeriodStore for FilePeriodStore {
  #[tracing::instrument(skip(self), fields(file = %self.path.display()))]
  fn load(
    &self
  ) -> anyhow::Result<Option<Period>> {
    if !self.path.exists() {
      debug!("no saved period");
      return Ok(None);
    }

    let raw =
      fs::read_to_string(&self.path)
        .with_context(|| {
          format!(
            "failed reading {}",
            self.path.display()
          )
        })?;
    if raw.trim().is_empty() {
      return Ok(None);
    }

    let period: Period =
      serde_json::from_str(&raw)
        .with_context(|| {
          format!(
            "failed parsing {}",
            self.path.display()
          )
        })?;
    Ok(Some(period))
  }

  #[tracing::instrument(skip(self, period), fields(file = %self.path.display()))]
  fn save(
    &self,
    period: &Period
  ) -> anyhow::Result<()> {
    let dir = self
      .path
      .parent()
      .filter(|p| {
        !p.as_os_str().is_empty()
      })
      .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;

    let mut temp =
      NamedTempFile::new_in(dir)?;
    let serialized =
      serde_json::to_string(period)?;
    writeln!(temp, "{serialized}")?;
    temp.flush()?;
    temp.persist(&self.path).map_err(
      |err| {
        anyhow!(
          "failed to persist {}: {}",
          self.path.display(),
          err
        )
      }
    )?;

    debug!(kind = %period.kind, "saved period");
    Ok(())
  }
}

#[derive(Debug, Default)]
pub struct MemoryPeriodStore {
  slot: Mutex<Option<Period>>
}

impl PeriodStore for MemoryPeriodStore {
  fn load(
    &self
  ) -> anyhow::Result<Option<Period>> {
    Ok(*self.slot.lock())
  }

  fn save(
    &self,
    period: &Period
  ) -> anyhow::Result<()> {
    *self.slot.lock() = Some(*period);
    Ok(())
  }
}

/// Computes periods in the reference
/// zone and records each selection in
/// the injected store.
#[derive(Debug)]
pub struct PeriodResolver<S> {
  keyer: DateKeyer,
  store: S
}

impl<S: PeriodStore> PeriodResolver<S> {
  #[must_use]
  pub fn new(
    keyer: DateKeyer,
    store: S
  ) -> Self {
    Self { keyer, store }
  }

  #[must_use]
  pub fn store(&self) -> &S {
    &self.store
  }

  /// Resolves and persists a period.
  #[tracing::instrument(skip(self, now))]
  pub fn resolve(
    &self,
    kind: PeriodKind,
    explicit_start: Option<DateTime<Utc>>,
    explicit_end: Option<DateTime<Utc>>,
    now: DateTime<Utc>
  ) -> Result<Period, CalendarError> {
    let period = self.compute(
      kind,
      explicit_start,
      explicit_end,
      now
    )?;
    self.persist(&period);
    Ok(period)
  }

  /// Same as `resolve` without touching
  /// the store.
  pub fn compute(
    &self,
    kind: PeriodKind,
    explicit_start: Option<DateTime<Utc>>,
    explicit_end: Option<DateTime<Utc>>,
    now: DateTime<Utc>
  ) -> Result<Period, CalendarError> {
    let today = self.keyer.local_date(now);

    let (first, last) = match kind {
      | PeriodKind::Week => {
        let monday = add_days(
          today,
          -days_since_monday(today)
        );
        (monday, add_days(monday, 6))
      }
      | PeriodKind::Month => {
        (
          first_day_of_month(
            today.year(),
            today.month()
          ),
          last_day_of_month(
            today.year(),
            today.month()
          )
        )
      }
      | PeriodKind::Year => {
        (
          first_day_of_month(
            today.year(),
            1
          ),
          last_day_of_month(
            today.year(),
            12
          )
        )
      }
      | PeriodKind::Custom => {
        let (Some(start), Some(end)) =
          (explicit_start, explicit_end)
        else {
          return Err(
            CalendarError::InvalidRange(
              "custom period needs both \
               start and end"
                .to_string()
            )
          );
        };
        return Period::new(
          PeriodKind::Custom,
          start,
          end
        );
      }
    };

    Period::new(
      kind,
      self.keyer.start_of_day(first),
      self.keyer.end_of_day(last)
    )
  }

  /// Reloads the last saved period as
  /// stored. Falls back to (and saves)
  /// the current week.
  #[tracing::instrument(skip(self, now))]
  pub fn restore(
    &self,
    now: DateTime<Utc>
  ) -> Period {
    match self.store.load() {
      | Ok(Some(period))
        if period.start <= period.end =>
      {
        info!(
          kind = %period.kind,
          start = %period.start,
          end = %period.end,
          "restored saved period"
        );
        return period;
      }
      | Ok(Some(period)) => {
        warn!(
          start = %period.start,
          end = %period.end,
          "saved period is inverted; ignoring"
        );
      }
      | Ok(None) => {}
      | Err(err) => {
        warn!(
          error = %format!("{err:#}"),
          "failed loading saved period"
        );
      }
    }

    let week =
      self.week_containing(now);
    self.persist(&week);
    week
  }

  /// Moves to the adjacent period of
  /// the same kind (`step` < 0 goes
  /// back) and persists it.
  #[tracing::instrument(skip(self, period))]
  pub fn shift(
    &self,
    period: &Period,
    step: i64
  ) -> Period {
    let first =
      self.keyer.local_date(period.start);
    let shifted = match period.kind {
      | PeriodKind::Week => {
        let moved =
          add_days(first, step * 7);
        self.week_containing(
          self.keyer.start_of_day(moved)
        )
      }
      | PeriodKind::Month => {
        let moved =
          shift_months(first, step);
        self.month_period(
          moved.year(),
          moved.month()
        )
      }
      | PeriodKind::Year => {
        let year = first
          .year()
          .saturating_add(
            i32::try_from(step)
              .unwrap_or(0)
          );
        self.span_period(
          PeriodKind::Year,
          first_day_of_month(year, 1),
          last_day_of_month(year, 12)
        )
      }
      | PeriodKind::Custom => {
        let last = self
          .keyer
          .local_date(period.end);
        let length =
          (last - first).num_days() + 1;
        let moved =
          Duration::try_days(
            step.saturating_mul(length)
          )
          .and_then(|offset| {
            Some((
              period
                .start
                .checked_add_signed(offset)?,
              period
                .end
                .checked_add_signed(offset)?
            ))
          });
        match moved {
          | Some((start, end)) => {
            Period {
              kind: PeriodKind::Custom,
              start,
              end
            }
          }
          | None => {
            warn!(
              step,
              "custom period cannot move \
               that far; keeping it"
            );
            *period
          }
        }
      }
    };
    self.persist(&shifted);
    shifted
  }

  fn week_containing(
    &self,
    instant: DateTime<Utc>
  ) -> Period {
    let day = self.keyer.local_date(instant);
    let monday =
      add_days(day, -days_since_monday(day));
    self.span_period(
      PeriodKind::Week,
      monday,
      add_days(monday, 6)
    )
  }

  fn month_period(
    &self,
    year: i32,
    month: u32
  ) -> Period {
    self.span_period(
      PeriodKind::Month,
      first_day_of_month(year, month),
      last_day_of_month(year, month)
    )
  }

  fn span_period(
    &self,
    kind: PeriodKind,
    first: chrono::NaiveDate,
    last: chrono::NaiveDate
  ) -> Period {
    Period {
      kind,
      start: self.keyer.start_of_day(first),
      end: self.keyer.end_of_day(last)
    }
  }

  fn persist(&self, period: &Period) {
    if let Err(err) =
      self.store.save(period)
    {
      warn!(
        kind = %period.kind,
        error = %format!("{err:#}"),
        "failed saving period; continuing"
      );
    }
  }
}

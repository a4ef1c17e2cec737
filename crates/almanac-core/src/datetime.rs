use std::fmt;
use std::str::FromStr;

use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc
};
use chrono_tz::Tz;

use crate::error::CalendarError;

pub const DEFAULT_REFERENCE_TIMEZONE:
  &str = "Europe/Moscow";

const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// One calendar day in the reference
/// zone.
///
/// `Invalid` is the sentinel for input
/// that could not be keyed; it never
/// matches a grid cell.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
)]
pub enum DayKey {
  Day(NaiveDate),
  Invalid
}

impl DayKey {
  #[must_use]
  pub fn from_date(
    date: NaiveDate
  ) -> Self {
    Self::Day(date)
  }

  #[must_use]
  pub fn date(&self) -> Option<NaiveDate> {
    match self {
      | Self::Day(date) => Some(*date),
      | Self::Invalid => None
    }
  }

  #[must_use]
  pub fn is_valid(&self) -> bool {
    matches!(self, Self::Day(_))
  }
}

impl fmt::Display for DayKey {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | Self::Day(date) => {
        write!(
          f,
          "{}",
          date.format(DAY_KEY_FORMAT)
        )
      }
      | Self::Invalid => Ok(())
    }
  }
}

impl FromStr for DayKey {
  type Err = CalendarError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    NaiveDate::parse_from_str(
      s.trim(),
      DAY_KEY_FORMAT
    )
    .map(Self::Day)
    .map_err(|_| {
      CalendarError::InvalidInstant {
        field: "day_key",
        raw:   s.to_string()
      }
    })
  }
}

/// Keys instants by calendar day in a
/// single fixed zone, whatever zone the
/// host reports.
#[derive(Debug, Clone, Copy)]
pub struct DateKeyer {
  zone: Tz
}

impl Default for DateKeyer {
  fn default() -> Self {
    Self::new(default_timezone())
  }
}

impl DateKeyer {
  #[must_use]
  pub fn new(zone: Tz) -> Self {
    Self { zone }
  }

  #[must_use]
  pub fn zone(&self) -> Tz {
    self.zone
  }

  #[must_use]
  pub fn day_key(
    &self,
    instant: DateTime<Utc>
  ) -> DayKey {
    DayKey::Day(self.local_date(instant))
  }

  /// Keys a raw timestamp string;
  /// anything unparseable becomes
  /// `DayKey::Invalid`.
  #[must_use]
  pub fn day_key_str(
    &self,
    raw: &str
  ) -> DayKey {
    match self
      .parse_instant(raw, "instant")
    {
      | Ok(instant) => {
        self.day_key(instant)
      }
      | Err(err) => {
        tracing::debug!(
          raw,
          error = %err,
          "unkeyable instant"
        );
        DayKey::Invalid
      }
    }
  }

  #[must_use]
  pub fn today(
    &self,
    now: DateTime<Utc>
  ) -> DayKey {
    self.day_key(now)
  }

  #[must_use]
  pub fn local_date(
    &self,
    instant: DateTime<Utc>
  ) -> NaiveDate {
    instant
      .with_timezone(&self.zone)
      .date_naive()
  }

  /// First instant of `date` in the
  /// reference zone.
  #[must_use]
  pub fn start_of_day(
    &self,
    date: NaiveDate
  ) -> DateTime<Utc> {
    let midnight =
      date.and_time(chrono::NaiveTime::MIN);
    self.to_utc(midnight, "start-of-day")
  }

  /// Last millisecond of `date` in the
  /// reference zone.
  #[must_use]
  pub fn end_of_day(
    &self,
    date: NaiveDate
  ) -> DateTime<Utc> {
    let next_start = match date.succ_opt()
    {
      | Some(next) => {
        self.start_of_day(next)
      }
      | None => {
        self.start_of_day(date)
          + Duration::days(1)
      }
    };
    next_start
      - Duration::milliseconds(1)
  }

  /// Parses a task-store timestamp.
  ///
  /// Accepts RFC 3339, naive
  /// `YYYY-MM-DDTHH:MM[:SS[.fff]]` (taken
  /// as UTC, which is how the store
  /// writes naive values) and bare
  /// `YYYY-MM-DD` (reference-zone
  /// midnight).
  pub fn parse_instant(
    &self,
    raw: &str,
    field: &'static str
  ) -> Result<DateTime<Utc>, CalendarError>
  {
    let token = raw.trim();

    if let Ok(dt) =
      DateTime::parse_from_rfc3339(token)
    {
      return Ok(dt.with_timezone(&Utc));
    }

    for fmt in [
      "%Y-%m-%dT%H:%M:%S%.f",
      "%Y-%m-%dT%H:%M",
      "%Y-%m-%d %H:%M:%S%.f",
      "%Y-%m-%d %H:%M"
    ] {
      if let Ok(ndt) =
        NaiveDateTime::parse_from_str(
          token, fmt
        )
      {
        return Ok(
          DateTime::<Utc>::from_naive_utc_and_offset(
            ndt, Utc
          )
        );
      }
    }

    if let Ok(date) =
      NaiveDate::parse_from_str(
        token,
        DAY_KEY_FORMAT
      )
    {
      return Ok(self.start_of_day(date));
    }

    Err(CalendarError::InvalidInstant {
      field,
      raw: raw.to_string()
    })
  }

  fn to_utc(
    &self,
    local_naive: NaiveDateTime,
    context: &str
  ) -> DateTime<Utc> {
    match self
      .zone
      .from_local_datetime(&local_naive)
    {
      | LocalResult::Single(local_dt) => {
        local_dt.with_timezone(&Utc)
      }
      | LocalResult::Ambiguous(
        first,
        second
      ) => {
        tracing::warn!(
          context,
          first = %first,
          second = %second,
          "ambiguous local datetime; using earliest"
        );
        first
          .min(second)
          .with_timezone(&Utc)
      }
      | LocalResult::None => {
        // DST gap: walk forward to the
        // first wall-clock minute that
        // exists.
        for minutes in (15..=180).step_by(15)
        {
          let candidate = local_naive
            + Duration::minutes(minutes);
          if let Some(dt) = self
            .zone
            .from_local_datetime(&candidate)
            .earliest()
          {
            return dt.with_timezone(&Utc);
          }
        }
        tracing::warn!(
          context,
          local = %local_naive,
          zone = %self.zone,
          "local datetime does not exist; treating as UTC"
        );
        DateTime::<Utc>::from_naive_utc_and_offset(
          local_naive,
          Utc
        )
      }
    }
  }
}

#[must_use]
pub fn default_timezone() -> Tz {
  parse_timezone(
    DEFAULT_REFERENCE_TIMEZONE,
    "DEFAULT_REFERENCE_TIMEZONE"
  )
  .unwrap_or_else(|| {
    tracing::error!(
      "failed to parse fallback \
       timezone; using UTC"
    );
    chrono_tz::UTC
  })
}

pub fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "configured reference timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

pub(crate) fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  date
    .checked_add_signed(Duration::days(
      days
    ))
    .unwrap_or(date)
}

pub(crate) fn first_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(NaiveDate::MIN)
}

pub(crate) fn last_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  add_days(
    first_day_of_month(
      next_year, next_month
    ),
    -1
  )
}

pub(crate) fn shift_months(
  date: NaiveDate,
  months: i64
) -> NaiveDate {
  let total = i64::from(date.year()) * 12
    + i64::from(date.month0())
    + months;
  let year =
    i32::try_from(total.div_euclid(12))
      .unwrap_or(date.year());
  let month =
    total.rem_euclid(12) as u32 + 1;
  let day = date
    .day()
    .min(last_day_of_month(year, month).day());
  NaiveDate::from_ymd_opt(
    year, month, day
  )
  .unwrap_or(date)
}

/// Days between the preceding Monday
/// and `date`, counting Sunday as day 7.
pub(crate) fn days_since_monday(
  date: NaiveDate
) -> i64 {
  i64::from(
    date.weekday().number_from_monday()
  ) - 1
}

/// Days from `date` to the following
/// Sunday; zero when `date` is Sunday.
pub(crate) fn days_until_sunday(
  date: NaiveDate
) -> i64 {
  7 - i64::from(
    date.weekday().number_from_monday()
  )
}

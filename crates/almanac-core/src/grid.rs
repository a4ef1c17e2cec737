use std::collections::BTreeSet;

use chrono::{
  Datelike,
  NaiveDate
};
use tracing::debug;

use crate::datetime::{
  DateKeyer,
  DayKey,
  add_days,
  days_since_monday,
  days_until_sunday,
  last_day_of_month
};
use crate::period::Period;

/// One rendered day.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
)]
pub struct Cell {
  pub date:       NaiveDate,
  pub day_key:    DayKey,
  /// Phantom day borrowed from a
  /// neighbouring month or from the
  /// week padding.
  pub is_outside: bool
}

impl Cell {
  fn new(
    date: NaiveDate,
    is_outside: bool
  ) -> Self {
    Self {
      date,
      day_key: DayKey::from_date(date),
      is_outside
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
)]
pub enum GridItem {
  MonthHeader { year: i32, month: u32 },
  Day(Cell)
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
)]
pub enum GridMode {
  Monthly,
  Custom
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarGrid {
  mode:  GridMode,
  items: Vec<GridItem>
}

impl CalendarGrid {
  #[must_use]
  pub fn mode(&self) -> GridMode {
    self.mode
  }

  #[must_use]
  pub fn items(&self) -> &[GridItem] {
    &self.items
  }

  pub fn cells(
    &self
  ) -> impl Iterator<Item = &Cell> {
    self.items.iter().filter_map(
      |item| match item {
        | GridItem::Day(cell) => Some(cell),
        | GridItem::MonthHeader {
          ..
        } => None
      }
    )
  }

  pub fn month_headers(
    &self
  ) -> impl Iterator<Item = (i32, u32)> + '_
  {
    self.items.iter().filter_map(
      |item| match item {
        | GridItem::MonthHeader {
          year,
          month
        } => Some((*year, *month)),
        | GridItem::Day(_) => None
      }
    )
  }

  /// Earliest and latest rendered
  /// dates, phantom days included.
  #[must_use]
  pub fn rendered_span(
    &self
  ) -> Option<(NaiveDate, NaiveDate)> {
    let mut dates =
      self.cells().map(|cell| cell.date);
    let first = dates.next()?;
    let (min, max) = dates.fold(
      (first, first),
      |(min, max), date| {
        (min.min(date), max.max(date))
      }
    );
    Some((min, max))
  }

  #[must_use]
  pub fn phantom_keys(
    &self
  ) -> BTreeSet<DayKey> {
    self
      .cells()
      .filter(|cell| cell.is_outside)
      .map(|cell| cell.day_key)
      .collect()
  }

  #[must_use]
  pub fn contains_day(
    &self,
    key: DayKey
  ) -> bool {
    self
      .cells()
      .any(|cell| cell.day_key == key)
  }
}

#[derive(Debug, Clone, Copy)]
pub struct GridBuilder {
  keyer: DateKeyer
}

impl GridBuilder {
  #[must_use]
  pub fn new(keyer: DateKeyer) -> Self {
    Self { keyer }
  }

  /// True when `start` falls on the 1st
  /// of its month and `end` on the last
  /// day of its month, compared as
  /// reference-zone dates.
  #[must_use]
  pub fn is_monthly_period(
    &self,
    period: &Period
  ) -> bool {
    let (start, end) =
      self.local_bounds(period);
    start.day() == 1
      && end
        == last_day_of_month(
          end.year(),
          end.month()
        )
  }

  /// Produces a fresh grid for `period`.
  #[tracing::instrument(skip(self, period), fields(kind = %period.kind()))]
  pub fn build_cells(
    &self,
    period: &Period
  ) -> CalendarGrid {
    let (start, end) =
      self.local_bounds(period);

    let grid = if self
      .is_monthly_period(period)
    {
      CalendarGrid {
        mode:  GridMode::Monthly,
        items: monthly_items(start, end)
      }
    } else {
      CalendarGrid {
        mode:  GridMode::Custom,
        items: custom_items(start, end)
      }
    };

    debug!(
      mode = ?grid.mode,
      cells = grid.cells().count(),
      start = %start,
      end = %end,
      "built calendar grid"
    );
    grid
  }

  fn local_bounds(
    &self,
    period: &Period
  ) -> (NaiveDate, NaiveDate) {
    (
      self.keyer.local_date(period.start()),
      self.keyer.local_date(period.end())
    )
  }
}

fn monthly_items(
  start: NaiveDate,
  end: NaiveDate
) -> Vec<GridItem> {
  let mut items = Vec::new();
  let mut current_month: Option<(
    i32,
    u32
  )> = None;
  let mut day = start;

  while day <= end {
    let month_key =
      (day.year(), day.month());

    if current_month != Some(month_key) {
      if current_month.is_some() {
        push_trailing_phantoms(
          &mut items,
          add_days(day, -1)
        );
      }

      current_month = Some(month_key);
      items.push(GridItem::MonthHeader {
        year:  month_key.0,
        month: month_key.1
      });

      let first_of_month =
        day.with_day(1).unwrap_or(day);
      let before =
        days_since_monday(first_of_month);
      for offset in (1..=before).rev() {
        items.push(GridItem::Day(
          Cell::new(
            add_days(
              first_of_month,
              -offset
            ),
            true
          )
        ));
      }
    }

    items.push(GridItem::Day(Cell::new(
      day, false
    )));

    let Some(next) = day.succ_opt() else {
      break;
    };
    day = next;
  }

  if current_month.is_some() {
    push_trailing_phantoms(
      &mut items, end
    );
  }

  items
}

fn push_trailing_phantoms(
  items: &mut Vec<GridItem>,
  last_day: NaiveDate
) {
  for offset in
    1..=days_until_sunday(last_day)
  {
    items.push(GridItem::Day(Cell::new(
      add_days(last_day, offset),
      true
    )));
  }
}

fn custom_items(
  start: NaiveDate,
  end: NaiveDate
) -> Vec<GridItem> {
  let render_start = add_days(
    start,
    -days_since_monday(start)
  );
  let render_end =
    add_days(end, days_until_sunday(end));

  render_start
    .iter_days()
    .take_while(|day| *day <= render_end)
    .map(|day| {
      GridItem::Day(Cell::new(
        day,
        day < start || day > end
      ))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use chrono::{
    DateTime,
    Datelike,
    NaiveDate,
    Utc,
    Weekday
  };

  use super::*;
  use crate::period::PeriodKind;

  fn keyer() -> DateKeyer {
    DateKeyer::new(
      chrono_tz::Europe::Moscow
    )
  }

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  fn span(
    kind: PeriodKind,
    first: NaiveDate,
    last: NaiveDate
  ) -> Period {
    Period::new(
      kind,
      keyer().start_of_day(first),
      keyer().end_of_day(last)
    )
    .expect("valid period")
  }

  fn builder() -> GridBuilder {
    GridBuilder::new(keyer())
  }

  fn assert_week_aligned(
    grid: &CalendarGrid
  ) {
    let cells: Vec<&Cell> =
      grid.cells().collect();
    assert_eq!(cells.len() % 7, 0);
    for row in cells.chunks(7) {
      assert_eq!(
        row[0].date.weekday(),
        Weekday::Mon
      );
      assert_eq!(
        row[6].date.weekday(),
        Weekday::Sun
      );
    }
  }

  #[test]
  fn february_2025_pads_both_edges() {
    let grid = builder().build_cells(
      &span(
        PeriodKind::Month,
        date(2025, 2, 1),
        date(2025, 2, 28)
      )
    );
    assert_eq!(
      grid.mode(),
      GridMode::Monthly
    );
    assert_eq!(
      grid
        .month_headers()
        .collect::<Vec<_>>(),
      vec![(2025, 2)]
    );

    let cells: Vec<&Cell> =
      grid.cells().collect();
    assert_eq!(cells.len(), 35);

    let leading: Vec<NaiveDate> = cells
      .iter()
      .take_while(|c| c.is_outside)
      .map(|c| c.date)
      .collect();
    assert_eq!(
      leading,
      (27..=31)
        .map(|d| date(2025, 1, d))
        .collect::<Vec<_>>()
    );

    let trailing: Vec<NaiveDate> = cells
      .iter()
      .rev()
      .take_while(|c| c.is_outside)
      .map(|c| c.date)
      .collect();
    assert_eq!(
      trailing,
      vec![date(2025, 3, 2), date(2025, 3, 1)]
    );
    assert_week_aligned(&grid);
  }

  #[test]
  fn month_starting_sunday_needs_six_leading_phantoms(
  ) {
    // June 2025 starts on a Sunday.
    let grid = builder().build_cells(
      &span(
        PeriodKind::Month,
        date(2025, 6, 1),
        date(2025, 6, 30)
      )
    );
    let leading = grid
      .cells()
      .take_while(|c| c.is_outside)
      .count();
    assert_eq!(leading, 6);
    assert_week_aligned(&grid);
  }

  #[test]
  fn month_ending_sunday_has_no_trailing_phantoms(
  ) {
    // August 2025 ends on a Sunday.
    let grid = builder().build_cells(
      &span(
        PeriodKind::Month,
        date(2025, 8, 1),
        date(2025, 8, 31)
      )
    );
    let last = grid
      .cells()
      .last()
      .expect("non-empty grid");
    assert_eq!(last.date, date(2025, 8, 31));
    assert!(!last.is_outside);
  }

  #[test]
  fn year_period_renders_each_month_aligned(
  ) {
    let grid = builder().build_cells(
      &span(
        PeriodKind::Year,
        date(2025, 1, 1),
        date(2025, 12, 31)
      )
    );
    assert_eq!(
      grid.mode(),
      GridMode::Monthly
    );
    assert_eq!(
      grid.month_headers().count(),
      12
    );
    let inside = grid
      .cells()
      .filter(|c| !c.is_outside)
      .count();
    assert_eq!(inside, 365);

    // Every block between headers is a
    // whole number of weeks.
    let mut block = 0_usize;
    for item in grid.items() {
      match item {
        | GridItem::MonthHeader {
          ..
        } => {
          assert_eq!(block % 7, 0);
          block = 0;
        }
        | GridItem::Day(_) => block += 1
      }
    }
    assert_eq!(block % 7, 0);
    assert_week_aligned(&grid);
  }

  #[test]
  fn custom_range_pads_to_whole_weeks() {
    // Wed 2025-03-05 .. Tue 2025-03-18
    let grid = builder().build_cells(
      &span(
        PeriodKind::Custom,
        date(2025, 3, 5),
        date(2025, 3, 18)
      )
    );
    assert_eq!(
      grid.mode(),
      GridMode::Custom
    );
    assert_eq!(
      grid.month_headers().count(),
      0
    );
    assert_eq!(
      grid
        .cells()
        .filter(|c| !c.is_outside)
        .count(),
      14
    );
    assert_eq!(
      grid.rendered_span(),
      Some((
        date(2025, 3, 3),
        date(2025, 3, 23)
      ))
    );
    assert_week_aligned(&grid);
  }

  #[test]
  fn single_day_period_yields_full_week() {
    let instant: DateTime<Utc> =
      keyer().start_of_day(date(2025, 3, 13));
    let period = Period::new(
      PeriodKind::Custom,
      instant,
      instant
    )
    .expect("valid period");
    let grid = builder().build_cells(&period);
    let cells: Vec<&Cell> =
      grid.cells().collect();
    assert_eq!(cells.len(), 7);
    assert_eq!(
      cells
        .iter()
        .filter(|c| !c.is_outside)
        .count(),
      1
    );
    assert_eq!(
      grid.phantom_keys().len(),
      6
    );
  }

  #[test]
  fn monthly_check_uses_zone_dates() {
    let b = builder();
    assert!(b.is_monthly_period(&span(
      PeriodKind::Custom,
      date(2024, 2, 1),
      date(2024, 2, 29)
    )));
    assert!(!b.is_monthly_period(&span(
      PeriodKind::Custom,
      date(2024, 2, 1),
      date(2024, 2, 28)
    )));
    assert!(!b.is_monthly_period(&span(
      PeriodKind::Custom,
      date(2024, 2, 2),
      date(2024, 2, 29)
    )));
  }

  #[test]
  fn custom_non_outside_count_matches_inclusive_days(
  ) {
    for (first, last) in [
      (date(2025, 1, 30), date(2025, 2, 2)),
      (date(2025, 2, 3), date(2025, 2, 9)),
      (date(2024, 12, 28), date(2025, 1, 15))
    ] {
      let grid = builder().build_cells(
        &span(
          PeriodKind::Custom,
          first,
          last
        )
      );
      let expected =
        (last - first).num_days() + 1;
      assert_eq!(
        grid
          .cells()
          .filter(|c| !c.is_outside)
          .count() as i64,
        expected
      );
      assert_week_aligned(&grid);
    }
  }
}

use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Datelike, Month, Utc};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::coordinator::LoadedGrid;
use crate::datetime::{DateKeyer, DayKey};
use crate::grid::{Cell, GridItem};
use crate::resolve::{compare_by_priority, compare_for_day_list, display_date};
use crate::task::{Priority, Status, Task};

/// Tasks shown inline in a compact day view.
pub const SUMMARY_LIMIT: usize = 3;
/// Column budget for a title in list views.
pub const TITLE_WIDTH: usize = 18;

const CELL_WIDTH: usize = 8;
const WEEKDAY_LABELS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// The highest-priority tasks of a day plus how many did not fit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySummary {
    pub top: Vec<Task>,
    pub overflow: usize,
}

impl DaySummary {
    pub fn is_empty(&self) -> bool {
        self.top.is_empty()
    }
}

pub fn summarize_day(tasks: &[Task]) -> DaySummary {
    let mut ranked: Vec<Task> = tasks.to_vec();
    ranked.sort_by(compare_by_priority);
    let overflow = ranked.len().saturating_sub(SUMMARY_LIMIT);
    ranked.truncate(SUMMARY_LIMIT);
    DaySummary {
        top: ranked,
        overflow,
    }
}

/// Cuts `title` to at most `max_width` terminal columns, ending with `…`
/// when anything was dropped.
pub fn truncate_title(title: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(title) <= max_width {
        return title.to_string();
    }
    if max_width == 0 {
        return String::new();
    }

    let budget = max_width - 1;
    let mut used = 0;
    let mut out = String::with_capacity(title.len());
    for ch in title.chars() {
        let width = UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + width > budget {
            break;
        }
        used += width;
        out.push(ch);
    }
    out.push('…');
    out
}

#[derive(Debug, Clone)]
pub struct Renderer {
    keyer: DateKeyer,
    color: bool,
}

impl Renderer {
    pub fn new(keyer: DateKeyer, color: bool) -> Self {
        Self { keyer, color }
    }

    /// Colors only when stdout is a terminal.
    pub fn for_stdout(keyer: DateKeyer) -> Self {
        Self::new(keyer, io::stdout().is_terminal())
    }

    /// One row per week. Phantom days are bracketed and show `?` until
    /// fetched; today carries a `*`.
    #[tracing::instrument(skip_all, fields(kind = %loaded.period.kind()))]
    pub fn write_grid<W: Write>(
        &self,
        out: &mut W,
        loaded: &LoadedGrid,
        today: DayKey,
    ) -> anyhow::Result<()> {
        writeln!(
            out,
            "{} {} .. {}",
            loaded.period.kind(),
            self.keyer.local_date(loaded.period.start()),
            self.keyer.local_date(loaded.period.end())
        )?;
        if let Some(err) = &loaded.fetch_error {
            writeln!(out, "{}", self.paint(&format!("! {err}"), "31"))?;
        }

        let mut row: Vec<String> = Vec::with_capacity(7);
        let mut header_pending = loaded.grid.month_headers().next().is_none();
        if header_pending {
            writeln!(out)?;
        }

        for item in loaded.grid.items() {
            match item {
                GridItem::MonthHeader { year, month } => {
                    flush_row(out, &mut row)?;
                    writeln!(out)?;
                    writeln!(out, "{} {year}", month_name(*month))?;
                    header_pending = true;
                }
                GridItem::Day(cell) => {
                    if header_pending {
                        write_weekday_header(out)?;
                        header_pending = false;
                    }
                    row.push(self.cell_label(cell, loaded, today));
                    if row.len() == 7 {
                        flush_row(out, &mut row)?;
                    }
                }
            }
        }
        flush_row(out, &mut row)?;
        Ok(())
    }

    /// Per-day summaries for every non-empty day of the selected period.
    pub fn write_summaries<W: Write>(&self, out: &mut W, loaded: &LoadedGrid) -> anyhow::Result<()> {
        for cell in loaded.grid.cells().filter(|cell| !cell.is_outside) {
            let summary = summarize_day(loaded.tasks_for(cell.day_key));
            if summary.is_empty() {
                continue;
            }
            let titles = summary
                .top
                .iter()
                .map(|task| self.paint_priority(&truncate_title(&task.title, TITLE_WIDTH), task.priority))
                .collect::<Vec<_>>()
                .join(", ");
            if summary.overflow > 0 {
                writeln!(out, "{}  {titles} (+{} more)", cell.day_key, summary.overflow)?;
            } else {
                writeln!(out, "{}  {titles}", cell.day_key)?;
            }
        }
        Ok(())
    }

    /// Task table for one day, in day-list order.
    #[tracing::instrument(skip(self, out, tasks, now), fields(day = %day))]
    pub fn write_day<W: Write>(
        &self,
        out: &mut W,
        day: DayKey,
        tasks: &[Task],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "{day}: no tasks")?;
            return Ok(());
        }
        writeln!(out, "{day}: {} task(s)", tasks.len())?;

        let mut ordered = tasks.to_vec();
        ordered.sort_by(|a, b| compare_for_day_list(a, b, now));

        let headers = vec![
            "ID".to_string(),
            "Time".to_string(),
            "Status".to_string(),
            "Priority".to_string(),
            "Title".to_string(),
            "Tags".to_string(),
        ];
        let rows = ordered
            .iter()
            .map(|task| {
                let time = display_date(task, now)
                    .with_timezone(&self.keyer.zone())
                    .format("%H:%M")
                    .to_string();
                let tags = task
                    .tags
                    .iter()
                    .map(|tag| format!("#{tag}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                vec![
                    self.paint(&task.id.to_string(), "33"),
                    time,
                    self.paint_status(&task.status),
                    self.paint_priority(task.priority.as_str(), task.priority),
                    truncate_title(&task.title, TITLE_WIDTH),
                    tags,
                ]
            })
            .collect();

        write_table(out, headers, rows)
    }

    fn cell_label(&self, cell: &Cell, loaded: &LoadedGrid, today: DayKey) -> String {
        let count = if loaded.unfetched.contains(&cell.day_key) {
            "?".to_string()
        } else {
            match loaded.buckets.count_for(cell.day_key) {
                0 => "-".to_string(),
                n => n.to_string(),
            }
        };
        let marker = if cell.day_key == today { "*" } else { "" };
        let day = cell.date.day();

        let label = if cell.is_outside {
            format!("[{day:>2} {count}]{marker}")
        } else {
            format!(" {day:>2} {count}{marker}")
        };

        if cell.day_key == today {
            self.paint(&label, "1")
        } else if cell.is_outside {
            self.paint(&label, "2")
        } else {
            label
        }
    }

    fn paint_status(&self, status: &Status) -> String {
        match status {
            Status::Overdue | Status::Failed => self.paint(status.as_str(), "31"),
            Status::Done => self.paint(status.as_str(), "32"),
            _ => status.as_str().to_string(),
        }
    }

    fn paint_priority(&self, text: &str, priority: Priority) -> String {
        match priority {
            Priority::Critical => self.paint(text, "31"),
            Priority::High => self.paint(text, "33"),
            Priority::Routine => text.to_string(),
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn month_name(month: u32) -> &'static str {
    u8::try_from(month)
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .map(|m| m.name())
        .unwrap_or("?")
}

fn write_weekday_header<W: Write>(out: &mut W) -> io::Result<()> {
    for label in WEEKDAY_LABELS {
        write!(out, " {label:<width$}", width = CELL_WIDTH - 1)?;
    }
    writeln!(out)
}

fn flush_row<W: Write>(out: &mut W, row: &mut Vec<String>) -> io::Result<()> {
    if row.is_empty() {
        return Ok(());
    }
    for cell in row.drain(..) {
        let visible = UnicodeWidthStr::width(strip_ansi(&cell).as_str());
        write!(out, "{cell}{}", " ".repeat(CELL_WIDTH.saturating_sub(visible)))?;
    }
    writeln!(out)
}

fn write_table<W: Write>(
    writer: &mut W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, &width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, &width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{DateTime, NaiveDate, Utc};

    use super::*;
    use crate::bucket::TaskBucketStore;
    use crate::grid::GridBuilder;
    use crate::period::{Period, PeriodKind};
    use crate::source::FetchWindow;
    use crate::task::Deadlines;

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

    fn task(id: u64, title: &str, priority: Priority, due: &str) -> Task {
        Task {
            id,
            title: title.to_string(),
            note: None,
            status: Status::Planned,
            priority,
            deadlines: Deadlines {
                due_at: at(due),
                planned_at: None,
                grace_end: None,
            },
            completed_at: None,
            tags: vec!["home".to_string()],
        }
    }

    fn loaded_week(tasks: Vec<Task>, now: DateTime<Utc>) -> LoadedGrid {
        let k = keyer();
        let period = Period::new(
            PeriodKind::Custom,
            k.start_of_day(date(2025, 3, 5)),
            k.end_of_day(date(2025, 3, 7)),
        )
        .expect("valid period");
        let grid = GridBuilder::new(k).build_cells(&period);
        let window = FetchWindow::for_days(&k, date(2025, 3, 5), date(2025, 3, 7));
        let unfetched: BTreeSet<DayKey> = grid.phantom_keys();
        LoadedGrid {
            period,
            grid,
            buckets: TaskBucketStore::from_tasks(k, tasks, now),
            bulk_window: window,
            unfetched,
            fetch_error: None,
        }
    }

    #[test]
    fn summary_keeps_three_by_priority() {
        let tasks = vec![
            task(1, "a", Priority::Routine, "2025-03-05T09:00:00Z"),
            task(2, "b", Priority::Critical, "2025-03-05T09:00:00Z"),
            task(3, "c", Priority::High, "2025-03-05T09:00:00Z"),
            task(4, "d", Priority::Routine, "2025-03-05T09:00:00Z"),
            task(5, "e", Priority::Critical, "2025-03-05T09:00:00Z"),
        ];
        let summary = summarize_day(&tasks);
        let ids: Vec<u64> = summary.top.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 5, 3]);
        assert_eq!(summary.overflow, 2);
    }

    #[test]
    fn truncation_respects_display_width() {
        assert_eq!(truncate_title("short", TITLE_WIDTH), "short");
        assert_eq!(truncate_title("Prepare quarterly report", TITLE_WIDTH), "Prepare quarterly…");
        // Each CJK glyph takes two columns.
        assert_eq!(truncate_title("日本語のタイトル", 7), "日本語…");
        assert_eq!(truncate_title("anything", 0), "");
    }

    #[test]
    fn grid_marks_phantoms_and_counts() {
        let now = at("2025-03-04T12:00:00Z");
        let loaded = loaded_week(
            vec![
                task(1, "dentist", Priority::High, "2025-03-05T09:00:00Z"),
                task(2, "gym", Priority::Routine, "2025-03-05T15:00:00Z"),
            ],
            now,
        );
        let renderer = Renderer::new(keyer(), false);
        let mut out = Vec::new();
        renderer
            .write_grid(&mut out, &loaded, DayKey::from_date(date(2025, 3, 6)))
            .expect("render grid");
        let text = String::from_utf8(out).expect("utf8");

        assert!(text.starts_with("custom 2025-03-05 .. 2025-03-07"));
        assert!(text.contains("Mon"));
        assert!(text.contains("[ 3 ?]"));
        assert!(text.contains("  5 2"));
        assert!(text.contains("  6 -*"));
        assert_eq!(text.lines().filter(|l| l.contains('[')).count(), 1);
    }

    #[test]
    fn day_table_orders_by_time_then_priority() {
        let now = at("2025-03-04T12:00:00Z");
        let tasks = vec![
            task(1, "late", Priority::Critical, "2025-03-05T15:00:00Z"),
            task(2, "early routine", Priority::Routine, "2025-03-05T06:00:00Z"),
            task(3, "early critical", Priority::Critical, "2025-03-05T06:00:00Z"),
        ];
        let renderer = Renderer::new(keyer(), false);
        let mut out = Vec::new();
        renderer
            .write_day(&mut out, DayKey::from_date(date(2025, 3, 5)), &tasks, now)
            .expect("render day");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "2025-03-05: 3 task(s)");
        assert!(lines[3].starts_with("3 "));
        assert!(lines[3].contains("09:00"));
        assert!(lines[4].starts_with("2 "));
        assert!(lines[5].starts_with("1 "));
        assert!(lines[5].contains("18:00"));
    }

    #[test]
    fn ansi_is_ignored_when_measuring() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m"), "red");
    }
}

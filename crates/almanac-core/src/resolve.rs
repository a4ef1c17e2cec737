//! Display-date resolution: which single day a task is shown under.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::datetime::{DateKeyer, DayKey};
use crate::task::{Status, Task};

/// The instant a task is displayed under. Pure; the first matching rule wins:
///
/// 1. done with `completed_at` -> `completed_at`
/// 2. failed -> `grace_end`, else `due_at`
/// 3. overdue still inside its grace window (`now <= grace_end`) -> `grace_end`
/// 4. in progress, or overdue past/without grace -> `due_at`
/// 5. planned -> `planned_at`, else `due_at`
/// 6. anything else -> `due_at`
pub fn display_date(task: &Task, now: DateTime<Utc>) -> DateTime<Utc> {
    let deadlines = &task.deadlines;

    match (&task.status, task.completed_at) {
        (Status::Done, Some(completed)) => return completed,
        (Status::Failed, _) => return deadlines.grace_end.unwrap_or(deadlines.due_at),
        _ => {}
    }

    if task.status == Status::Overdue
        && let Some(grace) = deadlines.grace_end
        && now <= grace
    {
        return grace;
    }

    match task.status {
        Status::InProgress | Status::Overdue => deadlines.due_at,
        Status::Planned => deadlines.planned_at.unwrap_or(deadlines.due_at),
        _ => deadlines.due_at,
    }
}

pub fn display_day_key(task: &Task, now: DateTime<Utc>, keyer: &DateKeyer) -> DayKey {
    keyer.day_key(display_date(task, now))
}

/// Critical first.
pub fn compare_by_priority(a: &Task, b: &Task) -> Ordering {
    b.priority.cmp(&a.priority)
}

/// Order inside a day list: earliest display instant first, then by priority.
pub fn compare_for_day_list(a: &Task, b: &Task, now: DateTime<Utc>) -> Ordering {
    display_date(a, now)
        .cmp(&display_date(b, now))
        .then_with(|| compare_by_priority(a, b))
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::datetime::{DateKeyer, DayKey};
use crate::resolve::display_day_key;
use crate::task::Task;

/// Tasks grouped by the day they are displayed under.
///
/// A task id lives in exactly one bucket; inserting a newer snapshot of the
/// same task moves it.
#[derive(Debug, Clone)]
pub struct TaskBucketStore {
    keyer: DateKeyer,
    buckets: HashMap<DayKey, Vec<Task>>,
    index: HashMap<u64, DayKey>,
}

impl TaskBucketStore {
    pub fn new(keyer: DateKeyer) -> Self {
        Self {
            keyer,
            buckets: HashMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn from_tasks<I>(keyer: DateKeyer, tasks: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = Task>,
    {
        let mut store = Self::new(keyer);
        for task in tasks {
            store.insert(task, now);
        }
        store
    }

    /// Buckets one task under its resolved display day.
    pub fn insert(&mut self, task: Task, now: DateTime<Utc>) -> DayKey {
        let key = display_day_key(&task, now, &self.keyer);
        self.detach(task.id);
        trace!(id = task.id, day = %key, "bucketed task");
        self.index.insert(task.id, key);
        self.buckets.entry(key).or_default().push(task);
        key
    }

    /// Replaces everything known about `day` with a fresh single-day fetch.
    ///
    /// Only tasks that resolve to `day` are kept; the rest of the response is
    /// ignored since its own days were not re-fetched.
    pub fn replace_day(&mut self, day: DayKey, tasks: Vec<Task>, now: DateTime<Utc>) -> usize {
        if let Some(previous) = self.buckets.remove(&day) {
            for task in previous {
                self.index.remove(&task.id);
            }
        }

        let mut kept = 0;
        for task in tasks {
            if display_day_key(&task, now, &self.keyer) == day {
                self.insert(task, now);
                kept += 1;
            }
        }
        self.buckets.entry(day).or_default();
        kept
    }

    pub fn tasks_for(&self, day: DayKey) -> &[Task] {
        self.buckets.get(&day).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count_for(&self, day: DayKey) -> usize {
        self.tasks_for(day).len()
    }

    pub fn day_of(&self, id: u64) -> Option<DayKey> {
        self.index.get(&id).copied()
    }

    pub fn total(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn detach(&mut self, id: u64) {
        let Some(old_key) = self.index.remove(&id) else {
            return;
        };
        if let Some(bucket) = self.buckets.get_mut(&old_key) {
            bucket.retain(|task| task.id != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate, Utc};

    use super::*;
    use crate::task::{Deadlines, Priority, Status};

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("valid rfc3339")
            .with_timezone(&Utc)
    }

    fn key(raw: &str) -> DayKey {
        DayKey::from_date(NaiveDate::parse_from_str(raw, "%Y-%m-%d").expect("valid date"))
    }

    fn task(id: u64, status: Status, due: &str) -> Task {
        Task {
            id,
            title: format!("task {id}"),
            note: None,
            status,
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

    fn keyer() -> DateKeyer {
        DateKeyer::new(chrono_tz::Europe::Moscow)
    }

    #[test]
    fn buckets_by_display_date_not_raw_due() {
        let now = at("2025-03-01T00:00:00Z");
        let mut done = task(1, Status::Done, "2025-03-10T09:00:00Z");
        done.completed_at = Some(at("2025-03-04T09:00:00Z"));
        let planned = task(2, Status::Planned, "2025-03-10T09:00:00Z");

        let store = TaskBucketStore::from_tasks(keyer(), vec![done, planned], now);
        assert_eq!(store.count_for(key("2025-03-04")), 1);
        assert_eq!(store.count_for(key("2025-03-10")), 1);
        assert_eq!(store.total(), 2);
    }

    #[test]
    fn newer_snapshot_moves_task_between_buckets() {
        let now = at("2025-03-01T00:00:00Z");
        let mut store = TaskBucketStore::new(keyer());
        store.insert(task(5, Status::Planned, "2025-03-10T09:00:00Z"), now);

        let mut moved = task(5, Status::Planned, "2025-03-10T09:00:00Z");
        moved.deadlines.planned_at = Some(at("2025-03-08T09:00:00Z"));
        store.insert(moved, now);

        assert_eq!(store.count_for(key("2025-03-10")), 0);
        assert_eq!(store.count_for(key("2025-03-08")), 1);
        assert_eq!(store.day_of(5), Some(key("2025-03-08")));
        assert_eq!(store.total(), 1);
    }

    #[test]
    fn replace_day_filters_to_that_day_and_is_idempotent() {
        let now = at("2025-03-01T00:00:00Z");
        let mut store = TaskBucketStore::new(keyer());
        store.insert(task(1, Status::Planned, "2025-03-02T09:00:00Z"), now);

        let fetched = vec![
            task(2, Status::Planned, "2025-03-02T10:00:00Z"),
            task(3, Status::Planned, "2025-03-03T10:00:00Z"),
        ];
        let day = key("2025-03-02");
        assert_eq!(store.replace_day(day, fetched.clone(), now), 1);
        assert_eq!(store.replace_day(day, fetched, now), 1);

        let ids: Vec<u64> = store.tasks_for(day).iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(store.day_of(1), None);
        assert_eq!(store.count_for(key("2025-03-03")), 0);
    }

    #[test]
    fn unknown_day_is_empty() {
        let store = TaskBucketStore::new(keyer());
        assert!(store.tasks_for(DayKey::Invalid).is_empty());
        assert!(store.is_empty());
    }
}

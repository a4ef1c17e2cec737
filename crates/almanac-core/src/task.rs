use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::datetime::DateKeyer;
use crate::error::CalendarError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    Planned,
    InProgress,
    Overdue,
    Done,
    Failed,
    /// Any status the task store sends that this engine does not know.
    Other(String),
}

impl Status {
    pub fn as_str(&self) -> &str {
        match self {
            Status::Planned => "planned",
            Status::InProgress => "inProgress",
            Status::Overdue => "overdue",
            Status::Done => "done",
            Status::Failed => "failed",
            Status::Other(raw) => raw.as_str(),
        }
    }
}

impl From<String> for Status {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "planned" => Status::Planned,
            "inProgress" => Status::InProgress,
            "overdue" => Status::Overdue,
            "done" => Status::Done,
            "failed" => Status::Failed,
            _ => Status::Other(raw),
        }
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered lowest to highest; sort descending to put critical work first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Routine,
    High,
    Critical,
}

impl Priority {
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim() {
            "routine" => Some(Priority::Routine),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Routine => "routine",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadlines {
    pub due_at: DateTime<Utc>,
    #[serde(default)]
    pub planned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub grace_end: Option<DateTime<Utc>>,
}

/// A validated snapshot of one task from the task store. Never mutated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub note: Option<String>,
    pub status: Status,
    pub priority: Priority,
    pub deadlines: Deadlines,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Task object as it arrives over the wire, before validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDto {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub priority: Option<String>,
    pub deadlines: DeadlinesDto,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeadlinesDto {
    #[serde(default)]
    pub due_at: Option<String>,
    #[serde(default)]
    pub planned_at: Option<String>,
    #[serde(default)]
    pub grace_end: Option<String>,
}

impl Task {
    /// Validates a wire task. A malformed optional timestamp is dropped with a
    /// warning; a missing or malformed `due_at` rejects the task.
    #[tracing::instrument(skip(dto, keyer), fields(id = dto.id))]
    pub fn from_dto(dto: TaskDto, keyer: &DateKeyer) -> Result<Self, CalendarError> {
        let raw_due = dto.deadlines.due_at.as_deref().unwrap_or_default();
        let due_at = keyer.parse_instant(raw_due, "deadlines.due_at")?;

        let planned_at = optional_instant(
            keyer,
            dto.id,
            dto.deadlines.planned_at.as_deref(),
            "deadlines.planned_at",
        );
        let grace_end = optional_instant(
            keyer,
            dto.id,
            dto.deadlines.grace_end.as_deref(),
            "deadlines.grace_end",
        );
        let completed_at =
            optional_instant(keyer, dto.id, dto.completed_at.as_deref(), "completed_at");

        let priority = match dto.priority.as_deref() {
            None => Priority::default(),
            Some(raw) => Priority::from_wire(raw).unwrap_or_else(|| {
                warn!(id = dto.id, priority = raw, "unknown priority; using routine");
                Priority::default()
            }),
        };

        let status = Status::from(dto.status);
        if let Status::Other(raw) = &status {
            debug!(id = dto.id, status = %raw, "unrecognized task status");
        }

        Ok(Self {
            id: dto.id,
            title: dto.title,
            note: dto.note,
            status,
            priority,
            deadlines: Deadlines {
                due_at,
                planned_at,
                grace_end,
            },
            completed_at,
            tags: dto.tags,
        })
    }
}

fn optional_instant(
    keyer: &DateKeyer,
    id: u64,
    raw: Option<&str>,
    field: &'static str,
) -> Option<DateTime<Utc>> {
    let raw = raw?;
    if raw.trim().is_empty() {
        return None;
    }
    match keyer.parse_instant(raw, field) {
        Ok(instant) => Some(instant),
        Err(err) => {
            warn!(id, field, error = %err, "ignoring malformed task timestamp");
            None
        }
    }
}

/// Decodes a `GET /tasks` response body.
///
/// Records that fail validation are skipped with a warning so one bad row
/// cannot blank a whole grid. A body that is not a JSON array is a fetch
/// failure.
#[tracing::instrument(skip(body, keyer), fields(bytes = body.len()))]
pub fn decode_task_list(
    body: &str,
    keyer: &DateKeyer,
    scope: &str,
) -> Result<Vec<Task>, CalendarError> {
    let records: Vec<serde_json::Value> = serde_json::from_str(body)
        .map_err(|err| CalendarError::fetch(scope, format!("invalid task list body: {err}")))?;

    let total = records.len();
    let mut tasks = Vec::with_capacity(total);
    for (idx, record) in records.into_iter().enumerate() {
        let dto: TaskDto = match serde_json::from_value(record) {
            Ok(dto) => dto,
            Err(err) => {
                warn!(index = idx, error = %err, "skipping task record with bad shape");
                continue;
            }
        };
        match Task::from_dto(dto, keyer) {
            Ok(task) => tasks.push(task),
            Err(err) => warn!(index = idx, error = %err, "skipping invalid task record"),
        }
    }

    debug!(total, accepted = tasks.len(), "decoded task list");
    Ok(tasks)
}

use std::fmt;
use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Url;
use tracing::{debug, instrument, warn};

use crate::datetime::{DateKeyer, add_days};
use crate::error::CalendarError;
use crate::task::{Task, decode_task_list};

const QUERY_INSTANT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Inclusive range of reference-zone days requested from the task store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    first_day: NaiveDate,
    last_day: NaiveDate,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
}

impl FetchWindow {
    /// Spans from the start of `first_day` to the last millisecond of
    /// `last_day`. Swapped arguments are reordered.
    pub fn for_days(keyer: &DateKeyer, first_day: NaiveDate, last_day: NaiveDate) -> Self {
        let (first_day, last_day) = if first_day <= last_day {
            (first_day, last_day)
        } else {
            (last_day, first_day)
        };
        Self {
            first_day,
            last_day,
            from: keyer.start_of_day(first_day),
            to: keyer.end_of_day(last_day),
        }
    }

    pub fn single_day(keyer: &DateKeyer, day: NaiveDate) -> Self {
        Self::for_days(keyer, day, day)
    }

    /// `self` widened by `days` on both sides.
    pub fn widened(&self, keyer: &DateKeyer, days: i64) -> Self {
        Self::for_days(
            keyer,
            add_days(self.first_day, -days),
            add_days(self.last_day, days),
        )
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    pub fn last_day(&self) -> NaiveDate {
        self.last_day
    }

    pub fn from(&self) -> DateTime<Utc> {
        self.from
    }

    pub fn to(&self) -> DateTime<Utc> {
        self.to
    }

    pub fn span_days(&self) -> i64 {
        (self.last_day - self.first_day).num_days() + 1
    }

    pub fn covers_day(&self, day: NaiveDate) -> bool {
        self.first_day <= day && day <= self.last_day
    }

    /// `due_from` / `due_to` query values.
    pub fn query_pairs(&self) -> [(&'static str, String); 2] {
        [
            ("due_from", self.from.format(QUERY_INSTANT_FORMAT).to_string()),
            ("due_to", self.to.format(QUERY_INSTANT_FORMAT).to_string()),
        ]
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first_day == self.last_day {
            write!(f, "{}", self.first_day)
        } else {
            write!(f, "{}..{}", self.first_day, self.last_day)
        }
    }
}

/// Read access to the task store, queried by nominal due-date range.
///
/// Results are a superset filter: callers re-bucket them by display date.
pub trait TaskSource {
    fn fetch_tasks(
        &self,
        window: &FetchWindow,
    ) -> impl Future<Output = Result<Vec<Task>, CalendarError>> + Send;
}

/// `GET {base_url}/tasks?due_from=&due_to=` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTaskSource {
    client: reqwest::Client,
    base_url: Url,
    keyer: DateKeyer,
}

impl HttpTaskSource {
    pub fn new(base_url: &str, timeout: Duration, keyer: DateKeyer) -> anyhow::Result<Self> {
        let trimmed = base_url.trim();
        if trimmed.is_empty() {
            anyhow::bail!("task store base URL is empty");
        }
        let base_url = Url::parse(trimmed)
            .with_context(|| format!("invalid task store base URL: {trimmed}"))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed building HTTP client for task store")?;
        Ok(Self {
            client,
            base_url,
            keyer,
        })
    }

    pub fn tasks_url(&self, window: &FetchWindow) -> Result<Url, CalendarError> {
        let endpoint = format!("{}/tasks", self.base_url.as_str().trim_end_matches('/'));
        Url::parse_with_params(&endpoint, window.query_pairs())
            .map_err(|err| CalendarError::fetch(window.to_string(), err))
    }
}

impl TaskSource for HttpTaskSource {
    #[instrument(skip(self), fields(window = %window))]
    async fn fetch_tasks(&self, window: &FetchWindow) -> Result<Vec<Task>, CalendarError> {
        let scope = window.to_string();
        let url = self.tasks_url(window)?;
        debug!(url = %url, "requesting tasks");

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| {
                warn!(error = %err, "task store request failed");
                CalendarError::fetch(scope.as_str(), err)
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "task store returned error status");
            return Err(CalendarError::fetch(scope, format!("HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|err| CalendarError::fetch(scope.as_str(), err))?;
        decode_task_list(&body, &self.keyer, &scope)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;

    use super::*;

    fn keyer() -> DateKeyer {
        DateKeyer::new(chrono_tz::Europe::Moscow)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn single_day_window_spans_the_zone_day() {
        let window = FetchWindow::single_day(&keyer(), date(2025, 3, 2));
        let [(from_key, from), (to_key, to)] = window.query_pairs();
        assert_eq!(from_key, "due_from");
        assert_eq!(from, "2025-03-01T21:00:00.000Z");
        assert_eq!(to_key, "due_to");
        assert_eq!(to, "2025-03-02T20:59:59.999Z");
        assert_eq!(window.span_days(), 1);
        assert_eq!(window.to_string(), "2025-03-02");
    }

    #[test]
    fn widened_window_covers_buffer_days() {
        let window = FetchWindow::for_days(&keyer(), date(2025, 1, 27), date(2025, 3, 2))
            .widened(&keyer(), 7);
        assert_eq!(window.first_day(), date(2025, 1, 20));
        assert_eq!(window.last_day(), date(2025, 3, 9));
        assert!(window.covers_day(date(2025, 1, 20)));
        assert!(!window.covers_day(date(2025, 3, 10)));
    }

    #[test]
    fn tasks_url_encodes_window() {
        let source = HttpTaskSource::new("http://localhost:5000/", Duration::from_secs(5), keyer())
            .expect("build source");
        let window = FetchWindow::single_day(&keyer(), date(2025, 3, 2));
        let url = source.tasks_url(&window).expect("url");
        assert_eq!(url.path(), "/tasks");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("due_from".to_string(), "2025-03-01T21:00:00.000Z".to_string()),
                ("due_to".to_string(), "2025-03-02T20:59:59.999Z".to_string()),
            ]
        );
    }

    #[test]
    fn empty_base_url_is_rejected() {
        assert!(HttpTaskSource::new("  ", Duration::from_secs(5), keyer()).is_err());
    }
}

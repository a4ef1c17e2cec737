/// Error type for the calendar engine.
///
/// Nothing here is fatal: callers degrade to an empty bucket or a retry
/// affordance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    #[error("invalid range: {0}")]
    InvalidRange(String),
    #[error("fetch failed for {scope}: {reason}")]
    FetchFailure { scope: String, reason: String },
    #[error("invalid instant in {field}: {raw:?}")]
    InvalidInstant { field: &'static str, raw: String },
    #[error("request belongs to a grid that is no longer current")]
    Superseded,
    #[error("unknown period kind: {0}")]
    InvalidPeriodKind(String),
}

impl CalendarError {
    pub fn fetch(scope: impl Into<String>, reason: impl ToString) -> Self {
        Self::FetchFailure {
            scope: scope.into(),
            reason: reason.to_string(),
        }
    }

    /// Re-invoking the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FetchFailure { .. })
    }
}

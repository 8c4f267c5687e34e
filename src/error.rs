//! # Error Handling
//!
//! Unified error taxonomy for the calendar core. Every failure mode is a
//! tagged variant; adapter and recurrence errors fold into [`CalendarError`]
//! so callers can match on the class of failure rather than on strings.

use thiserror::Error;

use crate::adapters::AdapterError;
use crate::recurrence::RecurrenceError;

/// Top-level error type for calendar core operations.
#[derive(Debug, Error)]
pub enum CalendarError {
    /// Provider access token is no longer valid; access must be re-established.
    #[error("provider authentication expired: {0}")]
    AuthExpired(String),

    /// Credentials were rejected outright by the provider.
    #[error("invalid provider credentials: {0}")]
    InvalidCredentials(String),

    /// Rate limit bound exceeded after the bounded local wait.
    #[error("provider rate limited{}", retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// Provider returned a 5xx or was unreachable; retryable.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Per-operation provider timeout elapsed.
    #[error("provider operation timed out after {0}s")]
    Timeout(u64),

    /// A single item could not be understood; the surrounding stream continues.
    #[error("malformed provider payload: {0}")]
    Malformed(String),

    /// RRULE uses a component outside the supported subset.
    #[error("unsupported RRULE component: {0}")]
    UnsupportedRRule(String),

    /// Booking failure: the requested interval does not fit an available window.
    #[error("no available time windows for the event")]
    NoAvailableTimeWindow,

    /// Booking failure: no child of the bundle can take the interval.
    #[error("no available child calendar in bundle")]
    NoAvailableChildCalendar,

    /// Bundle has no children at all.
    #[error("bundle calendar has no child calendars")]
    EmptyBundleCalendar,

    /// The designated primary is not one of the bundle's children.
    #[error("primary calendar must be one of the child calendars")]
    InvalidPrimaryCalendar,

    /// Operation requires a bundle calendar.
    #[error("calendar is not a bundle calendar")]
    NotABundleCalendar,

    /// Operation requires `manages_available_windows`.
    #[error("this calendar does not manage available windows")]
    InvalidCalendarOperation,

    /// Cross-tenant access attempt. Programmer error; never recovered.
    #[error("tenant violation: {0}")]
    TenantViolation(String),

    /// Another sync for the same calendar is already in progress.
    #[error("a sync is already in progress for calendar {0}")]
    SyncInProgress(uuid::Uuid),

    /// Inbound webhook failed validation; surfaces as HTTP 400.
    #[error("webhook validation failed: {0}")]
    WebhookValidationFailed(String),

    /// Entity lookup within the tenant scope came up empty.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Job was cancelled while running.
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Recurrence(#[from] RecurrenceError),

    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),
}

impl CalendarError {
    /// Whether a retry at the job layer may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CalendarError::ProviderUnavailable(_)
                | CalendarError::Timeout(_)
                | CalendarError::RateLimited { .. }
        )
    }
}

impl From<AdapterError> for CalendarError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::AuthExpired(msg) => CalendarError::AuthExpired(msg),
            AdapterError::InvalidCredentials(msg) => CalendarError::InvalidCredentials(msg),
            AdapterError::RateLimited { retry_after_secs } => {
                CalendarError::RateLimited { retry_after_secs }
            }
            AdapterError::ProviderUnavailable(msg) => CalendarError::ProviderUnavailable(msg),
            AdapterError::Timeout(secs) => CalendarError::Timeout(secs),
            AdapterError::Malformed(msg) => CalendarError::Malformed(msg),
            AdapterError::NotFound(what) => CalendarError::NotFound(what),
            AdapterError::UnsupportedRRule(component) => CalendarError::UnsupportedRRule(component),
        }
    }
}

/// Convenience alias used throughout the core.
pub type CalendarResult<T> = Result<T, CalendarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CalendarError::ProviderUnavailable("503".into()).is_retryable());
        assert!(CalendarError::Timeout(30).is_retryable());
        assert!(
            CalendarError::RateLimited {
                retry_after_secs: Some(10)
            }
            .is_retryable()
        );
        assert!(!CalendarError::NoAvailableTimeWindow.is_retryable());
        assert!(!CalendarError::TenantViolation("join without tenant".into()).is_retryable());
    }

    #[test]
    fn adapter_errors_fold_into_calendar_errors() {
        let err: CalendarError = AdapterError::RateLimited {
            retry_after_secs: Some(2),
        }
        .into();
        assert!(matches!(
            err,
            CalendarError::RateLimited {
                retry_after_secs: Some(2)
            }
        ));

        let err: CalendarError = AdapterError::UnsupportedRRule("BYSETPOS".into()).into();
        assert!(matches!(err, CalendarError::UnsupportedRRule(c) if c == "BYSETPOS"));
    }
}

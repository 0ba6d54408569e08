//! Trading session utilities.
//!
//! Session checks run in the exchange's local timezone so that
//! daylight-saving transitions are handled by `chrono-tz`.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;

use crate::error::{CoreError, Result};

/// Regular-session hours for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHours {
    pub timezone: Tz,
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl Default for SessionHours {
    /// US equities: 09:30-16:00 America/New_York.
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::New_York,
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl SessionHours {
    /// Build from a timezone name and `HH:MM` times.
    pub fn parse(timezone: &str, open: &str, close: &str) -> Result<Self> {
        let timezone: Tz = timezone
            .parse()
            .map_err(|e| CoreError::InvalidConfig(format!("timezone {timezone}: {e}")))?;
        Ok(Self {
            timezone,
            open: parse_hhmm(open)?,
            close: parse_hhmm(close)?,
        })
    }

    /// Local wall time at `dt`.
    pub fn local_time(&self, dt: DateTime<Utc>) -> NaiveTime {
        dt.with_timezone(&self.timezone).time()
    }

    /// Local calendar date at `dt`.
    pub fn local_date(&self, dt: DateTime<Utc>) -> NaiveDate {
        dt.with_timezone(&self.timezone).date_naive()
    }

    /// Weekday within [open, close) local time. Exchange holidays are not
    /// modelled.
    pub fn is_regular_session_at(&self, dt: DateTime<Utc>) -> bool {
        let local = dt.with_timezone(&self.timezone);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let t = local.time();
        t >= self.open && t < self.close
    }

    /// True once local time has reached `cutoff`.
    pub fn is_past(&self, dt: DateTime<Utc>, cutoff: NaiveTime) -> bool {
        self.local_time(dt) >= cutoff
    }
}

/// Parse `HH:MM` into a `NaiveTime`.
pub fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|e| CoreError::InvalidConfig(format!("time {s}: {e}")))
}

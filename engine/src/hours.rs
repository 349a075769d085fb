// Business-Hours Calculator - wall-clock deadline arithmetic
//
// All day-boundary arithmetic happens in local wall-clock time so that
// a deadline set across a daylight-saving transition still lands at
// the expected local hour.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::config::BusinessHoursConfig;

/// A business calendar: a daily local window, Monday through Friday,
/// minus a precomputed holiday set.
#[derive(Debug, Clone)]
pub struct BusinessCalendar {
    open_hour: u32,
    close_hour: u32,
    holidays: HashSet<NaiveDate>,
}

impl BusinessCalendar {
    /// `close_hour` may be 24 to mean "until midnight".
    pub fn new(open_hour: u32, close_hour: u32) -> Self {
        Self {
            open_hour,
            close_hour,
            holidays: HashSet::new(),
        }
    }

    pub fn from_config(config: &BusinessHoursConfig) -> Self {
        Self::new(config.open_hour, config.close_hour)
    }

    pub fn with_holidays(mut self, days: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(days);
        self
    }

    fn is_business_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    fn open_at(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_hms_opt(self.open_hour, 0, 0)
            .unwrap_or_else(|| date.and_hms_opt(0, 0, 0).expect("midnight exists"))
    }

    fn close_at(&self, date: NaiveDate) -> NaiveDateTime {
        if self.close_hour >= 24 {
            self.open_at(date.succ_opt().unwrap_or(date))
                .date()
                .and_hms_opt(0, 0, 0)
                .expect("midnight exists")
        } else {
            date.and_hms_opt(self.close_hour, 0, 0)
                .expect("close hour is a valid local hour")
        }
    }

    fn next_opening(&self, after: NaiveDate) -> NaiveDateTime {
        let mut date = after.succ_opt().unwrap_or(after);
        while !self.is_business_day(date) {
            date = date.succ_opt().unwrap_or(date);
        }
        self.open_at(date)
    }

    /// Snap a local time into the business window: unchanged when
    /// already inside, otherwise the next window opening.
    fn align_to_window(&self, mut local: NaiveDateTime) -> NaiveDateTime {
        loop {
            let date = local.date();
            if !self.is_business_day(date) {
                local = self.next_opening(date);
                continue;
            }
            if local < self.open_at(date) {
                return self.open_at(date);
            }
            if local >= self.close_at(date) {
                local = self.next_opening(date);
                continue;
            }
            return local;
        }
    }

    /// Add `hours` business hours to `start`, interpreting the window
    /// in `tz` local time, and return the resulting UTC instant.
    ///
    /// With `hours == 0` this returns `start` itself when it is inside
    /// the window, otherwise the next window opening.
    pub fn add_business_hours(&self, start: DateTime<Utc>, hours: u32, tz: Tz) -> DateTime<Utc> {
        let mut local = self.align_to_window(start.with_timezone(&tz).naive_local());
        let mut remaining = Duration::hours(hours as i64);

        loop {
            let close = self.close_at(local.date());
            let available = close - local;
            if remaining <= available {
                local += remaining;
                break;
            }
            remaining -= available;
            local = self.next_opening(local.date());
        }

        resolve_local(tz, local)
    }
}

/// Map a local wall-clock time back to UTC, tolerating DST folds and
/// gaps: ambiguous times take the earlier instant, nonexistent times
/// roll forward to the next valid one.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earlier, _) => earlier.with_timezone(&Utc),
        LocalResult::None => {
            let mut probe = local;
            loop {
                probe += Duration::minutes(15);
                if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
                    return dt.with_timezone(&Utc);
                }
            }
        }
    }
}

use chrono::{DateTime, Datelike, Days, Local, NaiveTime, TimeZone, Weekday};
use serde::Serialize;

/// Period covered by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunWindow {
    pub start: DateTime<Local>,
    pub end: DateTime<Local>,
}

impl RunWindow {
    pub fn ending_at(now: DateTime<Local>, cutoff_hour: u32) -> Self {
        Self {
            start: window_start(&now, cutoff_hour),
            end: now,
        }
    }

    pub fn contains(&self, at: &DateTime<Local>) -> bool {
        *at >= self.start && *at <= self.end
    }
}

/// Start of the run ending at `now`: `cutoff_hour` on the previous day, or on
/// the previous Friday when `now` is a Monday.
pub fn window_start<Tz: TimeZone>(now: &DateTime<Tz>, cutoff_hour: u32) -> DateTime<Tz> {
    let days_back = if now.weekday() == Weekday::Mon { 3 } else { 1 };
    let day = now
        .date_naive()
        .checked_sub_days(Days::new(days_back))
        .unwrap_or(now.date_naive());
    let cutoff = NaiveTime::from_hms_opt(cutoff_hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let naive = day.and_time(cutoff);

    now.timezone()
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| now.timezone().from_utc_datetime(&naive))
}

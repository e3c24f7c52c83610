use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Timestamps are stored as UTC text in this format. Fixed-width and
/// zero-padded, so lexicographic order matches chronological order and
/// SQL string comparisons are safe.
pub const TIME_FMT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub const DATE_FMT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Open = 1,
    Claimed = 2,
    Closed = 3,
}

impl Status {
    /// Maps a stored status column. NULL is a legacy value treated as Open
    /// by every listing and count; anything outside 1..=3 is corrupt data.
    pub fn from_db(value: Option<i64>) -> Result<Option<Status>, i64> {
        match value {
            None => Ok(None),
            Some(1) => Ok(Some(Status::Open)),
            Some(2) => Ok(Some(Status::Claimed)),
            Some(3) => Ok(Some(Status::Closed)),
            Some(other) => Err(other),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Status::Open => "Open",
            Status::Claimed => "Claimed",
            Status::Closed => "Closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    Spring = 1,
    Summer = 2,
    Fall = 3,
}

impl Season {
    pub fn from_db(value: i64) -> Option<Season> {
        match value {
            1 => Some(Season::Spring),
            2 => Some(Season::Summer),
            3 => Some(Season::Fall),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Season::Spring => "Spring",
            Season::Summer => "Summer",
            Season::Fall => "Fall",
        }
    }
}

/// Semester title, e.g. "2024 Fall". Unknown season values render as "?"
/// rather than failing a whole report row.
pub fn semester_title(year: i64, season: i64) -> String {
    match Season::from_db(season) {
        Some(s) => format!("{} {}", year, s.name()),
        None => format!("{} ?", year),
    }
}

pub fn now_utc() -> String {
    Utc::now().format(TIME_FMT).to_string()
}

/// Today's date in the configured display timezone.
pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// The UTC instant at which `date` begins in the given timezone, in
/// stored-timestamp format. DST gaps resolve to the earliest valid local
/// time; a date with no valid mapping falls back to UTC midnight.
pub fn local_day_start_utc(tz: Tz, date: NaiveDate) -> String {
    match tz.from_local_datetime(&date.and_time(NaiveTime::MIN)).earliest() {
        Some(dt) => dt.with_timezone(&Utc).format(TIME_FMT).to_string(),
        None => format!("{}T00:00:00Z", date.format(DATE_FMT)),
    }
}

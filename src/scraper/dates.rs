use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};

use super::error::{ScrapeError, ScrapeResult};

/// Listing window for post pagination.
///
/// Bounds are given at year, month, or day granularity (`2020`, `2020-01`,
/// `2020-01-15`) or as RFC 3339 instants. The start is the beginning of its
/// period; the end bound covers its whole period, so `2020-01`..`2020-02`
/// spans January and February 2020.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: DateTime<Utc>,
    end_exclusive: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Parse a window; an empty `end` leaves it open towards the present.
    pub fn parse(start: &str, end: Option<&str>) -> ScrapeResult<Self> {
        let (start, _) = parse_period(start)?;
        let end_exclusive = match end.map(str::trim).filter(|e| !e.is_empty()) {
            Some(end) => Some(parse_period(end)?.1),
            None => None,
        };
        if end_exclusive.is_some_and(|end| end <= start) {
            return Err(ScrapeError::InvalidDateRange(format!(
                "end '{}' is not after start",
                end.unwrap_or_default()
            )));
        }
        Ok(Self {
            start,
            end_exclusive,
        })
    }

    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && self.end_exclusive.is_none_or(|end| ts < end)
    }

    /// Whether `ts` falls before the window, meaning older pages can be skipped.
    #[must_use]
    pub fn precedes(&self, ts: DateTime<Utc>) -> bool {
        ts < self.start
    }
}

/// Parse a bound into the half-open interval `[start, end)` it names.
fn parse_period(raw: &str) -> ScrapeResult<(DateTime<Utc>, DateTime<Utc>)> {
    let s = raw.trim();
    let invalid = || ScrapeError::InvalidDateRange(format!("unrecognised date '{raw}'"));

    if let Ok(instant) = DateTime::parse_from_rfc3339(s) {
        let instant = instant.with_timezone(&Utc);
        return Ok((instant, instant + chrono::Duration::seconds(1)));
    }

    let parts: Vec<&str> = s.split('-').collect();
    let (first_day, months) = match parts.as_slice() {
        [y] => (ymd(y, "1", "1").ok_or_else(invalid)?, Some(12)),
        [y, m] => (ymd(y, m, "1").ok_or_else(invalid)?, Some(1)),
        [y, m, d] => (ymd(y, m, d).ok_or_else(invalid)?, None),
        _ => return Err(invalid()),
    };

    let next = match months {
        Some(n) => first_day.checked_add_months(Months::new(n)),
        None => first_day.succ_opt(),
    }
    .ok_or_else(invalid)?;

    Ok((midnight(first_day), midnight(next)))
}

fn ymd(y: &str, m: &str, d: &str) -> Option<NaiveDate> {
    let year = y.parse().ok()?;
    if !(1900..=9999).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, m.parse().ok()?, d.parse().ok()?)
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

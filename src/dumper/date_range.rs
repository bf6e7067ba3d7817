use chrono::{Days, NaiveDate};
use std::fmt;

/// Inclusive calendar interval `[start, end]`, always `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(a: NaiveDate, b: NaiveDate) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// First day after the range; the exclusive upper bound for queries.
    pub fn end_exclusive(&self) -> NaiveDate {
        self.end.checked_add_days(Days::new(1)).unwrap_or(self.end)
    }

    pub fn days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    pub fn is_single_day(&self) -> bool {
        self.start == self.end
    }

    /// Split into `[start, mid]` and `[mid+1, end]`. `None` for a single day.
    pub fn bisect(&self) -> Option<(Self, Self)> {
        if self.is_single_day() {
            return None;
        }
        let mid = self.start.checked_add_days(Days::new((self.days() - 1) / 2))?;
        let right_start = mid.checked_add_days(Days::new(1))?;
        Some((
            Self {
                start: self.start,
                end: mid,
            },
            Self {
                start: right_start,
                end: self.end,
            },
        ))
    }
}

/// `YYYY-MM-DD`, surrounding whitespace ignored.
pub fn parse_day(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("invalid date `{raw}` (want YYYY-MM-DD): {err}"))
}

#[cfg(test)]
impl DateRange {
    pub fn single_day(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    pub fn parse(start: &str, end: &str) -> Result<Self, String> {
        Ok(Self::new(parse_day(start)?, parse_day(end)?))
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |day| *day <= self.end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

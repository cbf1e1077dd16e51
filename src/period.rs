//! Period Parser
//!
//! Turns the `period` query parameter (`"start,end"`) into a validated date
//! pair plus the display label consumers already rely on.

use chrono::{DateTime, Days, NaiveDate, Utc};

use crate::error::{EngineError, EngineResult};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Window used when the request carries no `period`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultWindow {
    /// Yesterday through today
    Yesterday,
    /// A fixed start date through today
    Since(NaiveDate),
}

impl Default for DefaultWindow {
    fn default() -> Self {
        DefaultWindow::Since(NaiveDate::from_ymd_opt(2011, 9, 1).expect("2011-09-01 is a valid date"))
    }
}

impl DefaultWindow {
    /// Parse a configured window: `yesterday` or a start date
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("yesterday") {
            return Some(DefaultWindow::Yesterday);
        }
        parse_date(raw).map(DefaultWindow::Since)
    }

    fn range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match *self {
            DefaultWindow::Yesterday => {
                let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
                (yesterday, today)
            }
            DefaultWindow::Since(start) => (start, today),
        }
    }
}

/// Validated reporting window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Derived from the day span, never user supplied
    pub label: &'static str,
}

impl Period {
    pub fn parse(raw: Option<&str>, window: DefaultWindow) -> EngineResult<Self> {
        Self::parse_at(raw, window, Utc::now().date_naive())
    }

    /// Same as [`Period::parse`] with an explicit "today"
    pub fn parse_at(raw: Option<&str>, window: DefaultWindow, today: NaiveDate) -> EngineResult<Self> {
        let (start, end) = match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => window.range(today),
            Some(raw) => {
                let (start, end) = raw.split_once(',').ok_or_else(|| {
                    EngineError::InvalidInput(format!("Invalid period '{}': expected start,end", raw))
                })?;
                let start = parse_date(start)
                    .ok_or_else(|| EngineError::InvalidInput(format!("Invalid period start '{}'", start)))?;
                let end = parse_date(end)
                    .ok_or_else(|| EngineError::InvalidInput(format!("Invalid period end '{}'", end)))?;
                (start, end)
            }
        };

        if start > end {
            return Err(EngineError::InvalidInput(format!(
                "Invalid period: start {} is after end {}",
                start, end
            )));
        }

        Ok(Self {
            start,
            end,
            label: period_label(start, end),
        })
    }

    /// Start date as spliced into query templates
    pub fn begin_str(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }
}

/// Presentation label for a window, keyed on whole days between the dates.
///
/// Anything other than 1, 2 or 3 days (zero and negative spans included)
/// reads "Past week".
pub fn period_label(start: NaiveDate, end: NaiveDate) -> &'static str {
    match (end - start).num_days() {
        1 => "Past 24 hours",
        2 => "Past 48 hours",
        3 => "Past 72 hours",
        _ => "Past week",
    }
}

/// Accepts `YYYY-M-D` (padding optional) or an RFC 3339 timestamp
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

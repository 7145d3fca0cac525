//! Run context: which quarter is processed and which transformers are selected.

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::Layout;

static TIME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?P<year>\d{4})-Q(?P<quarter>[1-4])").expect("static pattern"));

// =============================================================================
// Time
// =============================================================================

/// A year and quarter, written `YYYY-Qn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Time {
    pub year: i32,
    pub quarter: u8,
}

impl Time {
    /// `None` unless `quarter` is in `1..=4`.
    pub fn new(year: i32, quarter: u8) -> Option<Self> {
        (1..=4).contains(&quarter).then_some(Self { year, quarter })
    }

    /// Last calendar day of the quarter.
    pub fn last_day(&self) -> NaiveDate {
        let (year, month) = if self.quarter == 4 {
            (self.year + 1, 1)
        } else {
            (self.year, u32::from(self.quarter) * 3 + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MIN)
    }

    /// Quarter containing `date`.
    pub fn of_date(date: NaiveDate) -> Self {
        Self { year: date.year(), quarter: ((date.month() - 1) / 3 + 1) as u8 }
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-Q{}", self.year, self.quarter)
    }
}

impl FromStr for Time {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = TIME_PATTERN
            .captures(s)
            .ok_or_else(|| format!("'{}' is not a quarter (expected YYYY-Qn)", s))?;
        let year = caps["year"].parse::<i32>().map_err(|e| e.to_string())?;
        let quarter = caps["quarter"].parse::<u8>().map_err(|e| e.to_string())?;
        Time::new(year, quarter).ok_or_else(|| format!("'{}' has no quarter {}", s, quarter))
    }
}

// =============================================================================
// Filter
// =============================================================================

/// Selection of transformers by name and tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Filter {
    /// A transformer runs when its name is listed (or no names are listed) and
    /// it carries every listed tag.
    pub fn will_run(&self, name: &str, tags: &[String]) -> bool {
        if !self.names.is_empty() && !self.names.iter().any(|n| n == name) {
            return false;
        }
        self.tags.iter().all(|required| tags.contains(required))
    }
}

// =============================================================================
// Context
// =============================================================================

/// Everything a run needs to know about its environment.
#[derive(Debug, Clone)]
pub struct Context {
    pub time: Time,
    pub filter: Filter,
    pub layout: Layout,
}

impl Context {
    pub fn new(time: Time, filter: Filter, layout: Layout) -> Self {
        Self { time, filter, layout }
    }

    pub fn will_run(&self, name: &str, tags: &[String]) -> bool {
        self.filter.will_run(name, tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_display_and_parse() {
        let time: Time = "2024-Q3".parse().unwrap();
        assert_eq!(time, Time { year: 2024, quarter: 3 });
        assert_eq!(time.to_string(), "2024-Q3");
        assert!("2024-Q5".parse::<Time>().is_err());
        assert!("Q1".parse::<Time>().is_err());
    }

    #[test]
    fn test_last_day() {
        assert_eq!(Time { year: 2024, quarter: 1 }.last_day(), NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        assert_eq!(Time { year: 2024, quarter: 2 }.last_day(), NaiveDate::from_ymd_opt(2024, 6, 30).unwrap());
        assert_eq!(Time { year: 2023, quarter: 4 }.last_day(), NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    }

    #[test]
    fn test_will_run() {
        let tags = vec!["acme".to_string(), "canada".to_string()];

        assert!(Filter::default().will_run("anything", &[]));

        let by_name = Filter { names: vec!["a".into()], tags: vec![] };
        assert!(by_name.will_run("a", &[]));
        assert!(!by_name.will_run("b", &tags));

        let by_tag = Filter { names: vec![], tags: vec!["acme".into(), "canada".into()] };
        assert!(by_tag.will_run("x", &tags));
        assert!(!by_tag.will_run("x", &tags[..1]));
    }
}

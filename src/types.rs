use crate::error::{ReportError, Result};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Property-usage category. Every category owns exactly one display label,
/// which doubles as the usage value stored in the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Usage {
    Residential,
    Villa,
    Commercial,
    Office,
}

impl Usage {
    /// Report order, one page per category.
    pub const ALL: [Usage; 4] = [
        Usage::Residential,
        Usage::Villa,
        Usage::Commercial,
        Usage::Office,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Usage::Residential => "住宅",
            Usage::Villa => "别墅",
            Usage::Commercial => "商业",
            Usage::Office => "办公",
        }
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Usage {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Usage::ALL
            .into_iter()
            .find(|u| u.label() == s)
            .ok_or_else(|| ReportError::UnknownUsage(s.to_string()))
    }
}

/// Listed ("sale") versus transacted ("sold") records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RankKind {
    Sale,
    Sold,
}

impl RankKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RankKind::Sale => "sale",
            RankKind::Sold => "sold",
        }
    }
}

impl FromStr for RankKind {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "sale" => Ok(RankKind::Sale),
            "sold" => Ok(RankKind::Sold),
            other => Err(ReportError::UnknownKind(other.to_string())),
        }
    }
}

/// An ISO week (Monday to Sunday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportWeek {
    pub year: i32,
    pub week: u32,
}

impl ReportWeek {
    pub fn new(year: i32, week: u32) -> Result<Self> {
        NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)
            .map(|_| ReportWeek { year, week })
            .ok_or_else(|| ReportError::Config(format!("no ISO week {} in {}", week, year)))
    }

    pub fn containing(date: NaiveDate) -> Self {
        let iso = date.iso_week();
        ReportWeek {
            year: iso.year(),
            week: iso.week(),
        }
    }

    pub fn current() -> Self {
        ReportWeek::containing(chrono::Local::now().date_naive())
    }

    pub fn period(self) -> Period {
        // `new` and `containing` only ever build valid weeks.
        let start = NaiveDate::from_isoywd_opt(self.year, self.week, Weekday::Mon)
            .unwrap_or(NaiveDate::MIN);
        Period {
            start,
            end: start + Duration::days(6),
        }
    }
}

/// An inclusive date range covered by one row of a time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    /// `YYYYMMDD-YYYYMMDD`, the label used for time-series index rows.
    pub fn label(&self) -> String {
        format!("{}-{}", self.start.format("%Y%m%d"), self.end.format("%Y%m%d"))
    }
}

/// One transaction or listing record, as loaded from the data source.
#[derive(Debug, Deserialize)]
pub struct RawRow {
    pub date: Option<String>,
    pub kind: Option<String>,
    pub usage: Option<String>,
    pub plate: Option<String>,
    pub project: Option<String>,
    pub function: Option<String>,
    pub area: Option<String>,
    pub units: Option<String>,
    pub amount: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub date: NaiveDate,
    pub kind: RankKind,
    pub usage: Usage,
    pub plate: String,
    pub project: String,
    pub function: String,
    pub area: f64,
    pub units: i64,
    pub amount: f64,
}

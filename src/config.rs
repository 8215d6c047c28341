use crate::error::Result;
use crate::types::ReportWeek;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "report.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub data_path: PathBuf,
    pub template_path: PathBuf,
    pub output_dir: PathBuf,
    pub city: String,
    /// ISO year and week of the report; both default to the current week.
    pub year: Option<i32>,
    pub week: Option<u32>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            data_path: PathBuf::from("data/transactions.csv"),
            template_path: PathBuf::from("template.json"),
            output_dir: PathBuf::from("."),
            city: "南京".to_string(),
            year: None,
            week: None,
        }
    }
}

impl ReportConfig {
    /// Read `path` if it exists, otherwise fall back to the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(ReportConfig::default());
        }
        let s = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&s)?)
    }

    pub fn report_week(&self) -> Result<ReportWeek> {
        let current = ReportWeek::current();
        match (self.year, self.week) {
            (None, None) => Ok(current),
            (year, week) => ReportWeek::new(year.unwrap_or(current.year), week.unwrap_or(current.week)),
        }
    }

    pub fn output_path(&self, week: ReportWeek) -> PathBuf {
        self.output_dir
            .join(format!("{}年第{}周周报.md", week.year, week.week))
    }
}

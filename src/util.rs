// Parsing and text helpers shared by the data source and the formatters.
//
// Loose CSV values are normalized here so the rest of the code can assume
// clean, typed values.
use crate::error::{ReportError, Result};
use chrono::NaiveDate;
use num_format::{Locale, ToFormattedString};

/// `area` and `amount` cells. Exports write them with thousands separators
/// (`1,234.5`) and sometimes put a note such as `n/a` in place of a number;
/// those come back as `None` and the row is skipped.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() || s.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    s.replace(",", "").parse::<f64>().ok()
}

/// `units` cells; same separators as `parse_f64_safe`.
pub fn parse_i64_safe(s: Option<&str>) -> Option<i64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    s.replace(",", "").parse::<i64>().ok()
}

/// The `date` column, `YYYY-MM-DD`.
pub fn parse_date_safe(s: Option<&str>) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s?.trim(), "%Y-%m-%d").ok()
}

pub fn round_to(n: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (n * factor).round() / factor
}

/// Rewrite a period label like `20180917-20180923` into `09.17-09.23`.
///
/// Every `-`-separated part must be eight digits; month and day are taken
/// by position, not checked against the calendar.
pub fn short_period_label(label: &str) -> Result<String> {
    let parts = label
        .split('-')
        .map(|part| {
            let part = part.trim();
            if part.len() != 8 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ReportError::PeriodLabel(label.to_string()));
            }
            Ok(format!("{}.{}", &part[4..6], &part[6..8]))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("-"))
}

/// Merge the first sentences of a narrative into one paragraph: prefix
/// `lead` and turn the first two `。` into `；`.
pub fn merge_sentences(lead: &str, text: &str) -> String {
    let mut out = String::with_capacity(lead.len() + text.len());
    out.push_str(lead);
    let mut replaced = 0;
    for c in text.chars() {
        if c == '。' && replaced < 2 {
            out.push('；');
            replaced += 1;
        } else {
            out.push(c);
        }
    }
    out
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    // Record counts in the load log line.
    n.to_formatted_string(&Locale::en)
}

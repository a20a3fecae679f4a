use chrono::{Datelike, NaiveDate};
use serde::Serialize;

/// Display status for one (student, course, month) cell of the payments board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonthStatus {
    NotPaid,
    Paid,
    Partial,
    NotApplicable,
}

impl MonthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MonthStatus::NotPaid => "NOT_PAID",
            MonthStatus::Paid => "PAID",
            MonthStatus::Partial => "PARTIAL",
            MonthStatus::NotApplicable => "NOT_APPLICABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaymentFacts {
    pub amount: f64,
    pub liquidated: bool,
}

/// Derive the month status from the payment rows matching one
/// (student, course, month).
///
/// A zero-amount row is an explicit exemption marker and wins over anything
/// else recorded for the month; a liquidated row wins over coexisting
/// partials; remaining positive rows are installments.
pub fn month_status(rows: &[PaymentFacts]) -> MonthStatus {
    if rows.is_empty() {
        return MonthStatus::NotPaid;
    }
    if rows.iter().any(|r| r.amount == 0.0) {
        return MonthStatus::NotApplicable;
    }
    if rows.iter().any(|r| r.liquidated) {
        return MonthStatus::Paid;
    }
    MonthStatus::Partial
}

/// Count of months a student still owes: every month in range that is neither
/// settled nor exempt.
pub fn months_owed<I>(statuses: I) -> i64
where
    I: IntoIterator<Item = MonthStatus>,
{
    statuses
        .into_iter()
        .filter(|s| matches!(s, MonthStatus::NotPaid | MonthStatus::Partial))
        .count() as i64
}

pub fn parse_month_key(raw: &str) -> Result<(i32, u32), String> {
    let t = raw.trim();
    let Some((y, m)) = t.split_once('-') else {
        return Err("month must be YYYY-MM".to_string());
    };
    let year = y
        .parse::<i32>()
        .map_err(|_| "month year must be numeric".to_string())?;
    if !(1900..=9999).contains(&year) {
        return Err("month year out of range".to_string());
    }
    let month = m
        .parse::<u32>()
        .map_err(|_| "month must be YYYY-MM".to_string())?;
    if !(1..=12).contains(&month) {
        return Err("month must be between 01 and 12".to_string());
    }
    Ok((year, month))
}

pub fn format_month_key(year: i32, month: u32) -> String {
    format!("{:04}-{:02}", year, month)
}

/// Inclusive list of month keys from `from` through `to`. Empty when `from`
/// is after `to`.
pub fn month_range(from: (i32, u32), to: (i32, u32)) -> Vec<String> {
    let mut out = Vec::new();
    let (mut y, mut m) = from;
    while (y, m) <= to {
        out.push(format_month_key(y, m));
        m += 1;
        if m > 12 {
            m = 1;
            y += 1;
        }
    }
    out
}

/// Receipt numbers encode the transaction date plus a per-day sequence:
/// `R-20260806-001`.
pub fn receipt_number(date: NaiveDate, seq: i64) -> String {
    format!(
        "R-{:04}{:02}{:02}-{:03}",
        date.year(),
        date.month(),
        date.day(),
        seq
    )
}

/// Day prefix used as the receipt sequence key.
pub fn receipt_day_prefix(date: NaiveDate) -> String {
    format!("{:04}{:02}{:02}", date.year(), date.month(), date.day())
}

/// Control numbers encode the enrollment year plus a per-year sequence:
/// `2026-0001`.
pub fn control_number(year: i32, seq: i64) -> String {
    format!("{:04}-{:04}", year, seq)
}

use chrono::{Datelike, Months, NaiveDate};

/// Format of invoice-month keys, e.g. `2024-01`
pub const MONTH_FORMAT: &str = "%Y-%m";

/// The set of days and invoice months a run works on, derived from "today".
///
/// The last invoice date is yesterday. Its month is always an invoice month;
/// the month before it is added when `include_previous_month` is set. Files
/// dated on or after the retention floor (first day of the month preceding
/// the last invoice date's month) are never pruned.
#[derive(Debug, Clone)]
pub struct InvoiceWindow {
    today: NaiveDate,
    last_invoice_date: NaiveDate,
    invoice_months: Vec<String>,
    retention_floor: NaiveDate,
}

impl InvoiceWindow {
    pub fn new(today: NaiveDate, include_previous_month: bool) -> Self {
        let last_invoice_date = today.pred_opt().unwrap_or(today);
        let previous_month = last_invoice_date
            .checked_sub_months(Months::new(1))
            .unwrap_or(last_invoice_date);

        let mut invoice_months = vec![month_key(last_invoice_date)];
        if include_previous_month {
            invoice_months.push(month_key(previous_month));
        }

        Self {
            today,
            last_invoice_date,
            invoice_months,
            retention_floor: first_of_month(previous_month),
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn last_invoice_date(&self) -> NaiveDate {
        self.last_invoice_date
    }

    pub fn invoice_months(&self) -> &[String] {
        &self.invoice_months
    }

    pub fn retention_floor(&self) -> NaiveDate {
        self.retention_floor
    }

    /// True when the date belongs to one of the invoice months.
    pub fn contains(&self, date: NaiveDate) -> bool {
        let key = month_key(date);
        self.invoice_months.iter().any(|m| *m == key)
    }

    /// True when the date is inside the mandatory saving period.
    pub fn in_retention_period(&self, date: NaiveDate) -> bool {
        date >= self.retention_floor
    }

    pub fn is_current_month(&self, month: &str) -> bool {
        month_key(self.today) == month
    }

    /// Days to export in ascending order: every day of the invoice months up
    /// to and including today.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        let start = self
            .invoice_months
            .iter()
            .filter_map(|m| parse_month(m))
            .min()
            .unwrap_or(self.today);

        start
            .iter_days()
            .take_while(move |d| *d <= self.today)
            .filter(move |d| self.contains(*d))
    }
}

pub fn month_key(date: NaiveDate) -> String {
    date.format(MONTH_FORMAT).to_string()
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Parses a `YYYY-MM` key into the first day of that month.
pub fn parse_month(month: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{}-01", month), "%Y-%m-%d").ok()
}

/// Number of calendar days in a `YYYY-MM` month.
pub fn days_in_month(month: &str) -> Option<u32> {
    let first = parse_month(month)?;
    let next = first.checked_add_months(Months::new(1))?;
    u32::try_from((next - first).num_days()).ok()
}

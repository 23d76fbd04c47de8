use chrono::NaiveDate;

/// Parses a `YYYY-MM` year-month into the first day of that month.
pub fn parse_year_month(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() != 7 || raw.as_bytes()[4] != b'-' {
        return None;
    }
    NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d").ok()
}

/// Brings legacy spellings (`2020/4`, `2020.04`, `2020-04-01`) to `YYYY-MM`.
/// Anything unrecognised is returned trimmed but otherwise untouched so
/// validation can report it.
pub fn canonical_year_month(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    let parts: Vec<&str> = raw.split(['-', '/', '.']).collect();
    if parts.len() >= 2 {
        if let (Ok(year), Ok(month)) = (parts[0].parse::<u32>(), parts[1].parse::<u32>()) {
            if (1000..=9999).contains(&year) && (1..=12).contains(&month) {
                return format!("{year:04}-{month:02}");
            }
        }
    }
    raw.to_string()
}

/// Parses a full `YYYY-MM-DD` date.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct AgeCategory {
    pub id: String,
    pub label: String,
    /// Inclusive age ceiling at the sport's start date. None = open band,
    /// only assignable through the last-category fallback.
    pub max_age: Option<i64>,
}

/// Age in complete years at `at`. A birthday later in the year than the
/// event's month/day has not happened yet and reduces the age by one.
pub fn age_on(dob: NaiveDate, at: NaiveDate) -> i64 {
    let mut years = i64::from(at.year() - dob.year());
    if (at.month(), at.day()) < (dob.month(), dob.day()) {
        years -= 1;
    }
    years
}

/// Pick the narrowest band: the first category in the given (label) order
/// whose ceiling covers the age; otherwise the last category.
pub fn pick_age_category(categories: &[AgeCategory], age: i64) -> Option<&AgeCategory> {
    categories
        .iter()
        .find(|c| c.max_age.map(|max| max >= age).unwrap_or(false))
        .or_else(|| categories.last())
}

/// Parse the ceiling out of a legacy display label ("Under 17", "U17",
/// "17 and under", "17 & under"). Used only by the db migration that
/// backfills the explicit max_age column; runtime selection never reads
/// the label.
pub fn ceiling_from_label(label: &str) -> Option<i64> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = RES.get_or_init(|| {
        [
            r"(?i)\bunder\s*(\d{1,3})\b",
            r"(?i)\b(\d{1,3})\s*(?:and|&)\s*under\b",
            r"(?i)\bu\s*(\d{1,3})\b",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    });
    for re in patterns {
        if let Some(caps) = re.captures(label) {
            if let Some(m) = caps.get(1) {
                if let Ok(n) = m.as_str().parse::<i64>() {
                    return Some(n);
                }
            }
        }
    }
    None
}

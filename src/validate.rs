use crate::mapping::StudentRowInput;
use chrono::{Datelike, Duration, Local, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

pub const ERR_NAME_REQUIRED: &str = "Name is required";
pub const ERR_UID_REQUIRED: &str = "UID is required";
pub const ERR_SPORT_REQUIRED: &str = "Sport is required";
pub const ERR_DOB_REQUIRED: &str = "DOB is required";
pub const ERR_GENDER_REQUIRED: &str = "Gender is required";
pub const ERR_DOB_INVALID: &str = "Invalid date for DOB";
pub const ERR_DOB_RANGE: &str = "DOB must be between 100 years ago and today";
pub const ERR_GENDER_ENUM: &str = "Gender must be one of male, female, other";

/// Largest Excel serial day accepted (2099-12-31 in the 1900 date system).
const EXCEL_SERIAL_MAX: i64 = 73050;

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub errors: Vec<String>,
    pub formatted_dob: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DobParse {
    Valid(NaiveDate),
    /// Shape matched a known pattern but the calendar date does not exist.
    InvalidCalendar,
    UnknownFormat,
}

/// Check one canonical row. Errors accumulate; nothing short-circuits, so a
/// row can report every problem at once. Running this twice over the same
/// input yields the same outcome.
pub fn validate_row(row: &StudentRowInput) -> ValidationOutcome {
    let mut errors: Vec<String> = Vec::new();
    let mut formatted_dob: Option<String> = None;

    if row.name.trim().is_empty() {
        errors.push(ERR_NAME_REQUIRED.to_string());
    }
    if row.uid.trim().is_empty() {
        errors.push(ERR_UID_REQUIRED.to_string());
    }
    if row.sport.trim().is_empty() {
        errors.push(ERR_SPORT_REQUIRED.to_string());
    }

    let dob = row.dob.trim();
    if dob.is_empty() {
        errors.push(ERR_DOB_REQUIRED.to_string());
    } else {
        match parse_dob(dob) {
            DobParse::Valid(date) => {
                let today = Local::now().date_naive();
                if date > today || date < years_before(today, 100) {
                    errors.push(ERR_DOB_RANGE.to_string());
                } else {
                    formatted_dob = Some(format_dob(date));
                }
            }
            DobParse::InvalidCalendar => errors.push(ERR_DOB_INVALID.to_string()),
            DobParse::UnknownFormat => errors.push(format!(
                "Invalid date format for DOB: {}. Accepted formats: DD/MM/YYYY, DD-MM-YYYY, YYYY-MM-DD, DD-MMM-YYYY",
                dob
            )),
        }
    }

    let gender = row.gender.trim();
    if gender.is_empty() {
        errors.push(ERR_GENDER_REQUIRED.to_string());
    } else if !["male", "female", "other"]
        .iter()
        .any(|g| gender.eq_ignore_ascii_case(g))
    {
        errors.push(ERR_GENDER_ENUM.to_string());
    }

    let email = row.parent_email.trim();
    if !email.is_empty() && !email_regex().is_match(email) {
        errors.push(format!("Invalid parent email: {}", email));
    }

    ValidationOutcome {
        errors,
        formatted_dob,
    }
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
    })
}

/// Accepted notations, in priority order: DD/MM/YYYY, DD-MM-YYYY,
/// YYYY-MM-DD, DD-MMM-YYYY / DD MMM YYYY (three-letter or full month
/// name), and bare Excel serial days in [1, 73050] against the
/// 1899-12-30 epoch (which absorbs Excel's 1900 leap-year bug for all
/// dates from 1900-03-01 on).
pub fn parse_dob(raw: &str) -> DobParse {
    let t = raw.trim();

    if let Some((d, m, y)) = split_numeric(t, '/') {
        return date_from_dmy(d, m, y);
    }

    let dash_parts: Vec<&str> = t.split('-').collect();
    if dash_parts.len() == 3 {
        if dash_parts[0].len() == 4 && dash_parts.iter().all(|p| is_digits(p)) {
            // YYYY-MM-DD
            let (y, m, d) = (
                parse_i64(dash_parts[0]),
                parse_i64(dash_parts[1]),
                parse_i64(dash_parts[2]),
            );
            return date_from_dmy(d, m, y);
        }
        if dash_parts.iter().all(|p| is_digits(p)) {
            // DD-MM-YYYY
            let (d, m, y) = (
                parse_i64(dash_parts[0]),
                parse_i64(dash_parts[1]),
                parse_i64(dash_parts[2]),
            );
            return date_from_dmy(d, m, y);
        }
        if is_digits(dash_parts[0]) && is_digits(dash_parts[2]) {
            // DD-MMM-YYYY
            if let Some(m) = month_from_name(dash_parts[1]) {
                return date_from_dmy(parse_i64(dash_parts[0]), m, parse_i64(dash_parts[2]));
            }
            return DobParse::UnknownFormat;
        }
    }

    let space_parts: Vec<&str> = t.split_whitespace().collect();
    if space_parts.len() == 3 && is_digits(space_parts[0]) && is_digits(space_parts[2]) {
        if let Some(m) = month_from_name(space_parts[1]) {
            return date_from_dmy(parse_i64(space_parts[0]), m, parse_i64(space_parts[2]));
        }
        return DobParse::UnknownFormat;
    }

    if is_digits(t) {
        if let Ok(serial) = t.parse::<i64>() {
            if (1..=EXCEL_SERIAL_MAX).contains(&serial) {
                if let Some(epoch) = NaiveDate::from_ymd_opt(1899, 12, 30) {
                    return DobParse::Valid(epoch + Duration::days(serial));
                }
            }
        }
    }

    DobParse::UnknownFormat
}

pub fn format_dob(date: NaiveDate) -> String {
    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    format!(
        "{:02}-{}-{:04}",
        date.day(),
        MONTHS[date.month0() as usize],
        date.year()
    )
}

fn split_numeric(t: &str, sep: char) -> Option<(i64, i64, i64)> {
    let parts: Vec<&str> = t.split(sep).collect();
    if parts.len() != 3 || !parts.iter().all(|p| is_digits(p)) {
        return None;
    }
    Some((parse_i64(parts[0]), parse_i64(parts[1]), parse_i64(parts[2])))
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_i64(s: &str) -> i64 {
    s.parse::<i64>().unwrap_or(-1)
}

fn date_from_dmy(d: i64, m: i64, y: i64) -> DobParse {
    if !(1000..=9999).contains(&y) {
        return DobParse::UnknownFormat;
    }
    let (Ok(month), Ok(day)) = (u32::try_from(m), u32::try_from(d)) else {
        return DobParse::InvalidCalendar;
    };
    match NaiveDate::from_ymd_opt(y as i32, month, day) {
        Some(date) => DobParse::Valid(date),
        None => DobParse::InvalidCalendar,
    }
}

fn month_from_name(name: &str) -> Option<i64> {
    const FULL: [&str; 12] = [
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ];
    let lower = name.to_lowercase();
    FULL.iter()
        .position(|full| lower == *full || lower == full[..3])
        .map(|i| i as i64 + 1)
}

fn years_before(date: NaiveDate, years: i32) -> NaiveDate {
    // Feb 29 anchors collapse to Feb 28 in non-leap target years.
    NaiveDate::from_ymd_opt(date.year() - years, date.month(), date.day())
        .or_else(|| NaiveDate::from_ymd_opt(date.year() - years, date.month(), 28))
        .unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_with_dob(dob: &str) -> StudentRowInput {
        StudentRowInput {
            row_number: 2,
            name: "Aisha".into(),
            uid: "NID-1".into(),
            dob: dob.into(),
            gender: "female".into(),
            sport: "Running".into(),
            ..Default::default()
        }
    }

    #[test]
    fn every_accepted_notation_normalizes_to_the_same_day() {
        for input in ["14/09/2000", "14-09-2000", "2000-09-14", "14-Sep-2000", "14 September 2000", "36783"] {
            let out = validate_row(&row_with_dob(input));
            assert!(out.errors.is_empty(), "{}: {:?}", input, out.errors);
            assert_eq!(out.formatted_dob.as_deref(), Some("14-Sep-2000"), "{}", input);
        }
    }

    #[test]
    fn formatted_value_parses_back_to_the_same_date() {
        let out = validate_row(&row_with_dob("14/09/2000"));
        let formatted = out.formatted_dob.expect("formatted");
        match parse_dob(&formatted) {
            DobParse::Valid(d) => assert_eq!(d, NaiveDate::from_ymd_opt(2000, 9, 14).expect("date")),
            other => panic!("round-trip failed: {:?}", other),
        }
    }

    #[test]
    fn calendar_invalid_is_distinct_from_unknown_format() {
        let out = validate_row(&row_with_dob("31/04/2010"));
        assert_eq!(out.errors, vec![ERR_DOB_INVALID.to_string()]);

        let out = validate_row(&row_with_dob("next tuesday"));
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].starts_with("Invalid date format for DOB"));
    }

    #[test]
    fn unknown_month_name_is_a_format_error() {
        let out = validate_row(&row_with_dob("14-Xyz-2000"));
        assert!(out.errors[0].starts_with("Invalid date format for DOB"));
    }

    #[test]
    fn dob_exactly_100_years_ago_is_accepted_one_day_older_rejected() {
        let today = Local::now().date_naive();
        let boundary = years_before(today, 100);

        let ok = validate_row(&row_with_dob(&format!(
            "{:02}/{:02}/{}",
            boundary.day(),
            boundary.month(),
            boundary.year()
        )));
        assert!(ok.errors.is_empty(), "{:?}", ok.errors);

        let too_old = boundary - Duration::days(1);
        let bad = validate_row(&row_with_dob(&format!(
            "{:02}/{:02}/{}",
            too_old.day(),
            too_old.month(),
            too_old.year()
        )));
        assert_eq!(bad.errors, vec![ERR_DOB_RANGE.to_string()]);
    }

    #[test]
    fn future_dob_is_rejected() {
        let tomorrow = Local::now().date_naive() + Duration::days(1);
        let out = validate_row(&row_with_dob(&format!(
            "{}-{:02}-{:02}",
            tomorrow.year(),
            tomorrow.month(),
            tomorrow.day()
        )));
        assert_eq!(out.errors, vec![ERR_DOB_RANGE.to_string()]);
    }

    #[test]
    fn excel_serial_out_of_range_is_a_format_error() {
        let out = validate_row(&row_with_dob("73051"));
        assert!(out.errors[0].starts_with("Invalid date format for DOB"));
    }

    #[test]
    fn errors_accumulate_without_short_circuiting() {
        let row = StudentRowInput {
            row_number: 2,
            dob: "bogus".into(),
            gender: "robot".into(),
            parent_email: "not-an-email".into(),
            ..Default::default()
        };
        let out = validate_row(&row);
        assert!(out.errors.contains(&ERR_NAME_REQUIRED.to_string()));
        assert!(out.errors.contains(&ERR_UID_REQUIRED.to_string()));
        assert!(out.errors.contains(&ERR_SPORT_REQUIRED.to_string()));
        assert!(out.errors.iter().any(|e| e.starts_with("Invalid date format")));
        assert!(out.errors.contains(&ERR_GENDER_ENUM.to_string()));
        assert!(out
            .errors
            .contains(&"Invalid parent email: not-an-email".to_string()));
    }

    #[test]
    fn validation_is_idempotent() {
        let row = row_with_dob("05-06-2011");
        let a = validate_row(&row);
        let b = validate_row(&row);
        assert_eq!(a.errors, b.errors);
        assert_eq!(a.formatted_dob, b.formatted_dob);
    }

    #[test]
    fn empty_parent_email_is_not_an_error() {
        let out = validate_row(&row_with_dob("14/09/2000"));
        assert!(out.errors.is_empty());
    }
}

use chrono::{Datelike, NaiveDate, Weekday};

use crate::limits::{MAX_DATES_PER_REQUEST, MAX_RANGE_DAYS};
use crate::model::parse_date;

use super::EngineError;

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Every date from `start` through `end` inclusive, optionally without weekends.
/// `end` must lie strictly after `start`.
pub fn expand_range(
    start: NaiveDate,
    end: NaiveDate,
    include_weekend: bool,
) -> Result<Vec<NaiveDate>, EngineError> {
    if end < start {
        return Err(EngineError::invalid("end is before start date"));
    }
    if end == start {
        return Err(EngineError::invalid("end is equal to start date"));
    }
    if (end - start).num_days() > MAX_RANGE_DAYS {
        return Err(EngineError::invalid(format!(
            "date range must not span more than {MAX_RANGE_DAYS} days"
        )));
    }
    Ok(start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| include_weekend || !is_weekend(*d))
        .collect())
}

/// The first `count` non-weekend days on or after `from`.
pub fn business_days(from: NaiveDate, count: usize) -> Vec<NaiveDate> {
    from.iter_days()
        .filter(|d| !is_weekend(*d))
        .take(count)
        .collect()
}

fn blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

/// Turn a booking request's date fields into an ascending list of dates.
///
/// Exactly one shape is allowed: explicit `dates`, or a `start`/`end` pair.
/// All violations found are reported together.
pub fn expand_request(
    dates: &[String],
    start: Option<&str>,
    end: Option<&str>,
    include_weekend: bool,
) -> Result<Vec<NaiveDate>, EngineError> {
    let start = blank(start);
    let end = blank(end);
    let mut errors = Vec::new();

    let expanded = match (start, end) {
        (None, Some(_)) => {
            errors.push("you have to provide a start date if providing an end date".to_string());
            Vec::new()
        }
        (Some(_), None) => {
            errors.push("you have to provide an end date if providing a start date".to_string());
            Vec::new()
        }
        (Some(raw_start), Some(raw_end)) => {
            if !dates.is_empty() {
                errors.push("provide either dates or a start/end range, not both".to_string());
            }
            let start = parse_date(raw_start);
            let end = parse_date(raw_end);
            if start.is_none() {
                errors.push("could not parse start date".to_string());
            }
            if end.is_none() {
                errors.push("could not parse end date".to_string());
            }
            match (start, end) {
                (Some(s), Some(e)) => match expand_range(s, e, include_weekend) {
                    Ok(days) => days,
                    Err(EngineError::InvalidInput(errs)) => {
                        errors.extend(errs);
                        Vec::new()
                    }
                    Err(other) => return Err(other),
                },
                _ => Vec::new(),
            }
        }
        (None, None) => {
            if dates.len() > MAX_DATES_PER_REQUEST {
                errors.push(format!(
                    "at most {MAX_DATES_PER_REQUEST} dates can be booked at once"
                ));
            }
            let mut parsed = Vec::with_capacity(dates.len());
            for raw in dates {
                match parse_date(raw) {
                    Some(d) => parsed.push(d),
                    None => errors.push(format!("could not parse date '{raw}'")),
                }
            }
            parsed.sort();
            parsed.dedup();
            parsed
        }
    };

    if errors.is_empty() && expanded.is_empty() {
        errors.push("you must provide at least 1 date".to_string());
    }
    if !errors.is_empty() {
        return Err(EngineError::InvalidInput(errors));
    }
    Ok(expanded)
}

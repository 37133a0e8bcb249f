//! Minimal exchange-session calendars used for gap classification
//! (spec §4.2). Only the session predicate is modeled: whether a given
//! UTC calendar day is a trading session for the named calendar. There is
//! no holiday table; `crypto_24_7` has a session every day and `nyse`
//! treats all non-weekend days as sessions. This is enough to separate
//! `expected_closures` (weekends) from `unexpected_gaps` (missing
//! weekday data) without pulling in an exchange-calendar crate the rest
//! of the corpus never reaches for.

use chrono::{Datelike, NaiveDate, Weekday};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarId {
    Nyse,
    Crypto247,
}

impl CalendarId {
    pub fn parse(id: &str) -> Option<Self> {
        match id.to_ascii_lowercase().as_str() {
            "nyse" => Some(Self::Nyse),
            "crypto_24_7" | "crypto" => Some(Self::Crypto247),
            _ => None,
        }
    }

    pub fn is_session(&self, day: NaiveDate) -> bool {
        match self {
            Self::Crypto247 => true,
            Self::Nyse => !matches!(day.weekday(), Weekday::Sat | Weekday::Sun),
        }
    }
}

/// Classify the span `[first, last]` (inclusive, by calendar day) against
/// `calendar`: `expected_closures` = non-session days in the span,
/// `unexpected_gaps` = session days in the span that aren't in `present_days`.
pub fn classify_gaps(
    calendar: CalendarId,
    first: NaiveDate,
    last: NaiveDate,
    present_days: &std::collections::BTreeSet<NaiveDate>,
) -> (u64, u64) {
    if last < first {
        return (0, 0);
    }
    let mut expected_closures = 0u64;
    let mut unexpected_gaps = 0u64;
    let mut day = first;
    loop {
        if calendar.is_session(day) {
            if !present_days.contains(&day) {
                unexpected_gaps += 1;
            }
        } else {
            expected_closures += 1;
        }
        if day == last {
            break;
        }
        day = day.succ_opt().expect("calendar day overflow");
    }
    (expected_closures, unexpected_gaps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekend_only_range_is_all_expected_closures() {
        let sat = NaiveDate::from_ymd_opt(2026, 7, 25).unwrap();
        let sun = NaiveDate::from_ymd_opt(2026, 7, 26).unwrap();
        let present = std::collections::BTreeSet::new();
        let (expected, unexpected) = classify_gaps(CalendarId::Nyse, sat, sun, &present);
        assert_eq!(expected, 2);
        assert_eq!(unexpected, 0);
    }

    #[test]
    fn missing_weekday_is_unexpected_gap() {
        let mon = NaiveDate::from_ymd_opt(2026, 7, 20).unwrap();
        let tue = NaiveDate::from_ymd_opt(2026, 7, 21).unwrap();
        let mut present = std::collections::BTreeSet::new();
        present.insert(mon);
        let (expected, unexpected) = classify_gaps(CalendarId::Nyse, mon, tue, &present);
        assert_eq!(expected, 0);
        assert_eq!(unexpected, 1);
    }

    #[test]
    fn crypto_calendar_has_no_closures() {
        let mon = NaiveDate::from_ymd_opt(2026, 7, 20).unwrap();
        let sun = NaiveDate::from_ymd_opt(2026, 7, 26).unwrap();
        let present = std::collections::BTreeSet::new();
        let (expected, unexpected) = classify_gaps(CalendarId::Crypto247, mon, sun, &present);
        assert_eq!(expected, 0);
        assert_eq!(unexpected, 7);
    }
}

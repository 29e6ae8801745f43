//! Free-text and date-range narrowing, then chronological ordering.
//!
//! Everything here is a pure function of its inputs, so the same list and
//! parameters always come back in the same order.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::models::{Event, Subscriber, Ticket, UserSummary};

/// Anything that can be matched against a lowercase search needle.
pub trait Searchable {
    fn matches_text(&self, needle: &str) -> bool;
}

/// An item with a title, optional description and an optional relevant date.
pub trait Listing: Searchable {
    /// Whether an item without a date fails an active date bound.
    const UNDATED_FAILS_BOUNDS: bool;

    fn listing_date(&self) -> Option<DateTime<Utc>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FilterParams {
    #[serde(default, rename = "q")]
    pub search_text: Option<String>,
    #[serde(default, rename = "from")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, rename = "to")]
    pub end_date: Option<NaiveDate>,
}

impl FilterParams {
    fn needle(&self) -> Option<String> {
        self.search_text
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    fn has_date_bound(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }

    fn date_in_range(&self, date: DateTime<Utc>) -> bool {
        let day = date.date_naive();
        self.start_date.map_or(true, |start| day >= start)
            && self.end_date.map_or(true, |end| day <= end)
    }
}

pub fn filter_and_sort<T: Listing>(items: Vec<T>, params: &FilterParams) -> Vec<T> {
    let needle = params.needle();
    let mut kept: Vec<T> = items
        .into_iter()
        .filter(|item| needle.as_deref().map_or(true, |n| item.matches_text(n)))
        .filter(|item| {
            if !params.has_date_bound() {
                return true;
            }
            match item.listing_date() {
                Some(date) => params.date_in_range(date),
                None => !T::UNDATED_FAILS_BOUNDS,
            }
        })
        .collect();
    // Stable: equal and missing dates keep their input order.
    kept.sort_by(|a, b| compare_dates(a.listing_date(), b.listing_date()));
    kept
}

/// Text-only narrowing that preserves input order.
pub fn search<T: Searchable + Clone>(items: &[T], search_text: Option<&str>) -> Vec<T> {
    let needle = search_text
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    match needle {
        None => items.to_vec(),
        Some(needle) => items
            .iter()
            .filter(|item| item.matches_text(&needle))
            .cloned()
            .collect(),
    }
}

fn compare_dates(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn contains(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(needle))
}

impl Searchable for Ticket {
    fn matches_text(&self, needle: &str) -> bool {
        contains(Some(&self.title), needle) || contains(self.description.as_deref(), needle)
    }
}

impl Listing for Ticket {
    const UNDATED_FAILS_BOUNDS: bool = true;

    fn listing_date(&self) -> Option<DateTime<Utc>> {
        self.event_date
    }
}

impl Searchable for Event {
    fn matches_text(&self, needle: &str) -> bool {
        contains(Some(&self.title), needle) || contains(self.description.as_deref(), needle)
    }
}

impl Listing for Event {
    const UNDATED_FAILS_BOUNDS: bool = false;

    fn listing_date(&self) -> Option<DateTime<Utc>> {
        self.start_date
    }
}

impl Searchable for UserSummary {
    fn matches_text(&self, needle: &str) -> bool {
        contains(Some(&self.email), needle) || contains(self.display_name.as_deref(), needle)
    }
}

impl Searchable for Subscriber {
    fn matches_text(&self, needle: &str) -> bool {
        contains(Some(&self.email), needle)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn event(id: &str, title: &str, date: Option<(i32, u32, u32)>) -> Event {
        Event {
            id: id.to_string(),
            title: title.to_string(),
            description: None,
            category: None,
            venue: None,
            start_date: date.map(|(y, m, d)| Utc.with_ymd_and_hms(y, m, d, 20, 0, 0).unwrap()),
        }
    }

    fn ids(events: &[Event]) -> Vec<&str> {
        events.iter().map(|e| e.id.as_str()).collect()
    }

    fn sample() -> Vec<Event> {
        vec![
            event("undated-1", "Jazz night", None),
            event("june", "Rock Fest", Some((2024, 6, 1))),
            event("may-a", "Opera", Some((2024, 5, 1))),
            event("undated-2", "Poetry", None),
            event("may-b", "Ballet", Some((2024, 5, 1))),
        ]
    }

    #[test]
    fn test_no_params_sorts_by_date_with_undated_last() {
        let sorted = filter_and_sort(sample(), &FilterParams::default());
        assert_eq!(ids(&sorted), vec!["may-a", "may-b", "june", "undated-1", "undated-2"]);
    }

    #[test]
    fn test_filter_and_sort_is_idempotent() {
        let params = FilterParams {
            search_text: Some("e".to_string()),
            start_date: NaiveDate::from_ymd_opt(2024, 5, 1),
            end_date: None,
        };
        let once = filter_and_sort(sample(), &params);
        let twice = filter_and_sort(once.clone(), &params);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_search_is_case_insensitive_over_title_and_description() {
        let mut items = sample();
        items[3].description = Some("An evening of SPOKEN word".to_string());
        let params = FilterParams {
            search_text: Some("  spoken ".to_string()),
            ..FilterParams::default()
        };
        assert_eq!(ids(&filter_and_sort(items.clone(), &params)), vec!["undated-2"]);

        let params = FilterParams {
            search_text: Some("ROCK".to_string()),
            ..FilterParams::default()
        };
        assert_eq!(ids(&filter_and_sort(items, &params)), vec!["june"]);
    }

    #[test]
    fn test_date_bounds_are_inclusive_and_keep_undated_events() {
        let params = FilterParams {
            search_text: None,
            start_date: NaiveDate::from_ymd_opt(2024, 5, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 5, 1),
        };
        let result = filter_and_sort(sample(), &params);
        assert_eq!(ids(&result), vec!["may-a", "may-b", "undated-1", "undated-2"]);
    }

    #[test]
    fn test_open_ended_bound() {
        let params = FilterParams {
            search_text: None,
            start_date: None,
            end_date: NaiveDate::from_ymd_opt(2024, 5, 31),
        };
        let result = filter_and_sort(sample(), &params);
        assert_eq!(ids(&result), vec!["may-a", "may-b", "undated-1", "undated-2"]);
    }

    #[test]
    fn test_search_helper_preserves_order() {
        let items = sample();
        let found = search(&items, Some("o"));
        assert_eq!(ids(&found), vec!["june", "may-a", "undated-2"]);
        assert_eq!(search(&items, Some("   ")).len(), items.len());
    }
}

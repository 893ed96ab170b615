//! Read-only views derived from the entry collection.
//!
//! Everything here is a pure function of `today` and the entries.

use chrono::{Days, NaiveDate};

use super::types::{Entry, Mood, MoodFilter};

/// Number of days shown in the insights window.
pub const INSIGHT_DAYS: u64 = 7;

/// Hard stop for streak counting.
const STREAK_LIMIT: u64 = 1000;

/// Entries whose note or tags contain `query` (case-insensitive) and whose
/// mood passes `mood`.
pub fn filter<'a>(entries: &'a [Entry], query: &str, mood: MoodFilter) -> Vec<&'a Entry> {
  let query = query.to_lowercase();

  entries
    .iter()
    .filter(|e| matches_query(e, &query) && mood.matches(e.mood))
    .collect()
}

fn matches_query(entry: &Entry, query_lower: &str) -> bool {
  query_lower.is_empty()
    || entry.note.to_lowercase().contains(query_lower)
    || entry.tags.join(" ").to_lowercase().contains(query_lower)
}

/// One day in the insights window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayMood {
  pub date: NaiveDate,
  pub mood: Option<Mood>,
}

/// The last `n` days ending with `today`, oldest first.
///
/// When several entries share a date, the one updated most recently wins;
/// equal timestamps go to the entry seen last.
pub fn last_days(entries: &[Entry], today: NaiveDate, n: u64) -> Vec<DayMood> {
  (0..n)
    .rev()
    .filter_map(|offset| today.checked_sub_days(Days::new(offset)))
    .map(|date| {
      let winner = entries
        .iter()
        .filter(|e| e.date == date)
        .reduce(|best, e| if e.updated_at >= best.updated_at { e } else { best });
      DayMood {
        date,
        mood: winner.map(|e| e.mood),
      }
    })
    .collect()
}

/// Consecutive days, ending today, with at least one entry.
pub fn streak(entries: &[Entry], today: NaiveDate) -> u32 {
  let mut count = 0;

  for offset in 0..STREAK_LIMIT {
    let Some(date) = today.checked_sub_days(Days::new(offset)) else {
      break;
    };
    if !entries.iter().any(|e| e.date == date) {
      break;
    }
    count += 1;
  }

  count
}

/// Days per mood within `days`, in canonical mood order.
pub fn mood_totals(days: &[DayMood]) -> Vec<(Mood, usize)> {
  Mood::ALL
    .into_iter()
    .map(|mood| {
      let count = days.iter().filter(|d| d.mood == Some(mood)).count();
      (mood, count)
    })
    .collect()
}

/// Everything the insights screen shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insights {
  pub days: Vec<DayMood>,
  pub streak: u32,
  pub totals: Vec<(Mood, usize)>,
}

impl Insights {
  pub fn compute(entries: &[Entry], today: NaiveDate) -> Self {
    let days = last_days(entries, today, INSIGHT_DAYS);
    let totals = mood_totals(&days);
    Self {
      streak: streak(entries, today),
      days,
      totals,
    }
  }
}

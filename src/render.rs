//! Plain-text rendering of entries, insights and settings.

use std::fmt::Write;

use crate::journal::views::DayMood;
use crate::journal::{Entry, Insights, Settings};

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// One journal entry as shown in the list.
pub fn entry(entry: &Entry) -> String {
  let mut out = format!("{} {}  {}  [{}]", entry.mood.emoji(), entry.date, entry.mood.label(), entry.id);

  if !entry.tags.is_empty() {
    let tags: Vec<String> = entry.tags.iter().map(|t| format!("#{}", t)).collect();
    let _ = write!(out, "\n    {}", tags.join(" "));
  }
  if !entry.note.is_empty() {
    for line in entry.note.lines() {
      let _ = write!(out, "\n    {}", truncate(line, 120));
    }
  }
  out
}

pub fn entry_list(entries: &[&Entry]) -> String {
  if entries.is_empty() {
    return "No entries yet.".to_string();
  }
  entries.iter().map(|e| entry(e)).collect::<Vec<_>>().join("\n")
}

fn day_cell(day: &DayMood) -> String {
  let mark = day.mood.map(|m| m.emoji()).unwrap_or("–");
  format!("{} {}", day.date.format("%m-%d"), mark)
}

pub fn insights(insights: &Insights) -> String {
  let mut out = String::from("Last 7 Days\n  ");
  out.push_str(&insights.days.iter().map(day_cell).collect::<Vec<_>>().join("  "));

  let plural = if insights.streak == 1 { "" } else { "s" };
  let _ = write!(out, "\n\nStreak\n  {} day{}", insights.streak, plural);
  out.push_str("\n  Days in a row with at least one entry.");

  out.push_str("\n\nMood Totals (7 days)\n  ");
  let totals: Vec<String> = insights
    .totals
    .iter()
    .map(|(mood, count)| format!("{} {}: {}", mood.emoji(), mood.label(), count))
    .collect();
  out.push_str(&totals.join("  "));
  out
}

pub fn settings(settings: &Settings) -> String {
  settings
    .iter()
    .map(|(k, v)| format!("{} = {}", k, v))
    .collect::<Vec<_>>()
    .join("\n")
}

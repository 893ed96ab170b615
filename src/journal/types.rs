use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Subjective daily state, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
  Great,
  Good,
  Meh,
  Bad,
  Awful,
}

impl Mood {
  pub const ALL: [Mood; 5] = [Mood::Great, Mood::Good, Mood::Meh, Mood::Bad, Mood::Awful];

  pub fn key(self) -> &'static str {
    match self {
      Mood::Great => "great",
      Mood::Good => "good",
      Mood::Meh => "meh",
      Mood::Bad => "bad",
      Mood::Awful => "awful",
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      Mood::Great => "Great",
      Mood::Good => "Good",
      Mood::Meh => "Meh",
      Mood::Bad => "Bad",
      Mood::Awful => "Awful",
    }
  }

  pub fn emoji(self) -> &'static str {
    match self {
      Mood::Great => "😄",
      Mood::Good => "🙂",
      Mood::Meh => "😐",
      Mood::Bad => "🙁",
      Mood::Awful => "😣",
    }
  }
}

impl fmt::Display for Mood {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.emoji(), self.label())
  }
}

impl FromStr for Mood {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let lower = s.trim().to_lowercase();
    Mood::ALL
      .into_iter()
      .find(|m| m.key() == lower)
      .ok_or_else(|| format!("unknown mood '{}' (expected great, good, meh, bad or awful)", s))
  }
}

/// Mood selector for list filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoodFilter {
  #[default]
  All,
  Only(Mood),
}

impl MoodFilter {
  pub fn matches(self, mood: Mood) -> bool {
    match self {
      MoodFilter::All => true,
      MoodFilter::Only(m) => m == mood,
    }
  }
}

impl FromStr for MoodFilter {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s.trim().eq_ignore_ascii_case("all") {
      Ok(MoodFilter::All)
    } else {
      s.parse().map(MoodFilter::Only)
    }
  }
}

/// One mood-journal record for a specific date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
  pub id: String,
  pub date: NaiveDate,
  pub mood: Mood,
  #[serde(default)]
  pub note: String,
  #[serde(default)]
  pub tags: Vec<String>,
  #[serde(with = "timestamp")]
  pub created_at: DateTime<Utc>,
  #[serde(with = "timestamp")]
  pub updated_at: DateTime<Utc>,
  /// Fields this version does not know about, carried through unchanged.
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Timestamps are written with millisecond precision and a `Z` suffix,
/// e.g. `2024-01-01T08:00:00.000Z`.
mod timestamp {
  use chrono::{DateTime, SecondsFormat, Utc};
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    DateTime::<Utc>::deserialize(deserializer)
  }
}

impl Entry {
  /// Create a fresh entry with a random id.
  pub fn new(date: NaiveDate, mood: Mood, note: &str, tags: Vec<String>, now: DateTime<Utc>) -> Self {
    Self {
      id: new_id(),
      date,
      mood,
      note: note.trim().to_string(),
      tags,
      created_at: now,
      updated_at: now,
      extra: Map::new(),
    }
  }

  /// Copy of this entry with new content; keeps id and creation time.
  pub fn revised(
    &self,
    date: NaiveDate,
    mood: Mood,
    note: &str,
    tags: Vec<String>,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      id: self.id.clone(),
      date,
      mood,
      note: note.trim().to_string(),
      tags,
      created_at: self.created_at,
      updated_at: now,
      extra: self.extra.clone(),
    }
  }
}

fn new_id() -> String {
  uuid::Uuid::new_v4().simple().to_string()
}

/// Parse a comma separated tag list, dropping empty pieces.
pub fn parse_tags(input: &str) -> Vec<String> {
  input
    .split(',')
    .map(str::trim)
    .filter(|t| !t.is_empty())
    .map(String::from)
    .collect()
}

pub const ENABLE_HINTS: &str = "enableHints";
pub const START_WEEK_ON_MONDAY: &str = "startWeekOnMonday";

/// User preferences. Unknown keys are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(Map<String, Value>);

impl Default for Settings {
  fn default() -> Self {
    let mut map = Map::new();
    map.insert(ENABLE_HINTS.to_string(), Value::Bool(true));
    map.insert(START_WEEK_ON_MONDAY.to_string(), Value::Bool(false));
    Settings(map)
  }
}

impl Settings {
  /// Shallow-merge `partial` over the current values.
  pub fn merge(&mut self, partial: Map<String, Value>) {
    self.0.extend(partial);
  }

  pub fn enable_hints(&self) -> bool {
    self.flag(ENABLE_HINTS)
  }

  #[allow(dead_code)]
  pub fn start_week_on_monday(&self) -> bool {
    self.flag(START_WEEK_ON_MONDAY)
  }

  #[allow(dead_code)]
  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
    self.0.iter()
  }

  // Truthiness of the stored value; non-bool values count as set when non-null.
  fn flag(&self, key: &str) -> bool {
    match self.0.get(key) {
      Some(Value::Bool(b)) => *b,
      Some(Value::Null) | None => false,
      Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
      Some(Value::String(s)) => !s.is_empty(),
      Some(_) => true,
    }
  }
}

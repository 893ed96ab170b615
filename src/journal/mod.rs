//! The local mood journal: entries, settings and the views derived from them.

pub mod store;
pub mod transfer;
pub mod types;
pub mod views;

pub use store::{EntryStore, SettingsStore};
pub use types::{parse_tags, Entry, Mood, MoodFilter, Settings};
pub use views::Insights;

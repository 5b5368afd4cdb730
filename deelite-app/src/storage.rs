//! Local cache for the daily lesson, so one lesson is shown per calendar day.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, Utc};
use deelite_core::DailyLesson;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedLesson {
    pub date: NaiveDate,
    pub fetched_at: DateTime<Utc>,
    pub lesson: DailyLesson,
}

pub struct LessonStore {
    path: PathBuf,
}

impl LessonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("lesson.json"))
    }

    /// The cached lesson if it was fetched on `today`.
    pub fn lesson_for(&self, today: NaiveDate) -> Option<DailyLesson> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let cached: CachedLesson = match serde_json::from_str(&raw) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %self.path.display(), "ignoring malformed lesson cache: {e}");
                return None;
            }
        };
        if cached.date != today {
            debug!(cached = %cached.date, %today, "lesson cache is stale");
            return None;
        }
        Some(cached.lesson)
    }

    /// Fallback lessons are never cached so the next run retries the model.
    pub fn store(&self, today: NaiveDate, lesson: &DailyLesson) -> std::io::Result<()> {
        if *lesson == DailyLesson::fallback() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let cached = CachedLesson {
            date: today,
            fetched_at: Utc::now(),
            lesson: lesson.clone(),
        };
        let json = serde_json::to_string_pretty(&cached).map_err(std::io::Error::other)?;
        fs::write(&self.path, json)
    }
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

use chrono::{DateTime, Duration, Utc};

use crate::db::Source;
use crate::feed::FeedItem;

pub const MIN_SCORE: i64 = 0;
pub const MAX_SCORE: i64 = 100;

/// Relevance policy applied to each newly admitted item.
///
/// Scores depend on `now`, so the same item scored at different times can differ.
pub trait Scorer: Send + Sync {
    fn score(&self, item: &FeedItem, source: &Source, now: DateTime<Utc>) -> i64;
}

/// Base score plus a freshness bonus for items published in the last day or week.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecencyScorer;

impl RecencyScorer {
    const BASE: i64 = 50;
    const DAY_BONUS: i64 = 20;
    const WEEK_BONUS: i64 = 10;
}

impl Scorer for RecencyScorer {
    fn score(&self, item: &FeedItem, _source: &Source, now: DateTime<Utc>) -> i64 {
        let mut score = Self::BASE;

        if let Some(published) = item.published_at {
            let age = now - published;
            if age < Duration::hours(24) {
                score += Self::DAY_BONUS;
            } else if age < Duration::hours(168) {
                score += Self::WEEK_BONUS;
            }
        }

        score.clamp(MIN_SCORE, MAX_SCORE)
    }
}

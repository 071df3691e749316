use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::feed::FeedItem;

/// Per-source admission policy, stored as JSON text on the source row.
///
/// Keyword lists are OR-matched as case-insensitive substrings. Empty or
/// absent criteria impose no constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRules {
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty",
        alias = "title_includes"
    )]
    pub title_includes: Vec<String>,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty",
        alias = "title_excludes"
    )]
    pub title_excludes: Vec<String>,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty",
        alias = "description_includes"
    )]
    pub description_includes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "published_after")]
    pub published_after: Option<String>,
    /// Reserved; video length is not known at ingest time.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "min_duration")]
    pub min_duration: Option<i64>,
    /// Reserved; video length is not known at ingest time.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "max_duration")]
    pub max_duration: Option<i64>,
}

impl FilterRules {
    /// Parse the stored JSON text. A missing value means "no rules".
    pub fn from_json(raw: Option<&str>) -> serde_json::Result<Self> {
        match raw {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw),
            _ => Ok(Self::default()),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Lower bound for publish dates. Accepts RFC 3339 timestamps or plain
    /// `YYYY-MM-DD` dates (midnight UTC); anything else is ignored.
    pub fn published_after_bound(&self) -> Option<DateTime<Utc>> {
        let raw = self.published_after.as_deref()?.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }

        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    /// Whether `item` is admitted under these rules.
    pub fn passes(&self, item: &FeedItem) -> bool {
        let title = item.title.as_deref().unwrap_or("").to_lowercase();
        let content = item.content_snippet.as_deref().unwrap_or("").to_lowercase();

        if !self.title_includes.is_empty() && !contains_any(&title, &self.title_includes) {
            return false;
        }

        if !self.title_excludes.is_empty() && contains_any(&title, &self.title_excludes) {
            return false;
        }

        if !self.description_includes.is_empty()
            && !contains_any(&content, &self.description_includes)
        {
            return false;
        }

        if let (Some(bound), Some(published)) = (self.published_after_bound(), item.published_at) {
            if published < bound {
                return false;
            }
        }

        true
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// `haystack` must already be lowercased.
fn contains_any(haystack: &str, keywords: &[String]) -> bool {
    keywords
        .iter()
        .any(|keyword| haystack.contains(&keyword.to_lowercase()))
}

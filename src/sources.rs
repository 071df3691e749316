use std::fmt;
use std::str::FromStr;

/// The kinds of external feed a source can point at.
///
/// The meaning of a source's `identifier` depends on its kind: a channel id
/// for YouTube, a feed URL for RSS. It is never reinterpreted across kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    YouTube,
    Rss,
    HackerNews,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [SourceKind::YouTube, SourceKind::Rss, SourceKind::HackerNews];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::YouTube => "youtube",
            SourceKind::Rss => "rss",
            SourceKind::HackerNews => "hackernews",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported source type: {0}")]
pub struct UnknownSourceKind(pub String);

impl FromStr for SourceKind {
    type Err = UnknownSourceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownSourceKind(s.to_string()))
    }
}

/// Channel RSS URL for a YouTube channel id, e.g.
/// `https://www.youtube.com/feeds/videos.xml?channel_id=UC...`
pub fn youtube_feed_url(base: &str, channel_id: &str) -> String {
    format!("{}?channel_id={}", base, channel_id)
}

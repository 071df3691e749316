use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

pub const UNTITLED: &str = "Untitled";

/// One entry of a parsed feed, normalized before it reaches the ingestion pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub content_snippet: Option<String>,
}

impl FeedItem {
    pub fn title_or_default(&self) -> &str {
        self.title.as_deref().unwrap_or(UNTITLED)
    }

    /// Dedup key half contributed by the item. Link-less items all map to `""`.
    pub fn dedup_url(&self) -> &str {
        self.link.as_deref().unwrap_or("")
    }

    pub fn from_entry(entry: Entry) -> Self {
        let title = entry
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty());

        let link = entry
            .links
            .into_iter()
            .next()
            .map(|l| l.href)
            .filter(|href| !href.is_empty());

        let published_at = entry.published.or(entry.updated);

        // Prefer the short summary, then the full body, then media descriptions
        // (YouTube puts the video description in media:group).
        let content_snippet = entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body))
            .or_else(|| {
                entry
                    .media
                    .into_iter()
                    .find_map(|m| m.description.map(|d| d.content))
            })
            .map(|text| strip_tags(&text))
            .filter(|text| !text.is_empty());

        Self {
            title,
            link,
            published_at,
            content_snippet,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Feed responded with status {0}")]
    Status(StatusCode),

    #[error("Failed to parse feed: {0}")]
    Parse(#[from] parser::ParseFeedError),
}

/// Fetches a feed document and parses it into items.
#[async_trait]
pub trait FeedClient: Send + Sync {
    async fn fetch_feed(&self, url: &str) -> Result<Vec<FeedItem>, FetchError>;
}

pub struct HttpFeedClient {
    client: Client,
}

impl HttpFeedClient {
    pub fn new(timeout: Duration, user_agent: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    async fn fetch_feed(&self, url: &str) -> Result<Vec<FeedItem>, FetchError> {
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status()));
        }
        let bytes = response.bytes().await?;

        parse_feed(&bytes)
    }
}

/// Parse an RSS/Atom document, keeping the feed's own item order.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedItem>, FetchError> {
    let parsed = parser::parse(bytes)?;
    Ok(parsed.entries.into_iter().map(FeedItem::from_entry).collect())
}

/// Drop markup, decode entities and collapse whitespace so snippets read as
/// plain text.
pub fn strip_tags(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;

    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    html_escape::decode_html_entities(&text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::db::{Database, NewPost, Source};
use crate::feed::{FeedClient, FeedItem, FetchError};
use crate::filter::FilterRules;
use crate::scoring::Scorer;
use crate::sources::{youtube_feed_url, SourceKind, UnknownSourceKind};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    UnsupportedSourceType(#[from] UnknownSourceKind),

    #[error("Invalid filter rules on source {source_id}: {error}")]
    InvalidFilterRules {
        source_id: i64,
        #[source]
        error: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Polls sources and stores their new items as posts.
///
/// Sources are processed one at a time, and items within a source in feed
/// order. The existence check and the insert for an item are separate
/// statements, so two concurrent fetches of the same source can both insert
/// the same (source id, url).
pub struct Fetcher {
    db: Arc<Database>,
    client: Arc<dyn FeedClient>,
    scorer: Arc<dyn Scorer>,
    youtube_feed_url: String,
    refreshing: Arc<AtomicBool>,
}

impl Fetcher {
    pub fn new(
        db: Arc<Database>,
        client: Arc<dyn FeedClient>,
        scorer: Arc<dyn Scorer>,
        youtube_feed_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            client,
            scorer,
            youtube_feed_url: youtube_feed_url.into(),
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    /// Run [`Fetcher::fetch_all_sources`] unless a batch is already running.
    /// Returns `false` when skipped.
    ///
    /// The flag is cleared when the batch finishes or when this future is
    /// dropped part way through.
    pub async fn refresh_all(&self) -> Result<bool, IngestError> {
        let Some(_guard) = RefreshGuard::acquire(&self.refreshing) else {
            info!("Refresh already in progress, skipping");
            return Ok(false);
        };

        self.fetch_all_sources().await.map(|_| true)
    }

    /// Fetch every active source. A failing source is logged and skipped;
    /// only failing to list the sources is an error.
    pub async fn fetch_all_sources(&self) -> Result<(), IngestError> {
        info!("Starting fetch of all sources");

        let sources = self.db.list_active_sources().await?;

        for source in &sources {
            if let Err(e) = self.fetch_source(source).await {
                error!("Failed to fetch source '{}': {}", source.name, e);
            }
        }

        info!("Completed fetch for {} sources", sources.len());
        Ok(())
    }

    /// Fetch one source and return how many new posts were stored.
    pub async fn fetch_source(&self, source: &Source) -> Result<i64, IngestError> {
        info!("Fetching source: {} ({})", source.name, source.source_type);

        let kind: SourceKind = source.source_type.parse()?;

        match kind {
            SourceKind::YouTube => {
                let url = youtube_feed_url(&self.youtube_feed_url, &source.identifier);
                self.ingest(source, kind, &url).await
            }
            SourceKind::Rss => self.ingest(source, kind, &source.identifier).await,
            SourceKind::HackerNews => {
                warn!(
                    "Hacker News fetching is not implemented yet, skipping '{}'",
                    source.name
                );
                Ok(0)
            }
        }
    }

    async fn ingest(&self, source: &Source, kind: SourceKind, url: &str) -> Result<i64, IngestError> {
        let items = self.client.fetch_feed(url).await?;
        let source_id = source.id.to_string();
        let mut rules: Option<FilterRules> = None;
        let mut new_posts = 0;

        for item in items {
            if self.db.post_exists(&source_id, item.dedup_url()).await? {
                continue;
            }

            if !source.fetch_all {
                // Parsed on the first new item only.
                if rules.is_none() {
                    let parsed = FilterRules::from_json(source.filter_rules.as_deref()).map_err(
                        |error| IngestError::InvalidFilterRules {
                            source_id: source.id,
                            error,
                        },
                    )?;
                    rules = Some(parsed);
                }
                if let Some(rules) = &rules {
                    if !rules.passes(&item) {
                        debug!("Filtered out '{}' from {}", item.title_or_default(), source.name);
                        continue;
                    }
                }
            }

            let now = Utc::now();
            let score = self.scorer.score(&item, source, now);
            let duration = match kind {
                SourceKind::YouTube => video_duration(&item),
                _ => None,
            };

            self.db
                .insert_post(&NewPost {
                    title: item.title_or_default().to_string(),
                    url: item.link.clone(),
                    source: source.name.clone(),
                    source_type: kind.to_string(),
                    source_id: source_id.clone(),
                    content: item.content_snippet.clone(),
                    duration,
                    published_at: item.published_at.unwrap_or(now),
                    score,
                    filtered: !source.fetch_all,
                })
                .await?;

            new_posts += 1;
        }

        self.db.mark_source_fetched(source.id, new_posts).await?;

        info!("Fetched {} new posts from {}", new_posts, source.name);
        Ok(new_posts)
    }
}

/// Holds the refresh flag; releases it on drop.
struct RefreshGuard<'a>(&'a AtomicBool);

impl<'a> RefreshGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Video length in seconds.
///
/// Channel feeds do not carry durations; resolving them needs a separate
/// API lookup that is not wired up, so this is always unknown for now.
pub fn video_duration(_item: &FeedItem) -> Option<i64> {
    None
}

pub async fn start_background_refresh(fetcher: Arc<Fetcher>, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes * 60);

    info!("Starting initial source fetch");
    if let Err(e) = fetcher.refresh_all().await {
        error!("Initial source fetch failed: {}", e);
    }

    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled source fetch");
        if let Err(e) = fetcher.refresh_all().await {
            error!("Scheduled source fetch failed: {}", e);
        }
    }
}

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

use crate::config::SourceConfig;

/// A configured external feed.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: i64,
    pub name: String,
    /// Stored as free text; only `youtube`, `rss` and `hackernews` can be fetched.
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub source_type: String,
    pub identifier: String,
    pub active: bool,
    pub fetch_all: bool,
    /// JSON-encoded `FilterRules`
    pub filter_rules: Option<String>,
    pub last_fetched: Option<String>,
    pub last_fetch_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// A stored item derived from one feed entry.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub url: Option<String>,
    /// Source display name, copied at insert time
    pub source: String,
    pub source_type: String,
    pub source_id: String,
    pub content: Option<String>,
    /// Seconds; video sources only
    pub duration: Option<i64>,
    pub published_at: Option<String>,
    pub score: i64,
    /// Set when the post was admitted with filtering active
    pub filtered: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewSource {
    pub name: String,
    pub source_type: String,
    pub identifier: String,
    pub fetch_all: bool,
    pub filter_rules: Option<String>,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct SourceUpdate {
    pub name: Option<String>,
    pub active: Option<bool>,
    pub fetch_all: Option<bool>,
    pub filter_rules: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub url: Option<String>,
    pub source: String,
    pub source_type: String,
    pub source_id: String,
    pub content: Option<String>,
    pub duration: Option<i64>,
    pub published_at: DateTime<Utc>,
    pub score: i64,
    pub filtered: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PostSort {
    #[default]
    Score,
    CreatedAt,
    Title,
}

impl PostSort {
    fn column(&self) -> &'static str {
        match self {
            PostSort::Score => "score",
            PostSort::CreatedAt => "created_at",
            PostSort::Title => "title",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Fixed-width UTC timestamps so stored values sort lexicographically.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Every connection to `sqlite::memory:` is its own database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                type TEXT NOT NULL,
                identifier TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                fetch_all INTEGER NOT NULL DEFAULT 1,
                filter_rules TEXT,
                last_fetched TEXT,
                last_fetch_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                url TEXT,
                source TEXT NOT NULL,
                source_type TEXT NOT NULL,
                source_id TEXT NOT NULL,
                content TEXT,
                duration INTEGER,
                published_at TEXT,
                score INTEGER NOT NULL DEFAULT 0,
                filtered INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Lookup index for the (source_id, url) dedup check. Deliberately not UNIQUE.
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_posts_source_url
            ON posts(source_id, url)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Sources

    pub async fn list_sources(&self) -> anyhow::Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>("SELECT * FROM sources ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(sources)
    }

    pub async fn list_active_sources(&self) -> anyhow::Result<Vec<Source>> {
        let sources =
            sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE active = 1 ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        Ok(sources)
    }

    pub async fn get_source(&self, source_id: i64) -> anyhow::Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = ?")
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(source)
    }

    pub async fn create_source(&self, new: &NewSource) -> anyhow::Result<Source> {
        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            r#"
            INSERT INTO sources (name, type, identifier, fetch_all, filter_rules, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(&new.source_type)
        .bind(&new.identifier)
        .bind(new.fetch_all)
        .bind(&new.filter_rules)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_source(result.last_insert_rowid())
            .await?
            .ok_or_else(|| anyhow::anyhow!("Source vanished after insert"))
    }

    pub async fn update_source(
        &self,
        source_id: i64,
        update: &SourceUpdate,
    ) -> anyhow::Result<Option<Source>> {
        let result = sqlx::query(
            r#"
            UPDATE sources
            SET name = COALESCE(?, name),
                active = COALESCE(?, active),
                fetch_all = COALESCE(?, fetch_all),
                filter_rules = COALESCE(?, filter_rules),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&update.name)
        .bind(update.active)
        .bind(update.fetch_all)
        .bind(&update.filter_rules)
        .bind(format_timestamp(Utc::now()))
        .bind(source_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_source(source_id).await
    }

    pub async fn delete_source(&self, source_id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(source_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert configured sources that are not registered yet, keyed by
    /// (type, identifier). Existing rows are left alone. Returns how many were added.
    pub async fn sync_sources(&self, configs: &[SourceConfig]) -> anyhow::Result<usize> {
        let mut added = 0;

        for config in configs {
            let (exists,): (bool,) = sqlx::query_as(
                "SELECT EXISTS(SELECT 1 FROM sources WHERE type = ? AND identifier = ?)",
            )
            .bind(&config.source_type)
            .bind(&config.identifier)
            .fetch_one(&self.pool)
            .await?;

            if exists {
                continue;
            }

            let filter_rules = config
                .filter_rules
                .as_ref()
                .map(|rules| rules.to_json())
                .transpose()?;

            self.create_source(&NewSource {
                name: config.name.clone(),
                source_type: config.source_type.clone(),
                identifier: config.identifier.clone(),
                fetch_all: config.fetch_all,
                filter_rules,
            })
            .await?;
            added += 1;
        }

        Ok(added)
    }

    /// Record a completed fetch.
    pub async fn mark_source_fetched(&self, source_id: i64, count: i64) -> anyhow::Result<()> {
        let now = format_timestamp(Utc::now());
        sqlx::query(
            r#"
            UPDATE sources
            SET last_fetched = ?, last_fetch_count = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(count)
        .bind(&now)
        .bind(source_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // Posts

    /// Whether a post with this (source_id, url) already exists. A stored
    /// NULL url matches `""`.
    pub async fn post_exists(&self, source_id: &str, url: &str) -> anyhow::Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM posts WHERE source_id = ? AND COALESCE(url, '') = ?)",
        )
        .bind(source_id)
        .bind(url)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    pub async fn insert_post(&self, post: &NewPost) -> anyhow::Result<i64> {
        let now = format_timestamp(Utc::now());
        let result = sqlx::query(
            r#"
            INSERT INTO posts (
                title, url, source, source_type, source_id, content, duration,
                published_at, score, filtered, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.source)
        .bind(&post.source_type)
        .bind(&post.source_id)
        .bind(&post.content)
        .bind(post.duration)
        .bind(format_timestamp(post.published_at))
        .bind(post.score)
        .bind(post.filtered)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_posts(&self, sort: PostSort, order: SortOrder) -> anyhow::Result<Vec<Post>> {
        let query = format!(
            "SELECT * FROM posts ORDER BY {} {}, id {}",
            sort.column(),
            order.keyword(),
            order.keyword()
        );
        let posts = sqlx::query_as::<_, Post>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(posts)
    }

    pub async fn get_post(&self, post_id: i64) -> anyhow::Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>("SELECT * FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(post)
    }

    /// Posts whose source name contains `name`, case-insensitively.
    pub async fn posts_by_source(&self, name: &str) -> anyhow::Result<Vec<Post>> {
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT * FROM posts
            WHERE source LIKE '%' || ? || '%'
            ORDER BY score DESC, id DESC
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    pub async fn top_posts(&self, threshold: i64) -> anyhow::Result<Vec<Post>> {
        let posts = sqlx::query_as::<_, Post>(
            "SELECT * FROM posts WHERE score >= ? ORDER BY score DESC, id DESC",
        )
        .bind(threshold)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    pub async fn count_posts_for_source(&self, source_id: &str) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

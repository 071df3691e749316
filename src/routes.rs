use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use crate::db::{parse_timestamp, Database, NewSource, Post, PostSort, SortOrder, SourceUpdate};
use crate::fetcher::Fetcher;
use crate::filter::FilterRules;
use crate::sources::SourceKind;

const DEFAULT_TOP_THRESHOLD: i64 = 80;
const SERVICE_NAME: &str = "b-random-server";

pub struct AppState {
    pub db: Arc<Database>,
    pub fetcher: Arc<Fetcher>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/posts", get(list_posts))
        .route("/posts/top", get(top_posts))
        .route("/posts/source/:source", get(posts_by_source))
        .route("/posts/:id", get(get_post))
        .route("/sources", get(list_sources).post(create_source))
        .route("/sources/:id", put(update_source).delete(delete_source))
        .route("/fetch/all", post(fetch_all))
        .route("/fetch/source/:id", post(fetch_source));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/refresh/status", get(refresh_status))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// Template structs
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub posts: Vec<PostView>,
    pub total: usize,
    pub search: String,
    pub sources: Vec<SelectOption>,
    pub sorts: Vec<SelectOption>,
    pub orders: Vec<SelectOption>,
}

pub struct PostView {
    pub title: String,
    pub url: Option<String>,
    pub source: String,
    pub content: Option<String>,
    pub score: i64,
    pub badge: &'static str,
    pub age: String,
}

pub struct SelectOption {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

impl SelectOption {
    fn new(value: &str, label: &str, current: &str) -> Self {
        Self {
            value: value.to_string(),
            label: label.to_string(),
            selected: value == current,
        }
    }
}

// Wrapper for HTML responses
struct HtmlTemplate<T>(T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

pub enum AppError {
    NotFound(&'static str),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::Internal(err) => {
                error!("Request failed: {:#}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };

        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self {
        AppError::Internal(err.into())
    }
}

// Route handlers
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "OK",
        "timestamp": crate::db::format_timestamp(Utc::now()),
        "service": SERVICE_NAME,
    }))
}

pub async fn refresh_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let refreshing = state.fetcher.is_refreshing();
    Json(json!({ "refreshing": refreshing }))
}

#[derive(Debug, Default, Deserialize)]
pub struct PostsQuery {
    #[serde(default)]
    pub sort: PostSort,
    #[serde(default)]
    pub order: SortOrder,
}

pub async fn list_posts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PostsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let posts = state.db.list_posts(query.sort, query.order).await?;
    Ok(Json(json!({
        "success": true,
        "count": posts.len(),
        "data": posts,
    })))
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    #[serde(default = "default_top_threshold")]
    pub threshold: i64,
}

fn default_top_threshold() -> i64 {
    DEFAULT_TOP_THRESHOLD
}

pub async fn top_posts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TopQuery>,
) -> Result<impl IntoResponse, AppError> {
    let posts = state.db.top_posts(query.threshold).await?;
    Ok(Json(json!({
        "success": true,
        "count": posts.len(),
        "threshold": query.threshold,
        "data": posts,
    })))
}

pub async fn posts_by_source(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let posts = state.db.posts_by_source(&source).await?;
    Ok(Json(json!({
        "success": true,
        "count": posts.len(),
        "source": source,
        "data": posts,
    })))
}

pub async fn get_post(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let post = state
        .db
        .get_post(post_id)
        .await?
        .ok_or(AppError::NotFound("Post"))?;
    Ok(Json(json!({ "success": true, "data": post })))
}

pub async fn list_sources(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let sources = state.db.list_sources().await?;
    Ok(Json(json!({
        "success": true,
        "count": sources.len(),
        "data": sources,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSourceRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub identifier: String,
    pub fetch_all: Option<bool>,
    pub filter_rules: Option<FilterRules>,
}

pub async fn create_source(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSourceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let kind: SourceKind = request
        .source_type
        .parse()
        .map_err(|e: crate::sources::UnknownSourceKind| AppError::BadRequest(e.to_string()))?;

    let filter_rules = request
        .filter_rules
        .map(|rules| rules.to_json())
        .transpose()?;

    let source = state
        .db
        .create_source(&NewSource {
            name: request.name,
            source_type: kind.to_string(),
            identifier: request.identifier,
            fetch_all: request.fetch_all.unwrap_or(true),
            filter_rules,
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": source,
        "message": "Source created successfully",
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSourceRequest {
    pub name: Option<String>,
    pub active: Option<bool>,
    pub fetch_all: Option<bool>,
    pub filter_rules: Option<FilterRules>,
}

pub async fn update_source(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<i64>,
    Json(request): Json<UpdateSourceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let update = SourceUpdate {
        name: request.name,
        active: request.active,
        fetch_all: request.fetch_all,
        filter_rules: request
            .filter_rules
            .map(|rules| rules.to_json())
            .transpose()?,
    };

    let source = state
        .db
        .update_source(source_id, &update)
        .await?
        .ok_or(AppError::NotFound("Source"))?;

    Ok(Json(json!({
        "success": true,
        "data": source,
        "message": "Source updated successfully",
    })))
}

pub async fn delete_source(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if !state.db.delete_source(source_id).await? {
        return Err(AppError::NotFound("Source"));
    }
    Ok(Json(json!({
        "success": true,
        "message": "Source deleted successfully",
    })))
}

pub async fn fetch_all(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let ran = state.fetcher.refresh_all().await?;
    let message = if ran {
        "All sources fetched successfully"
    } else {
        "A fetch is already in progress"
    };
    Ok(Json(json!({ "success": true, "message": message })))
}

pub async fn fetch_source(
    State(state): State<Arc<AppState>>,
    Path(source_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let source = state
        .db
        .get_source(source_id)
        .await?
        .ok_or(AppError::NotFound("Source"))?;

    let new_posts = state.fetcher.fetch_source(&source).await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Fetched {} new posts from {}", new_posts, source.name),
        "newPostsCount": new_posts,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct IndexQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub sort: PostSort,
    #[serde(default)]
    pub order: SortOrder,
}

pub async fn index(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IndexQuery>,
) -> Result<impl IntoResponse, AppError> {
    let posts = state.db.list_posts(query.sort, query.order).await?;
    let now = Utc::now();

    // Source names in order of first appearance
    let mut names: Vec<&str> = Vec::new();
    for post in &posts {
        if !names.contains(&post.source.as_str()) {
            names.push(&post.source);
        }
    }
    let selected = if query.source.is_empty() { "all" } else { query.source.as_str() };
    let mut sources = vec![SelectOption::new("all", "All Sources", selected)];
    sources.extend(names.iter().map(|name| SelectOption::new(name, name, selected)));

    let sort = match query.sort {
        PostSort::Score => "score",
        PostSort::CreatedAt => "createdAt",
        PostSort::Title => "title",
    };
    let sorts = vec![
        SelectOption::new("score", "Score", sort),
        SelectOption::new("createdAt", "Newest", sort),
        SelectOption::new("title", "Title", sort),
    ];

    let order = match query.order {
        SortOrder::Asc => "asc",
        SortOrder::Desc => "desc",
    };
    let orders = vec![
        SelectOption::new("desc", "Descending", order),
        SelectOption::new("asc", "Ascending", order),
    ];

    let visible: Vec<PostView> = posts
        .iter()
        .filter(|post| matches_search(post, &query.q))
        .filter(|post| selected == "all" || post.source == selected)
        .map(|post| PostView {
            title: post.title.clone(),
            url: post.url.as_deref().and_then(safe_link),
            source: post.source.clone(),
            content: post.content.clone(),
            score: post.score,
            badge: score_badge(post.score),
            age: parse_timestamp(&post.created_at)
                .map(|created| format_time_ago(created, now))
                .unwrap_or_default(),
        })
        .collect();

    Ok(HtmlTemplate(IndexTemplate {
        posts: visible,
        total: posts.len(),
        search: query.q,
        sources,
        sorts,
        orders,
    }))
}

/// Case-insensitive match against title or content. An empty term matches all.
pub fn matches_search(post: &Post, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return true;
    }
    post.title.to_lowercase().contains(&term)
        || post
            .content
            .as_deref()
            .map_or(false, |content| content.to_lowercase().contains(&term))
}

/// Only web links are rendered as anchors.
pub fn safe_link(url: &str) -> Option<String> {
    let url = url.trim();
    let scheme = url.split_once(':')?.0.to_ascii_lowercase();
    matches!(scheme.as_str(), "http" | "https").then(|| url.to_string())
}

pub fn format_time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let hours = (now - then).num_hours();
    if hours < 1 {
        "Just now".to_string()
    } else if hours < 24 {
        format!("{}h ago", hours)
    } else {
        format!("{}d ago", hours / 24)
    }
}

pub fn score_badge(score: i64) -> &'static str {
    match score {
        s if s >= 90 => "badge badge-top",
        s if s >= 80 => "badge badge-high",
        _ => "badge",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::create_test_db;
    use crate::db::NewPost;
    use crate::feed::HttpFeedClient;
    use crate::scoring::RecencyScorer;
    use axum::{body::Body, http::Request};
    use chrono::Duration;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn create_test_app() -> (Router, Arc<Database>) {
        let db = Arc::new(create_test_db().await);
        let client = HttpFeedClient::new(std::time::Duration::from_secs(5), "test").unwrap();
        let fetcher = Arc::new(Fetcher::new(
            db.clone(),
            Arc::new(client),
            Arc::new(RecencyScorer),
            "http://127.0.0.1:9/feeds/videos.xml",
        ));
        let state = Arc::new(AppState {
            db: db.clone(),
            fetcher,
        });

        (router(state), db)
    }

    async fn insert_post(db: &Database, source: &str, title: &str, url: &str, score: i64) {
        db.insert_post(&NewPost {
            title: title.to_string(),
            url: Some(url.to_string()),
            source: source.to_string(),
            source_type: "rss".to_string(),
            source_id: "1".to_string(),
            content: Some(format!("Content for {}", title)),
            duration: None,
            published_at: Utc::now(),
            score,
            filtered: false,
        })
        .await
        .unwrap();
    }

    async fn setup_test_data(db: &Database) {
        insert_post(db, "YouTube - Rust Programming", "Building Microservices with Rust", "https://y.com/1", 85).await;
        insert_post(db, "Hacker News", "Show HN: Terminal task manager", "https://h.com/1", 92).await;
        insert_post(db, "RSS - JavaScript Weekly", "The Future of JavaScript", "https://j.com/1", 78).await;
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let (status, body) = get(app, uri).await;
        (status, serde_json::from_str(&body).unwrap())
    }

    mod health_tests {
        use super::*;

        #[tokio::test]
        async fn test_health_endpoint() {
            let (app, _db) = create_test_app().await;
            let (status, body) = get_json(app, "/health").await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "OK");
            assert_eq!(body["service"], "b-random-server");
            assert!(body["timestamp"].is_string());
        }

        #[tokio::test]
        async fn test_refresh_status_endpoint() {
            let (app, _db) = create_test_app().await;
            let (status, body) = get_json(app, "/refresh/status").await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["refreshing"], false);
        }
    }

    mod posts_tests {
        use super::*;

        #[tokio::test]
        async fn test_list_posts_default_sort() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (status, body) = get_json(app, "/api/posts").await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], true);
            assert_eq!(body["count"], 3);
            assert_eq!(body["data"][0]["score"], 92);
            assert_eq!(body["data"][0]["sourceType"], "rss");
        }

        #[tokio::test]
        async fn test_list_posts_by_title_ascending() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (_, body) = get_json(app, "/api/posts?sort=title&order=asc").await;
            assert_eq!(body["data"][0]["title"], "Building Microservices with Rust");
        }

        #[tokio::test]
        async fn test_list_posts_invalid_sort() {
            let (app, _db) = create_test_app().await;
            let (status, _) = get(app, "/api/posts?sort=bogus").await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }

        #[tokio::test]
        async fn test_top_posts_default_threshold() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (_, body) = get_json(app, "/api/posts/top").await;
            assert_eq!(body["threshold"], 80);
            assert_eq!(body["count"], 2);
        }

        #[tokio::test]
        async fn test_top_posts_custom_threshold() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (_, body) = get_json(app, "/api/posts/top?threshold=90").await;
            assert_eq!(body["count"], 1);
            assert_eq!(body["data"][0]["source"], "Hacker News");
        }

        #[tokio::test]
        async fn test_posts_by_source() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (_, body) = get_json(app, "/api/posts/source/youtube").await;
            assert_eq!(body["source"], "youtube");
            assert_eq!(body["count"], 1);
        }

        #[tokio::test]
        async fn test_get_post() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (status, body) = get_json(app, "/api/posts/1").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["data"]["id"], 1);
        }

        #[tokio::test]
        async fn test_get_missing_post() {
            let (app, _db) = create_test_app().await;

            let (status, body) = get_json(app, "/api/posts/999").await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["success"], false);
            assert_eq!(body["error"], "Post not found");
        }
    }

    mod fetch_tests {
        use super::*;

        #[tokio::test]
        async fn test_fetch_missing_source() {
            let (app, _db) = create_test_app().await;

            let response = app
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/fetch/source/42")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        #[tokio::test]
        async fn test_fetch_unsupported_source_is_server_error() {
            let (app, db) = create_test_app().await;
            let source = db
                .create_source(&NewSource {
                    name: "Fediverse".to_string(),
                    source_type: "mastodon".to_string(),
                    identifier: "@x@example.social".to_string(),
                    fetch_all: true,
                    filter_rules: None,
                })
                .await
                .unwrap();

            let response = app
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri(format!("/api/fetch/source/{}", source.id))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            let body = response.into_body().collect().await.unwrap().to_bytes();
            let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(body["error"], "Unsupported source type: mastodon");
        }

        #[tokio::test]
        async fn test_fetch_all_with_no_sources() {
            let (app, _db) = create_test_app().await;

            let response = app
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/fetch/all")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    mod index_tests {
        use super::*;

        #[tokio::test]
        async fn test_index_empty() {
            let (app, _db) = create_test_app().await;
            let (status, body) = get(app, "/").await;

            assert_eq!(status, StatusCode::OK);
            assert!(body.contains("No posts found"));
        }

        #[tokio::test]
        async fn test_index_lists_posts_and_sources() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (status, body) = get(app, "/").await;

            assert_eq!(status, StatusCode::OK);
            assert!(body.contains("Building Microservices with Rust"));
            assert!(body.contains("Show HN: Terminal task manager"));
            assert!(body.contains("All Sources"));
            assert!(body.contains("Hacker News"));
        }

        #[tokio::test]
        async fn test_index_search_filter() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (_, body) = get(app, "/?q=javascript").await;

            assert!(body.contains("The Future of JavaScript"));
            assert!(!body.contains("Show HN: Terminal task manager"));
        }

        #[tokio::test]
        async fn test_index_source_filter() {
            let (app, db) = create_test_app().await;
            setup_test_data(&db).await;

            let (_, body) = get(app, "/?source=Hacker+News").await;

            assert!(body.contains("Show HN: Terminal task manager"));
            assert!(!body.contains("The Future of JavaScript"));
        }

        #[tokio::test]
        async fn test_index_escapes_titles() {
            let (app, db) = create_test_app().await;
            insert_post(&db, "Blog", "<script>alert(1)</script>", "https://b.com/1", 50).await;

            let (_, body) = get(app, "/").await;
            assert!(!body.contains("<script>alert(1)</script>"));
        }

        #[tokio::test]
        async fn test_index_renders_script_links_as_text() {
            let (app, db) = create_test_app().await;
            insert_post(&db, "Blog", "Hostile entry", "javascript:alert(1)", 50).await;

            let (_, body) = get(app, "/").await;
            assert!(body.contains("Hostile entry"));
            assert!(!body.contains("javascript:"));
        }
    }

    mod helper_tests {
        use super::*;

        fn post(title: &str, content: Option<&str>) -> Post {
            Post {
                id: 1,
                title: title.to_string(),
                url: None,
                source: "Blog".to_string(),
                source_type: "rss".to_string(),
                source_id: "1".to_string(),
                content: content.map(|c| c.to_string()),
                duration: None,
                published_at: None,
                score: 50,
                filtered: false,
                created_at: String::new(),
                updated_at: String::new(),
            }
        }

        #[test]
        fn test_matches_search() {
            let p = post("Rust in Production", Some("Lessons from async code"));
            assert!(matches_search(&p, ""));
            assert!(matches_search(&p, "RUST"));
            assert!(matches_search(&p, "async"));
            assert!(!matches_search(&p, "golang"));
            assert!(!matches_search(&post("Title", None), "content"));
        }

        #[test]
        fn test_safe_link() {
            assert_eq!(
                safe_link("https://example.com/a").as_deref(),
                Some("https://example.com/a")
            );
            assert_eq!(safe_link("HTTP://example.com").as_deref(), Some("HTTP://example.com"));
            assert_eq!(safe_link("javascript:alert(1)"), None);
            assert_eq!(safe_link(" JavaScript:alert(1)"), None);
            assert_eq!(safe_link("data:text/html,hi"), None);
            assert_eq!(safe_link("/relative"), None);
        }

        #[test]
        fn test_format_time_ago() {
            let now = Utc::now();
            assert_eq!(format_time_ago(now - Duration::minutes(30), now), "Just now");
            assert_eq!(format_time_ago(now - Duration::hours(5), now), "5h ago");
            assert_eq!(format_time_ago(now - Duration::hours(50), now), "2d ago");
        }

        #[test]
        fn test_score_badge() {
            assert_eq!(score_badge(95), "badge badge-top");
            assert_eq!(score_badge(80), "badge badge-high");
            assert_eq!(score_badge(50), "badge");
        }

        #[test]
        fn test_posts_query_defaults() {
            let query: PostsQuery = serde_urlencoded::from_str("").unwrap();
            assert_eq!(query.sort, PostSort::Score);
            assert_eq!(query.order, SortOrder::Desc);
        }

        #[test]
        fn test_posts_query_values() {
            let query: PostsQuery = serde_urlencoded::from_str("sort=createdAt&order=asc").unwrap();
            assert_eq!(query.sort, PostSort::CreatedAt);
            assert_eq!(query.order, SortOrder::Asc);
        }

        #[test]
        fn test_top_query_default() {
            let query: TopQuery = serde_urlencoded::from_str("").unwrap();
            assert_eq!(query.threshold, 80);
        }
    }
}

//! b-random - a feed aggregator
//!
//! Polls YouTube channel feeds and RSS feeds into SQLite, scores new items
//! by freshness, and serves them through a JSON API and a filterable list page.

pub mod config;
pub mod db;
pub mod feed;
pub mod fetcher;
pub mod filter;
pub mod routes;
pub mod scoring;
pub mod sources;

//! Feed fetching collaborator.
//!
//! The ingestion coordinator obtains raw articles through the
//! [`FeedFetcher`] trait; [`RssFetcher`] is the built-in RSS 2.0
//! implementation. HTML cleanup here is deliberately thin — tags stripped,
//! entities scrubbed — since embedding quality cares about text, not markup.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::models::{Article, Source};

/// Produces raw articles for a registered source.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the source's latest articles, skipping anything published at
    /// or before `since`.
    async fn fetch(&self, source: &Source, since: Option<DateTime<Utc>>) -> Result<Vec<Article>>;
}

// ============ RSS 2.0 ============

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    author: Option<String>,
    #[serde(rename = "creator")]
    creator: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "encoded")]
    content_encoded: Option<String>,
}

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("static regex"));

/// RSS 2.0 fetcher over HTTP.
pub struct RssFetcher {
    client: reqwest::Client,
}

impl RssFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("learnfeed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedFetcher for RssFetcher {
    async fn fetch(&self, source: &Source, since: Option<DateTime<Utc>>) -> Result<Vec<Article>> {
        let body = self
            .client
            .get(&source.identifier)
            .send()
            .await
            .with_context(|| format!("Feed request failed: {}", source.identifier))?
            .error_for_status()
            .with_context(|| format!("Feed returned error status: {}", source.identifier))?
            .text()
            .await
            .context("Reading feed body")?;

        let mut articles = parse_rss(&body)
            .with_context(|| format!("Parsing feed: {}", source.identifier))?;

        if let Some(cutoff) = since {
            articles.retain(|a| match a.published_at {
                Some(published) => published > cutoff,
                None => true,
            });
        }

        Ok(articles)
    }
}

/// Parse an RSS 2.0 document into articles. Items without a usable body or
/// link are skipped with a warning; a document that is not RSS at all is an
/// error.
pub fn parse_rss(xml: &str) -> Result<Vec<Article>> {
    let cleaned = scrub_entities(xml);
    let rss: Rss = from_str(&cleaned).context("parsing rss xml")?;

    let mut articles = Vec::with_capacity(rss.channel.items.len());
    for item in rss.channel.items {
        let body = item
            .content_encoded
            .as_deref()
            .or(item.description.as_deref())
            .map(strip_html)
            .unwrap_or_default();

        let url = match item.link {
            Some(link) if !link.trim().is_empty() => link.trim().to_string(),
            _ => {
                warn!(title = ?item.title, "feed item has no link, skipping");
                continue;
            }
        };

        if body.is_empty() {
            warn!(url = %url, "feed item has no text, skipping");
            continue;
        }

        let title = item
            .title
            .map(|t| strip_html(&t))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "(untitled)".to_string());

        let published_at = item
            .pub_date
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc2822(ts).ok())
            .map(|dt| dt.with_timezone(&Utc));

        articles.push(Article {
            title,
            author: item.author.or(item.creator),
            url,
            published_at,
            text: body,
        });
    }

    Ok(articles)
}

/// Strip HTML tags, resolve leftover entities, and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let without_tags = TAG.replace_all(html, " ");
    scrub_entities(&without_tags)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replace HTML entities that are not valid XML before parsing.
fn scrub_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

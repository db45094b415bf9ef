//! Article acquisition: a batch cell is either a URL to fetch or the article
//! text itself.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use mediascreen_types::{Result, ScreeningError};

use crate::config::AcquisitionConfig;
use crate::identity::ArticleContent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleSource {
    Url(String),
    Text(String),
}

impl ArticleSource {
    /// `http://`, `https://` and `www.` prefixes are URLs; anything else is text.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.") {
            ArticleSource::Url(trimmed.to_string())
        } else {
            ArticleSource::Text(input.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ArticleFetcher: Send + Sync {
    /// Return the raw HTML served at `url`.
    async fn fetch(&self, url: &str) -> Result<String>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &AcquisitionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ScreeningError::Other(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

fn normalize_url(url: &str) -> String {
    if url.to_ascii_lowercase().starts_with("www.") {
        format!("https://{url}")
    } else {
        url.to_string()
    }
}

#[async_trait]
impl ArticleFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let target = normalize_url(url);
        let fetch_error = |message: String| ScreeningError::Fetch {
            url: target.clone(),
            message,
        };

        tracing::debug!(url = %target, "Fetching article");
        let response = self
            .client
            .get(&target)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {}", status.as_u16())));
        }
        response.text().await.map_err(|e| fetch_error(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// HTML extraction
// ---------------------------------------------------------------------------

/// Pulls readable text out of an HTML page: paragraph text when there is any,
/// otherwise all visible text.
pub struct HtmlExtractor {
    paragraph: Regex,
    non_visible: Regex,
    tag: Regex,
}

impl HtmlExtractor {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ScreeningError::Other(format!("regex {pattern}: {e}")))
        };
        Ok(Self {
            paragraph: compile(r"(?is)<p\b[^>]*>(.*?)</p\s*>")?,
            non_visible: compile(
                r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>|<noscript\b[^>]*>.*?</noscript\s*>|<!--.*?-->",
            )?,
            tag: compile(r"(?s)<[^>]+>")?,
        })
    }

    pub fn extract(&self, html: &str) -> String {
        let visible = self.non_visible.replace_all(html, " ");

        let paragraphs: Vec<String> = self
            .paragraph
            .captures_iter(&visible)
            .filter_map(|c| c.get(1))
            .map(|m| self.to_text(m.as_str()).replace('\n', " "))
            .filter(|p| !p.is_empty())
            .collect();

        let text = if paragraphs.is_empty() {
            self.to_text(&visible)
        } else {
            paragraphs.join("\n")
        };
        clean_lines(&text)
    }

    fn to_text(&self, fragment: &str) -> String {
        let stripped = self.tag.replace_all(fragment, "");
        decode_entities(&stripped)
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Trim every line and drop blank ones.
fn clean_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&rsquo;", "\u{2019}")
        .replace("&lsquo;", "\u{2018}")
        .replace("&rdquo;", "\u{201d}")
        .replace("&ldquo;", "\u{201c}")
        .replace("&mdash;", "\u{2014}")
        .replace("&ndash;", "\u{2013}")
        .replace("&amp;", "&")
}

// ---------------------------------------------------------------------------
// acquire
// ---------------------------------------------------------------------------

/// Turn a source into article content, fetching and extracting when it is a URL.
pub async fn acquire(source: &ArticleSource, fetcher: &dyn ArticleFetcher) -> Result<ArticleContent> {
    match source {
        ArticleSource::Text(text) => ArticleContent::new(text, None),
        ArticleSource::Url(url) => {
            let html = fetcher.fetch(url).await?;
            let text = HtmlExtractor::new()?.extract(&html);
            if text.is_empty() {
                return Err(ScreeningError::Fetch {
                    url: url.clone(),
                    message: "no readable text on page".into(),
                });
            }
            tracing::info!(url = %url, chars = text.len(), "Article acquired");
            ArticleContent::new(&text, Some(url.clone()))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

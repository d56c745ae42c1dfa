//! International store detail page lookup.

use crate::categories::store_category;
use crate::http::{browser_client, read_page, Page};
use crate::{CategorySource, ProviderError, SourceAnswer};
use regex::Regex;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use storage::{Category, Source};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct GooglePlayConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GooglePlayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://play.google.com".into(),
            timeout: Duration::from_secs(8),
        }
    }
}

#[derive(Clone)]
pub struct GooglePlaySource {
    client: Client,
    cfg: Arc<GooglePlayConfig>,
}

impl GooglePlaySource {
    pub fn new(cfg: GooglePlayConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: browser_client(cfg.timeout)?,
            cfg: Arc::new(cfg),
        })
    }
}

#[async_trait::async_trait]
impl CategorySource for GooglePlaySource {
    fn source(&self) -> Source {
        Source::RemoteInternational
    }

    async fn lookup(
        &self,
        identifier: &str,
        _display_name: Option<&str>,
    ) -> Result<SourceAnswer, ProviderError> {
        let resp = self
            .client
            .get(format!(
                "{}/store/apps/details",
                self.cfg.base_url.trim_end_matches('/')
            ))
            .query(&[("id", identifier), ("hl", "en")])
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await?;
        match read_page(resp).await? {
            Page::Found(html) => Ok(parse_details_page(&html)),
            Page::Missing => {
                debug!(identifier, "not listed on international store");
                Ok(SourceAnswer::not_found())
            }
        }
    }
}

const TITLE_SUFFIX: &str = " - Apps on Google Play";

pub fn parse_details_page(html: &str) -> SourceAnswer {
    let ld = structured_data(html);
    let name = ld
        .as_ref()
        .and_then(|v| v.get("name"))
        .and_then(|n| n.as_str())
        .map(str::to_string)
        .or_else(|| og_title(html))
        .or_else(|| page_title(html));

    let category = ld
        .as_ref()
        .and_then(|v| v.get("applicationCategory"))
        .and_then(|c| c.as_str())
        .and_then(store_category)
        .or_else(|| category_link(html))
        .or_else(|| genre(html));

    SourceAnswer {
        category,
        display_name: None,
    }
    .with_name(name)
}

fn structured_data(html: &str) -> Option<serde_json::Value> {
    let re = Regex::new(r#"(?s)<script[^>]*type="application/ld\+json"[^>]*>(.*?)</script>"#).ok()?;
    let raw = re.captures(html)?.get(1)?.as_str();
    serde_json::from_str(raw).ok()
}

fn og_title(html: &str) -> Option<String> {
    let re = Regex::new(r#"<meta[^>]*property="og:title"[^>]*content="([^"]+)""#).ok()?;
    let raw = re.captures(html)?.get(1)?.as_str().trim();
    let name = raw.strip_suffix(TITLE_SUFFIX).unwrap_or(raw).trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn page_title(html: &str) -> Option<String> {
    let re = Regex::new(r"<title[^>]*>([^<]+)</title>").ok()?;
    let raw = re.captures(html)?.get(1)?.as_str().trim();
    let name = raw.strip_suffix(TITLE_SUFFIX).unwrap_or(raw).trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn category_link(html: &str) -> Option<Category> {
    let re = Regex::new(r"/store/apps/category/([A-Z_]+)").ok()?;
    let category = re
        .captures_iter(html)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        // FAMILY is a navigation link present on most pages
        .filter(|key| *key != "FAMILY")
        .find_map(store_category);
    category
}

fn genre(html: &str) -> Option<Category> {
    let re = Regex::new(r#"itemprop="genre"[^>]*content="([^"]+)""#).ok()?;
    store_category(re.captures(html)?.get(1)?.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_data_wins() {
        let html = r#"<html><head><title>Ignored - Apps on Google Play</title>
<script type="application/ld+json">{"@type":"SoftwareApplication","name":"WhatsApp Messenger","applicationCategory":"COMMUNICATION"}</script>
</head><body><a href="/store/apps/category/TOOLS">Tools</a></body></html>"#;
        let answer = parse_details_page(html);
        assert_eq!(answer.category, Some(Category::Social));
        assert_eq!(answer.display_name.as_deref(), Some("WhatsApp Messenger"));
    }

    #[test]
    fn falls_back_to_category_link_and_og_title() {
        let html = r#"<meta property="og:title" content="Chess Pro - Apps on Google Play">
<a href="/store/apps/category/FAMILY">Kids</a>
<a href="/store/apps/category/GAME_BOARD">Board</a>"#;
        let answer = parse_details_page(html);
        assert_eq!(answer.category, Some(Category::Games));
        assert_eq!(answer.display_name.as_deref(), Some("Chess Pro"));
    }

    #[test]
    fn genre_and_title_as_last_resort() {
        let html = r#"<title>Recipes</title>
<meta itemprop="genre" content="Food & Drink">"#;
        let answer = parse_details_page(html);
        assert_eq!(answer.display_name.as_deref(), Some("Recipes"));
        assert_eq!(answer.category, Some(Category::FoodDelivery));
    }

    #[test]
    fn page_without_hints_is_not_found() {
        let answer = parse_details_page("<html><body>nothing here</body></html>");
        assert_eq!(answer, SourceAnswer::not_found());
    }
}

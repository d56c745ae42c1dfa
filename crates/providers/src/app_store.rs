//! Domestic store detail page lookup. The page embeds its data as a Next.js
//! `__NEXT_DATA__` JSON blob.

use crate::categories::domestic_tag;
use crate::http::{browser_client, read_page, Page};
use crate::{CategorySource, ProviderError, SourceAnswer};
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use storage::Source;
use tracing::debug;

const BASIC_INFO_CARD: &str = "yybn_game_basic_info";

#[derive(Clone, Debug)]
pub struct AppStoreConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for AppStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sj.qq.com".into(),
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct AppStoreSource {
    client: Client,
    cfg: Arc<AppStoreConfig>,
}

impl AppStoreSource {
    pub fn new(cfg: AppStoreConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: browser_client(cfg.timeout)?,
            cfg: Arc::new(cfg),
        })
    }
}

#[async_trait::async_trait]
impl CategorySource for AppStoreSource {
    fn source(&self) -> Source {
        Source::RemoteDomestic
    }

    async fn lookup(
        &self,
        identifier: &str,
        _display_name: Option<&str>,
    ) -> Result<SourceAnswer, ProviderError> {
        let resp = self
            .client
            .get(format!(
                "{}/appdetail/{}",
                self.cfg.base_url.trim_end_matches('/'),
                identifier
            ))
            .header("Accept-Language", "zh-CN,zh;q=0.9")
            .send()
            .await?;
        match read_page(resp).await? {
            Page::Found(html) => Ok(parse_detail_page(identifier, &html)),
            Page::Missing => {
                debug!(identifier, "not listed on domestic store");
                Ok(SourceAnswer::not_found())
            }
        }
    }
}

pub fn parse_detail_page(identifier: &str, html: &str) -> SourceAnswer {
    let Some(data) = next_data(html) else {
        return SourceAnswer::not_found();
    };
    let page_props = &data["props"]["pageProps"];

    let item = page_props["dynamicCardResponse"]["data"]["components"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|c| c["cardId"].as_str() == Some(BASIC_INFO_CARD))
        .filter_map(|c| c["data"]["itemData"].get(0))
        .find(|item| item["pkg_name"].as_str() == Some(identifier));

    let name = item
        .and_then(|i| i["name"].as_str())
        .filter(|n| !n.trim().is_empty())
        .map(str::to_string)
        .or_else(|| seo_name(page_props["seoMeta"]["title"].as_str().unwrap_or_default()));

    // A page with no recognizable app behind it is a redirect.
    if name.is_none() {
        return SourceAnswer::not_found();
    }

    let category = item.and_then(|i| {
        i["tags"]
            .as_str()
            .unwrap_or_default()
            .split(',')
            .find_map(domestic_tag)
            .or_else(|| i["cate_name"].as_str().and_then(domestic_tag))
    });

    SourceAnswer {
        category,
        display_name: None,
    }
    .with_name(name)
}

fn next_data(html: &str) -> Option<Value> {
    let re = Regex::new(r#"(?s)<script\s+id="__NEXT_DATA__"[^>]*>(.*?)</script>"#).ok()?;
    let raw = re.captures(html)?.get(1)?.as_str();
    serde_json::from_str(raw).ok()
}

/// `微信下载安装-微信APP官网客户端下载-应用宝官网` → `微信`.
fn seo_name(title: &str) -> Option<String> {
    if !title.contains("应用宝") || title.contains("相关推荐") {
        return None;
    }
    let name = title.split("下载").next().unwrap_or_default().trim();
    match name {
        "" | "应用宝" | "腾讯应用宝" => None,
        n => Some(n.to_string()),
    }
}

use crate::ProviderError;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

const BROWSER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

pub(crate) fn browser_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .user_agent(BROWSER_AGENT)
        .timeout(timeout)
        .gzip(true)
        .build()
        .map_err(|e| ProviderError::NotConfigured(e.to_string()))
}

/// Outcome of fetching a store detail page.
pub(crate) enum Page {
    Found(String),
    Missing,
}

/// Maps status codes the way every store page source treats them.
pub(crate) async fn read_page(resp: Response) -> Result<Page, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(Page::Found(resp.text().await?));
    }
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Ok(Page::Missing),
        _ => Err(status_error(status, resp).await),
    }
}

pub(crate) async fn status_error(status: StatusCode, resp: Response) -> ProviderError {
    let body = resp.bytes().await.unwrap_or(Bytes::from_static(b""));
    let snippet: String = String::from_utf8_lossy(&body).chars().take(200).collect();
    let msg = format!("status {}: {}", status, snippet.trim());
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited(msg)
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ProviderError::Unavailable(msg)
    } else {
        ProviderError::RequestFailed(msg)
    }
}

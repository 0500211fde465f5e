//! Plain HTTP downloader: saves the response body of the URL as-is

use async_trait::async_trait;
use reqwest::{Client, Url};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::fetcher::{Downloader, FetchError, FetchOutput, FetchRequest};

const FALLBACK_FILE_NAME: &str = "download";

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(3600),
            user_agent: concat!("mediabox/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// HTTP downloader. Retries are left to the worker pool.
pub struct HttpDownloader {
    client: Client,
    config: HttpConfig,
}

impl HttpDownloader {
    pub fn new(config: HttpConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn map_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.config.request_timeout)
        } else if e.is_redirect() {
            FetchError::TooManyRedirects
        } else {
            FetchError::RequestFailed(e.to_string())
        }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchOutput, FetchError> {
        debug!(job_id = %request.job_id, url = %request.url, "Starting download");

        let url = Url::parse(&request.url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        // Check HTTP status
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::RequestFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let path = request.target_dir.join(file_name(response.url()));

        let mut file = tokio::fs::File::create(&path).await?;
        let mut size: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_error(e))? {
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(job_id = %request.job_id, size, path = %path.display(), "Download completed");

        Ok(FetchOutput {
            path,
            metadata: serde_json::json!({
                "downloader": self.name(),
                "source_url": request.url,
                "size": size,
                "content_type": content_type,
            }),
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Last path segment of the URL, restricted to a safe character set
fn file_name(url: &Url) -> PathBuf {
    let segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();

    let name: String = segment
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();

    let name = name.trim_start_matches('.');
    if name.is_empty() {
        PathBuf::from(FALLBACK_FILE_NAME)
    } else {
        PathBuf::from(name)
    }
}

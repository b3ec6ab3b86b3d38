use async_trait::async_trait;
use common::model::config::DownloadConfig;
use common::model::frame::BinaryType;
use common::model::task::Task;
use errors::error::DownloadError;
use errors::{Error, Result};
use log::{debug, warn};
use reqwest::{Client, Method};
use std::path::PathBuf;
use std::time::Duration;
use utils::hash::md5_hex;

/// Outcome of one fetch: the body plus how the parser should treat it.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub data: Vec<u8>,
    pub binary_type: BinaryType,
}

/// External fetch collaborator invoked by a connection between pull and
/// forward. Implementations must enforce their own timeouts; the
/// connection loop has no cancel primitive beyond them.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, task: &Task) -> Result<FetchResult>;
}

/// HTTP fetcher with connect/transfer timeouts, a HEAD Content-Length
/// pre-check and an optional on-disk body cache keyed by `md5(url)`.
pub struct HttpFetcher {
    client: Client,
    max_content_length: u64,
    cache_dir: Option<PathBuf>,
}

impl HttpFetcher {
    pub fn new(cfg: &DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.transfer_timeout_secs))
            .build()
            .map_err(|e| DownloadError::ConnectFailed(Box::new(e)))?;

        let cache_dir = if cfg.cache_enable {
            cfg.cache_dir.as_ref().map(PathBuf::from)
        } else {
            None
        };

        Ok(HttpFetcher {
            client,
            max_content_length: cfg.max_content_length,
            cache_dir,
        })
    }

    fn cache_path(&self, url: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(md5_hex(url.as_bytes())))
    }

    async fn read_cache(&self, url: &str) -> Option<Vec<u8>> {
        let path = self.cache_path(url)?;
        match tokio::fs::read(&path).await {
            Ok(data) => {
                debug!("cache hit for {url}");
                Some(data)
            }
            Err(_) => None,
        }
    }

    async fn write_cache(&self, url: &str, data: &[u8]) -> Result<()> {
        let Some(path) = self.cache_path(url) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::CacheIo(Box::new(e)))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| DownloadError::CacheIo(Box::new(e)))?;
        Ok(())
    }

    /// Rejects oversized bodies before transferring them. A failed HEAD
    /// is not a verdict; the GET still runs and its own limits apply.
    async fn head_precheck(&self, url: &str) -> Result<()> {
        if self.max_content_length == 0 {
            return Ok(());
        }
        match self.client.head(url).send().await {
            Ok(resp) => {
                if let Some(len) = resp.content_length()
                    && len > self.max_content_length
                {
                    return Err(Error::body_too_large(len));
                }
                Ok(())
            }
            Err(e) => {
                debug!("HEAD pre-check failed for {url}, proceeding: {e}");
                Ok(())
            }
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        DownloadError::Timeout.into()
    } else if e.is_connect() {
        DownloadError::ConnectFailed(Box::new(e)).into()
    } else {
        Error::download_failed(e)
    }
}

fn classify_body(content_type: Option<&str>) -> BinaryType {
    match content_type {
        Some(ct)
            if ct.starts_with("text/")
                || ct.contains("json")
                || ct.contains("xml")
                || ct.contains("javascript") =>
        {
            BinaryType::Text
        }
        None => BinaryType::Text,
        _ => BinaryType::Binary,
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, task: &Task) -> Result<FetchResult> {
        if let Some(data) = self.read_cache(&task.url).await {
            return Ok(FetchResult {
                data,
                binary_type: BinaryType::Text,
            });
        }

        self.head_precheck(&task.url).await?;

        let method = Method::from_bytes(task.method.as_bytes()).unwrap_or(Method::GET);
        let mut request = self.client.request(method, &task.url);
        if let Some(referer) = &task.referer {
            request = request.header(reqwest::header::REFERER, referer);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let response = response.error_for_status().map_err(map_reqwest_error)?;

        let binary_type = classify_body(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
        );

        if let Some(len) = response.content_length()
            && self.max_content_length > 0
            && len > self.max_content_length
        {
            return Err(Error::body_too_large(len));
        }

        let data = response.bytes().await.map_err(map_reqwest_error)?.to_vec();
        metrics::counter!("downloader_bytes_total").increment(data.len() as u64);

        if let Err(e) = self.write_cache(&task.url, &data).await {
            warn!("cache write failed for {}: {e}", task.url);
        }

        Ok(FetchResult { data, binary_type })
    }
}

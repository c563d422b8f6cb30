use std::time::Duration;

use brewery_core::{ErrorKind, PipelineError, WorkItem};
use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use tokio::runtime::{Builder, Runtime};

use crate::decode::decode_body;
use crate::stage::Fetcher;

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    /// Media types accepted in Content-Type; a missing header is accepted.
    pub allowed_content_types: Vec<String>,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            redirect_limit: 5,
            max_bytes: 5 * 1024 * 1024,
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
                "text/plain".to_string(),
            ],
            user_agent: concat!("brewery/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("failed to start http runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Fetches an item's payload as a URL and returns the decoded body.
///
/// Owns a small tokio runtime so that blocking stage workers can drive the
/// async client; must not be called from inside another tokio runtime.
pub struct HttpFetcher {
    client: reqwest::Client,
    runtime: Runtime,
    settings: HttpSettings,
}

impl HttpFetcher {
    pub fn new(settings: HttpSettings) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(settings.redirect_limit))
            .user_agent(settings.user_agent.clone())
            .build()?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("brew-http")
            .enable_all()
            .build()?;
        Ok(Self {
            client,
            runtime,
            settings,
        })
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    /// Blocking GET of `url`.
    pub fn get(&self, url: &str) -> Result<String, PipelineError> {
        self.runtime.block_on(self.get_async(url))
    }

    async fn get_async(&self, url: &str) -> Result<String, PipelineError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| PipelineError::fetch(ErrorKind::Fatal, format!("invalid url: {err}")))?;
        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &response));
        }
        if let Some(len) = response.content_length() {
            if len > self.settings.max_bytes {
                return Err(self.too_large(len));
            }
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        if let Some(ct) = content_type.as_deref() {
            if !self.is_content_type_allowed(ct) {
                return Err(PipelineError::fetch(
                    ErrorKind::Fatal,
                    format!("unsupported content type `{ct}`"),
                ));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(self.too_large(next_len));
            }
            bytes.extend_from_slice(&chunk);
        }

        decode_body(&bytes, content_type.as_deref())
            .map_err(|err| PipelineError::fetch(ErrorKind::Fatal, err.to_string()))
    }

    fn is_content_type_allowed(&self, content_type: &str) -> bool {
        let media_type = content_type.split(';').next().unwrap_or(content_type).trim();
        self.settings
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(media_type))
    }

    fn too_large(&self, actual: u64) -> PipelineError {
        PipelineError::fetch(
            ErrorKind::Fatal,
            format!(
                "response too large: {actual} bytes (limit {})",
                self.settings.max_bytes
            ),
        )
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, item: &WorkItem) -> Result<String, PipelineError> {
        self.get(item.payload())
    }
}

fn status_error(status: StatusCode, response: &Response) -> PipelineError {
    let message = format!("http status {status}");
    match status {
        StatusCode::TOO_MANY_REQUESTS => PipelineError::RateLimited {
            message,
            retry_after_ms: retry_after_ms(response),
        },
        StatusCode::REQUEST_TIMEOUT => PipelineError::fetch(ErrorKind::Transient, message),
        s if s.is_server_error() => PipelineError::fetch(ErrorKind::Transient, message),
        _ => PipelineError::fetch(ErrorKind::Fatal, message),
    }
}

/// Only the delay-seconds form of `Retry-After` is honoured.
fn retry_after_ms(response: &Response) -> Option<u64> {
    let seconds: u64 = response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Some(seconds.saturating_mul(1000))
}

fn map_reqwest_error(err: reqwest::Error) -> PipelineError {
    if err.is_redirect() || err.is_builder() {
        return PipelineError::fetch(ErrorKind::Fatal, err.to_string());
    }
    if err.is_timeout() {
        return PipelineError::fetch(ErrorKind::Transient, format!("timed out: {err}"));
    }
    PipelineError::fetch(ErrorKind::Transient, err.to_string())
}

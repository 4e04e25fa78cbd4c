//! HTTP transport collaborator.
//!
//! Every component that needs the network receives a [`Transport`]; nothing
//! touches a shared session. The production implementation wraps a blocking
//! reqwest client with an on-disk response cache, a minimum gap between live
//! requests, and backoff retries on rate-limit and server-error statuses.

use std::borrow::Cow;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, warn};

use super::config::NetworkConfig;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        source: reqwest::Error,
    },
    #[error("{url} returned status {status} after {attempts} attempt(s)")]
    Status {
        url: String,
        status: u16,
        attempts: u32,
    },
    #[error("client build failed: {0}")]
    Build(#[source] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// The network seam. Implementations must retry and back off internally;
/// callers treat any `Err` as final for the current book.
pub trait Transport {
    fn get(&self, url: &str) -> Result<Response, HttpError>;
    fn post_form(&self, url: &str, fields: &[(&str, String)]) -> Result<Response, HttpError>;
}

pub struct CachedClient {
    client: Client,
    config: NetworkConfig,
    cache_dir: Option<PathBuf>,
    /// Time of the last live request; `None` until the first one goes out.
    last_request: Mutex<Option<Instant>>,
}

impl CachedClient {
    pub fn new(config: NetworkConfig) -> Result<Self, HttpError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or(HeaderValue::from_static("node")),
        );

        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(HttpError::Build)?;

        let cache_dir = if config.cache_dir.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(config.cache_dir.trim()))
        };

        Ok(Self {
            client,
            config,
            cache_dir,
            last_request: Mutex::new(None),
        })
    }

    fn throttle(&self) {
        let min_gap = Duration::from_millis(self.config.min_request_gap_ms);
        if let Ok(mut last) = self.last_request.lock() {
            if let Some(prev) = *last {
                let elapsed = prev.elapsed();
                if elapsed < min_gap {
                    std::thread::sleep(min_gap - elapsed);
                }
            }
            *last = Some(Instant::now());
        }
    }

    fn cache_path(&self, key: &str) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        let mut hasher = Sha1::new();
        hasher.update(key.as_bytes());
        Some(dir.join(format!("{}.bin", hex::encode(hasher.finalize()))))
    }

    fn cache_load(&self, key: &str) -> Option<Vec<u8>> {
        let path = self.cache_path(key)?;
        fs::read(path).ok()
    }

    fn cache_store(&self, key: &str, body: &[u8]) {
        let Some(path) = self.cache_path(key) else {
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                debug!("cache dir create failed (ignored): {err}");
                return;
            }
        }
        if let Err(err) = fs::write(&path, body) {
            debug!("cache write failed (ignored): {err}");
        }
    }

    fn send_with_retry(
        &self,
        url: &str,
        send: impl Fn() -> Result<reqwest::blocking::Response, reqwest::Error>,
    ) -> Result<Response, HttpError> {
        let retries = self.config.max_retries.max(1);
        let mut backoff = Duration::from_millis(600);
        let mut last_status = 0u16;

        for attempt in 1..=retries {
            self.throttle();
            let resp = match send() {
                Ok(r) => r,
                Err(source) => {
                    if attempt == retries {
                        return Err(HttpError::Request {
                            url: url.to_string(),
                            source,
                        });
                    }
                    debug!("attempt {attempt} for {url} errored: {source}");
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(Duration::from_secs(8));
                    continue;
                }
            };

            let status = resp.status().as_u16();
            last_status = status;
            if resp.status().is_success() {
                let body = resp
                    .bytes()
                    .map_err(|source| HttpError::Request {
                        url: url.to_string(),
                        source,
                    })?
                    .to_vec();
                return Ok(Response { status, body });
            }

            // 429 and transient server errors are retried with backoff,
            // anything else is final.
            if status == 429 || (500..=599).contains(&status) {
                warn!("{url} returned {status}, backing off (attempt {attempt}/{retries})");
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(Duration::from_secs(8));
                continue;
            }

            return Err(HttpError::Status {
                url: url.to_string(),
                status,
                attempts: attempt,
            });
        }

        Err(HttpError::Status {
            url: url.to_string(),
            status: last_status,
            attempts: retries,
        })
    }
}

impl Transport for CachedClient {
    fn get(&self, url: &str) -> Result<Response, HttpError> {
        let key = format!("GET|{url}");
        if let Some(body) = self.cache_load(&key) {
            debug!("cache hit: {url}");
            return Ok(Response { status: 200, body });
        }

        let response = self.send_with_retry(url, || self.client.get(url).send())?;
        self.cache_store(&key, &response.body);
        Ok(response)
    }

    fn post_form(&self, url: &str, fields: &[(&str, String)]) -> Result<Response, HttpError> {
        let mut key = format!("POST|{url}");
        for (name, value) in fields {
            key.push('|');
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }
        if let Some(body) = self.cache_load(&key) {
            debug!("cache hit: {url} (form)");
            return Ok(Response { status: 200, body });
        }

        let form: Vec<(String, String)> = fields
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        let response = self.send_with_retry(url, || self.client.post(url).form(&form).send())?;
        self.cache_store(&key, &response.body);
        Ok(response)
    }
}

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::{debug, warn};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT},
    Client, RequestBuilder, Response, StatusCode,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::scm::{CommitInfo, CommitRequest, ContentStore, FetchedFile, FileLocation};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct UpdateContentsRequest<'a> {
    message: &'a str,
    committer: Committer<'a>,
    branch: &'a str,
    content: String,
    sha: &'a str,
}

#[derive(Debug, Serialize)]
struct Committer<'a> {
    name: &'a str,
    email: &'a str,
}

#[derive(Debug, Deserialize)]
struct UpdateContentsResponse {
    content: BlobRef,
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct BlobRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
    #[serde(default)]
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Bounded exponential backoff for connection errors, timeouts and
/// 429/5xx answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (starting at 1).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl GitHubClient {
    pub fn new(token: &str, base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| Error::Auth {
                message: format!("Invalid GitHub token format: {}", e),
            })?,
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("gitops-replacer"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn contents_url(&self, location: &FileLocation) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.base_url,
            location.repository,
            location.path.trim_start_matches('/')
        )
    }

    /// Sends the request built by `build`, retrying transient failures.
    /// Returns the final response and how many attempts it took.
    async fn send_with_retry<F>(&self, build: F) -> Result<(Response, u32)>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let can_retry = attempt <= self.retry.max_retries;

            match build().send().await {
                Ok(response) if can_retry && is_retryable_status(response.status()) => {
                    warn!(
                        "HTTP {} from GitHub, retrying ({}/{})",
                        response.status(),
                        attempt,
                        self.retry.max_retries
                    );
                }
                Ok(response) => return Ok((response, attempt)),
                Err(e) if is_transient(&e) && can_retry => {
                    warn!(
                        "request failed: {}, retrying ({}/{})",
                        e, attempt, self.retry.max_retries
                    );
                }
                Err(e) if is_transient(&e) => {
                    return Err(Error::Transient {
                        attempts: attempt,
                        message: e.to_string(),
                    })
                }
                Err(e) => return Err(e.into()),
            }

            tokio::time::sleep(self.retry.delay_for(attempt)).await;
        }
    }
}

impl ContentStore for GitHubClient {
    async fn fetch_file(&self, location: &FileLocation) -> Result<FetchedFile> {
        let url = self.contents_url(location);
        debug!("GET {}?ref={}", url, location.branch);

        let (response, attempts) = self
            .send_with_retry(|| {
                self.client
                    .get(&url)
                    .query(&[("ref", location.branch.as_str())])
            })
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &body, location, attempts));
        }

        decode_contents(&body, location)
    }

    async fn commit_file(&self, request: &CommitRequest<'_>) -> Result<CommitInfo> {
        let url = self.contents_url(request.location);
        debug!("PUT {}", url);

        let payload = UpdateContentsRequest {
            message: request.message,
            committer: Committer {
                name: &request.author.name,
                email: &request.author.email,
            },
            branch: &request.location.branch,
            content: STANDARD.encode(request.content.as_bytes()),
            sha: request.prior_sha,
        };

        let (response, attempts) = self
            .send_with_retry(|| self.client.put(&url).json(&payload))
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status, &body, request.location, attempts));
        }

        let update: UpdateContentsResponse = serde_json::from_str(&body)?;
        Ok(CommitInfo {
            commit_sha: update.commit.sha,
            content_sha: update.content.sha,
            html_url: update.commit.html_url,
        })
    }
}

/// Turns a contents API answer into a [`FetchedFile`].
pub fn decode_contents(body: &str, location: &FileLocation) -> Result<FetchedFile> {
    let content_error = |message: String| Error::Content {
        target: location.to_string(),
        message,
    };

    if body.trim_start().starts_with('[') {
        return Err(content_error("path is a directory, not a file".to_string()));
    }

    let contents: ContentsResponse = serde_json::from_str(body)?;
    match contents.encoding.as_deref() {
        Some("base64") | None => {}
        Some(other) => {
            return Err(content_error(format!(
                "unsupported encoding '{}' (file too large for the contents API?)",
                other
            )))
        }
    }

    let packed: String = contents
        .content
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let bytes = STANDARD
        .decode(packed)
        .map_err(|e| content_error(format!("invalid base64 content: {}", e)))?;
    let content =
        String::from_utf8(bytes).map_err(|e| content_error(format!("not valid UTF-8: {}", e)))?;

    Ok(FetchedFile {
        location: location.clone(),
        content,
        sha: contents.sha,
    })
}

fn api_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|error| error.message)
        .ok()
        .filter(|message| !message.is_empty())
        .or_else(|| Some(body.trim().to_string()).filter(|text| !text.is_empty()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string())
}

fn status_error(status: StatusCode, body: &str, location: &FileLocation, attempts: u32) -> Error {
    let message = api_message(status, body);
    match status.as_u16() {
        401 => Error::Auth {
            message: format!(
                "401 unauthorized - maybe your token does not have access to {}: {}",
                location.repository, message
            ),
        },
        403 => Error::Auth {
            message: format!("403 forbidden for {}: {}", location.repository, message),
        },
        404 => Error::NotFound {
            target: location.to_string(),
        },
        409 => Error::Conflict {
            target: location.to_string(),
        },
        _ if is_retryable_status(status) => Error::Transient {
            attempts,
            message: format!("HTTP {}: {}", status.as_u16(), message),
        },
        code => Error::Api {
            status: code,
            message,
        },
    }
}

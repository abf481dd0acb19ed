//! Release source client for the GitHub releases API.
//!
//! Network access goes through the [`Transport`] trait so the retry and
//! absence semantics can be exercised without a real server.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use relup_schema::{GitHubRepo, Release};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

/// Default GitHub REST API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP status {status} from {url}")]
    Status { url: String, status: u16 },
}

/// Status and body of a completed request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

/// Minimal HTTP surface the updater needs.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` and return whatever status came back. Only failures to get
    /// a response at all are errors.
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;

    /// Stream `url` into a new file at `dest`. Any non-success status is an
    /// error.
    async fn download(&self, url: &str, dest: &Path) -> Result<(), TransportError>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client that identifies itself with [`crate::USER_AGENT`].
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder().user_agent(crate::USER_AGENT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(HttpResponse { status, body })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), TransportError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut file = File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }

        file.flush().await?;
        debug!(url, bytes = downloaded, dest = %dest.display(), "Downloaded asset");
        Ok(())
    }
}

/// How often a release query is retried and on which statuses.
///
/// 200 always ends the loop and 404 is never retried (it means absence,
/// not failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Whether 4xx statuses other than 404 are worth another attempt.
    pub retry_client_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_client_errors: true,
        }
    }
}

impl RetryPolicy {
    /// Give up after the first non-200 response.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            retry_client_errors: false,
        }
    }

    /// Total number of attempts, including the first.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether a response with `status` may be retried.
    pub fn should_retry(&self, status: u16) -> bool {
        match status {
            200 | 404 => false,
            400..=499 => self.retry_client_errors,
            _ => true,
        }
    }
}

#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },

    #[error("Status {status} from {url} after {attempts} attempt(s); only status 200 is accepted")]
    Status {
        url: String,
        status: u16,
        attempts: u32,
    },

    #[error("Malformed release metadata from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    assets: Vec<GithubAsset>,
}

#[derive(Debug, Deserialize)]
struct GithubAsset {
    name: String,
    browser_download_url: String,
}

impl From<GithubRelease> for Release {
    fn from(release: GithubRelease) -> Self {
        Release::new(
            release.tag_name,
            release
                .assets
                .into_iter()
                .map(|asset| (asset.name, asset.browser_download_url)),
        )
    }
}

/// Resolves a repository to its latest (or a pinned) release.
#[derive(Debug)]
pub struct ReleaseClient<T> {
    repository: GitHubRepo,
    transport: T,
    retry: RetryPolicy,
    api_base: String,
}

impl<T: Transport> ReleaseClient<T> {
    pub fn new(repository: GitHubRepo, transport: T) -> Self {
        Self {
            repository,
            transport,
            retry: RetryPolicy::default(),
            api_base: DEFAULT_API_BASE_URL.to_string(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Point the client at another API host (GitHub Enterprise, a mock server).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn repository(&self) -> &GitHubRepo {
        &self.repository
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// `.../releases/latest`, or `.../releases/tags/<tag>` when pinned.
    pub fn release_url(&self, tag: Option<&str>) -> String {
        let endpoint = match tag {
            Some(tag) if !tag.is_empty() => format!("tags/{tag}"),
            _ => "latest".to_string(),
        };
        format!(
            "{}/repos/{}/{}/releases/{endpoint}",
            self.api_base,
            self.repository.owner(),
            self.repository.name()
        )
    }

    /// Fetch the latest release, or the one tagged `tag`.
    ///
    /// `Ok(None)` means the source answered 404: no releases at all, or no
    /// release with that tag. Every other failure is an error and must not
    /// be read as "nothing to update".
    pub async fn get_release(&self, tag: Option<&str>) -> Result<Option<Release>, ReleaseError> {
        let url = self.release_url(tag);
        let attempts = self.retry.attempts();
        let mut last_status = 0;
        let mut made = 0;

        for attempt in 1..=attempts {
            made = attempt;
            let response = match self.transport.get(&url).await {
                Ok(response) => response,
                Err(source) => {
                    error!(url = %url, error = %source, "Exception when querying release source");
                    return Err(ReleaseError::Transport { url, source });
                }
            };

            match response.status {
                200 => {
                    let release: GithubRelease =
                        serde_json::from_slice(&response.body).map_err(|source| {
                            error!(url = %url, error = %source, "Could not decode release metadata");
                            ReleaseError::Decode {
                                url: url.clone(),
                                source,
                            }
                        })?;
                    debug!(repository = %self.repository, tag = %release.tag_name, "Found release");
                    return Ok(Some(release.into()));
                }
                404 => {
                    match tag {
                        Some(tag) if !tag.is_empty() => {
                            warn!(repository = %self.repository, tag, "Repository has no release with this tag");
                        }
                        _ => warn!(repository = %self.repository, "Repository has no releases"),
                    }
                    return Ok(None);
                }
                status => {
                    warn!(url = %url, status, "[attempt {attempt}/{attempts}] Unexpected status");
                    last_status = status;
                    if !self.retry.should_retry(status) {
                        break;
                    }
                }
            }
        }

        error!(url = %url, status = last_status, attempts = made, "Giving up on release query");
        Err(ReleaseError::Status {
            url,
            status: last_status,
            attempts: made,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeTransport, release_json};

    const LATEST: &str = "https://api.github.com/repos/thepeacockproject/Peacock/releases/latest";

    fn client(transport: FakeTransport) -> ReleaseClient<FakeTransport> {
        ReleaseClient::new(
            GitHubRepo::new("thepeacockproject/Peacock").unwrap(),
            transport,
        )
    }

    #[test]
    fn test_release_urls() {
        let c = client(FakeTransport::new());
        assert_eq!(c.release_url(None), LATEST);
        assert_eq!(
            c.release_url(Some("v8.1.0")),
            "https://api.github.com/repos/thepeacockproject/Peacock/releases/tags/v8.1.0"
        );
        let c = c.with_api_base("http://127.0.0.1:1234/");
        assert_eq!(
            c.release_url(None),
            "http://127.0.0.1:1234/repos/thepeacockproject/Peacock/releases/latest"
        );
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts(), 4);
        assert!(policy.should_retry(500));
        assert!(policy.should_retry(403));
        assert!(!policy.should_retry(404));
        assert!(!policy.should_retry(200));

        let none = RetryPolicy::none();
        assert_eq!(none.attempts(), 1);
        assert!(!none.should_retry(403));
        assert!(none.should_retry(503));
    }

    #[tokio::test]
    async fn test_parses_release() {
        let transport = FakeTransport::new();
        transport.respond(
            LATEST,
            200,
            &release_json(
                "v8.1.0",
                &[("Peacock-v8.1.0.zip", "https://example.com/p.zip")],
            ),
        );
        let release = client(transport).get_release(None).await.unwrap().unwrap();
        assert_eq!(release.tag(), "v8.1.0");
        assert_eq!(
            release.asset_url("Peacock-v8.1.0.zip"),
            Some("https://example.com/p.zip")
        );
    }

    #[tokio::test]
    async fn test_release_without_assets_field() {
        let transport = FakeTransport::new();
        transport.respond(LATEST, 200, r#"{"tag_name": "v1"}"#);
        let release = client(transport).get_release(None).await.unwrap().unwrap();
        assert!(release.assets().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_is_absence() {
        let transport = FakeTransport::new();
        transport.respond(LATEST, 404, "{}");
        let c = client(transport);
        assert!(c.get_release(None).await.unwrap().is_none());
        assert_eq!(c.transport().get_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_tag_is_absence() {
        let transport = FakeTransport::new();
        let c = client(transport);
        let url = c.release_url(Some("v0.0.1"));
        c.transport().respond(&url, 404, "{}");
        assert!(c.get_release(Some("v0.0.1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let transport = FakeTransport::new();
        transport.respond(LATEST, 502, "");
        transport.respond(LATEST, 503, "");
        transport.respond(LATEST, 200, &release_json("v2", &[]));
        let c = client(transport);
        let release = c.get_release(None).await.unwrap().unwrap();
        assert_eq!(release.tag(), "v2");
        assert_eq!(c.transport().get_count(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_with_last_status() {
        let transport = FakeTransport::new();
        transport.respond(LATEST, 500, "");
        transport.respond(LATEST, 503, "");
        let c = client(transport);
        let err = c.get_release(None).await.unwrap_err();
        assert!(matches!(
            err,
            ReleaseError::Status {
                status: 503,
                attempts: 4,
                ..
            }
        ));
        assert_eq!(c.transport().get_count(), 4);
    }

    #[tokio::test]
    async fn test_zero_retry_policy() {
        let transport = FakeTransport::new();
        transport.respond(LATEST, 500, "");
        let c = client(transport).with_retry_policy(RetryPolicy::none());
        let err = c.get_release(None).await.unwrap_err();
        assert!(matches!(err, ReleaseError::Status { attempts: 1, .. }));
        assert_eq!(c.transport().get_count(), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_status_stops_early() {
        let transport = FakeTransport::new();
        transport.respond(LATEST, 403, "");
        let c = client(transport).with_retry_policy(RetryPolicy {
            max_retries: 5,
            retry_client_errors: false,
        });
        let err = c.get_release(None).await.unwrap_err();
        assert!(matches!(
            err,
            ReleaseError::Status {
                status: 403,
                attempts: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_json_is_an_error() {
        let transport = FakeTransport::new();
        transport.respond(LATEST, 200, "not json");
        let err = client(transport).get_release(None).await.unwrap_err();
        assert!(matches!(err, ReleaseError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_reqwest_transport_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let asset_url = format!("{}/download/DSR.Gadget.2.3.zip", server.url());

        let _release = server
            .mock("GET", "/repos/JKAnderson/DSR-Gadget/releases/latest")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(release_json(
                "2.3",
                &[("DSR.Gadget.2.3.zip", asset_url.as_str())],
            ))
            .create_async()
            .await;
        let _asset = server
            .mock("GET", "/download/DSR.Gadget.2.3.zip")
            .with_status(200)
            .with_body("zip bytes")
            .create_async()
            .await;

        let c = ReleaseClient::new(
            GitHubRepo::new("JKAnderson/DSR-Gadget").unwrap(),
            ReqwestTransport::new().unwrap(),
        )
        .with_api_base(server.url());

        let release = c.get_release(None).await.unwrap().unwrap();
        assert_eq!(release.tag(), "2.3");

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("DSR.Gadget.2.3.zip");
        let url = release.asset_url("DSR.Gadget.2.3.zip").unwrap();
        c.transport().download(url, &dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "zip bytes");
    }

    #[tokio::test]
    async fn test_reqwest_transport_download_fails_on_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _missing = server
            .mock("GET", "/download/gone.zip")
            .with_status(410)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let transport = ReqwestTransport::new().unwrap();
        let err = transport
            .download(
                &format!("{}/download/gone.zip", server.url()),
                &dir.path().join("gone.zip"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 410, .. }));
        assert!(!dir.path().join("gone.zip").exists());
    }
}

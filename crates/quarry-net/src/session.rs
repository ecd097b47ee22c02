//! Per-agent HTTP session.
//!
//! Each worker owns one session. The underlying `reqwest::Client` keeps at
//! most a handful of pooled connections and reuses one per `(scheme, host,
//! port)`, which is the connection-cache behavior the downloader needs;
//! redirects are handled here, not by the client, because a redirect is a
//! scheduling event (it becomes a new job) rather than a transparent hop.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use reqwest::header;
use reqwest::redirect::Policy;
use url::Url;

use quarry_core::config::Config;
use quarry_core::error::{Error, Result};
use quarry_core::job::Part;

use crate::cookies::CookieJar;
use crate::headers::{parse_digest, parse_link, DigestEntry, LinkEntry};

/// `Accept` header: prefer XHTML/XML over HTML.
const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// A fully-read response with the metadata the worker dispatches on.
#[derive(Clone, Debug)]
pub struct FetchedResponse {
    /// HTTP status code.
    pub status: u16,
    /// Canonical reason phrase.
    pub reason: String,
    /// `Content-Type` with parameters stripped, lower-case.
    pub content_type: Option<String>,
    /// Parsed `Last-Modified` header.
    pub last_modified: Option<SystemTime>,
    /// RFC 6249 `Link` entries.
    pub links: Vec<LinkEntry>,
    /// RFC 3230 `Digest` entries.
    pub digests: Vec<DigestEntry>,
    /// Absolute target of a `Location` redirect; the body is to be discarded.
    pub redirect_to: Option<Url>,
    /// The (decoded) response body.
    pub body: Vec<u8>,
}

impl FetchedResponse {
    /// Whether this is a Metalink/HTTP answer (302 plus Link and Digest).
    #[must_use]
    pub fn is_metalink_http(&self) -> bool {
        self.status == 302 && !self.links.is_empty() && !self.digests.is_empty()
    }
}

/// One worker's HTTP state.
pub struct HttpSession {
    client: reqwest::Client,
    cfg: Arc<Config>,
}

impl HttpSession {
    /// Build a session sharing the process-wide cookie jar.
    pub fn new(cfg: Arc<Config>, jar: Arc<CookieJar>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(1);
        if cfg.cookies {
            builder = builder.cookie_provider(jar);
        }
        let client = builder
            .build()
            .map_err(|e| Error::network(format!("client setup: {e}")))?;
        Ok(Self { client, cfg })
    }

    /// Fetch a URI, following up to `max_redirect` same-request reissues.
    ///
    /// Returns when the response is final: 2xx, 4xx/5xx, 304, or a 302 that
    /// carries Metalink/HTTP metadata. A 3xx with a `Location` returns the
    /// (discardable) response with `redirect_to` set; the redirect target
    /// becomes a new job upstream. Network errors and redirect-budget
    /// overflow are `Err`; the caller retries whole fetches.
    pub async fn fetch(
        &self,
        uri: &Url,
        part: Option<&Part>,
        local_filename: Option<&Path>,
    ) -> Result<FetchedResponse> {
        let mut budget = i64::from(self.cfg.max_redirect);

        loop {
            let request = self.build_request(uri, part, local_filename)?;
            let response = self
                .client
                .execute(request)
                .await
                .map_err(|e| Error::network(e.to_string()))?;

            let status = response.status();
            if self.cfg.server_response {
                tracing::info!("# {} {}", status.as_u16(), status.canonical_reason().unwrap_or(""));
                for (name, value) in response.headers() {
                    tracing::info!("#   {}: {}", name, value.to_str().unwrap_or("<binary>"));
                }
            }

            let links: Vec<LinkEntry> = response
                .headers()
                .get_all(header::LINK)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(parse_link)
                .collect();
            let digests: Vec<DigestEntry> = response
                .headers()
                .get_all("digest")
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(parse_digest)
                .collect();

            let code = status.as_u16();
            let metalink_http = code == 302 && !links.is_empty() && !digests.is_empty();
            if status.is_success() || code >= 400 || code == 304 || metalink_http {
                return finish(response, links, digests, None).await;
            }

            // some other 3xx: a Location becomes a new job for the caller
            if let Some(location) = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
            {
                let target = uri
                    .join(location)
                    .map_err(|e| Error::protocol(format!("bad Location '{location}': {e}")))?;
                return finish(response, links, digests, Some(target)).await;
            }

            // 3xx without Location: reissue, bounded by the redirect budget
            budget -= 1;
            if budget < 0 {
                return Err(Error::network(format!(
                    "redirect limit exceeded fetching {uri}"
                )));
            }
        }
    }

    fn build_request(
        &self,
        uri: &Url,
        part: Option<&Part>,
        local_filename: Option<&Path>,
    ) -> Result<reqwest::Request> {
        let mut req = self.client.get(uri.clone()).header(header::ACCEPT, ACCEPT);

        if let Some(part) = part {
            req = req.header(
                header::RANGE,
                format!(
                    "bytes={}-{}",
                    part.position,
                    part.position + part.length - 1
                ),
            );
        } else if self.cfg.continue_download {
            if let Some(path) = local_filename {
                req = req.header(header::RANGE, format!("bytes={}-", local_size(path)));
            }
        }

        if self.cfg.timestamping && part.is_none() {
            if let Some(mtime) = local_filename.and_then(local_mtime) {
                // ask only for content strictly newer than the local copy
                let stamp = mtime + Duration::from_secs(1);
                req = req.header(header::IF_MODIFIED_SINCE, http_date(stamp));
            }
        }

        if let Some(agent) = &self.cfg.user_agent {
            req = req.header(header::USER_AGENT, agent);
        }
        if self.cfg.keep_alive {
            req = req.header(header::CONNECTION, "keep-alive");
        }
        if !self.cfg.cache {
            req = req.header(header::PRAGMA, "no-cache");
        }

        req.build()
            .map_err(|e| Error::network(format!("request build: {e}")))
    }
}

async fn finish(
    response: reqwest::Response,
    links: Vec<LinkEntry>,
    digests: Vec<DigestEntry>,
    redirect_to: Option<Url>,
) -> Result<FetchedResponse> {
    let status = response.status();
    let reason = status.canonical_reason().unwrap_or("").to_string();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_ascii_lowercase()
        });
    let last_modified = response
        .headers()
        .get(header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date);

    let body = response
        .bytes()
        .await
        .map_err(|e| Error::network(format!("reading body: {e}")))?
        .to_vec();

    Ok(FetchedResponse {
        status: status.as_u16(),
        reason,
        content_type,
        last_modified,
        links,
        digests,
        redirect_to,
        body,
    })
}

/// Size of the local file, 0 when absent.
fn local_size(path: &Path) -> u64 {
    std::fs::metadata(path).map_or(0, |m| m.len())
}

/// Modification time of the local file, when present.
fn local_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Format a timestamp as an HTTP date (RFC 7231 IMF-fixdate).
fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Parse an HTTP date header value.
fn parse_http_date(value: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(SystemTime::from)
}

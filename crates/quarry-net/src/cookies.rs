//! Process-wide cookie jar.
//!
//! One jar is shared by every worker's HTTP client; access is serialized by
//! the internal mutex. Domain/path defaulting and rejection of malformed or
//! out-of-domain cookies are delegated to `cookie_store`, the same store
//! reqwest's own cookie support is built on. Wrapping it ourselves (instead
//! of using `reqwest::cookie::Jar`) keeps the store inspectable so it can be
//! serialized at shutdown.

use std::path::Path;
use std::sync::Mutex;

use cookie_store::{CookieExpiration, CookieStore, RawCookie};
use reqwest::header::HeaderValue;
use url::Url;

use quarry_core::error::{Error, Result};

/// Shared cookie jar implementing [`reqwest::cookie::CookieStore`].
#[derive(Default)]
pub struct CookieJar {
    store: Mutex<CookieStore>,
}

impl CookieJar {
    /// Create an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired cookies currently held.
    pub fn len(&self) -> usize {
        self.store.lock().unwrap().iter_unexpired().count()
    }

    /// Whether the jar holds no unexpired cookies.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize the jar as JSON lines, one cookie per line.
    ///
    /// Session cookies (no expiry) are included only when `keep_session` is
    /// set.
    pub fn save(&self, path: &Path, keep_session: bool) -> Result<()> {
        let store = self.store.lock().unwrap();
        let mut out = String::new();
        for cookie in store.iter_unexpired() {
            let persistent = matches!(cookie.expires, CookieExpiration::AtUtc(_));
            if !persistent && !keep_session {
                continue;
            }
            let line = serde_json::to_string(cookie)
                .map_err(|e| Error::protocol(format!("cookie serialization: {e}")))?;
            out.push_str(&line);
            out.push('\n');
        }
        std::fs::write(path, out)?;
        Ok(())
    }
}

impl reqwest::cookie::CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let mut store = self.store.lock().unwrap();
        // unparseable or out-of-domain cookies are dropped silently
        let cookies = cookie_headers.filter_map(|value| -> Option<RawCookie<'static>> {
            std::str::from_utf8(value.as_bytes())
                .ok()
                .and_then(|s| RawCookie::parse(s.to_owned()).ok())
        });
        store.store_response_cookies(cookies, url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let store = self.store.lock().unwrap();
        let header = store
            .get_request_values(url)
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        if header.is_empty() {
            None
        } else {
            HeaderValue::from_str(&header).ok()
        }
    }
}

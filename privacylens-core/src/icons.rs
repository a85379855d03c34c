//! App icon resolution
//!
//! Looks up an app's 60px artwork through the iTunes lookup API and keeps
//! the result for the lifetime of the resolver. Lookups run one at a time.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use privacylens_core::{Config, IconResolver};
//!
//! let resolver = IconResolver::new(&Config::load()?.icons)?;
//! let icon = resolver.resolve("com.getdropbox.Dropbox").await?;
//! std::fs::write("dropbox.png", &icon.bytes)?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::config::IconsConfig;
use crate::error::{Error, Result};

/// Grey square served when an app has no artwork.
pub const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="60" height="60"><rect width="100%" height="100%" fill="#cccccc" /></svg>"##;

/// Some network records prefix the bundle id with the daemon that made the request.
const DAEMON_PREFIX: &str = "terminusd/";

/// A resolved icon, ready to be served or written out.
#[derive(Debug, Clone, PartialEq)]
pub struct IconResponse {
    pub status: u16,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl IconResponse {
    pub fn placeholder() -> Self {
        Self {
            status: 200,
            content_type: "image/svg+xml".to_string(),
            bytes: PLACEHOLDER_SVG.as_bytes().to_vec(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.content_type == "image/svg+xml" && self.bytes == PLACEHOLDER_SVG.as_bytes()
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    results: Vec<LookupResult>,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    #[serde(rename = "artworkUrl60")]
    artwork_url_60: Option<String>,
}

/// Strip a `terminusd/` daemon prefix.
pub fn clean_bundle_id(bundle_id: &str) -> &str {
    bundle_id.strip_prefix(DAEMON_PREFIX).unwrap_or(bundle_id)
}

/// Bundle ids are non-empty runs of ASCII letters, digits, `.` and `-`.
pub fn is_valid_bundle_id(bundle_id: &str) -> bool {
    !bundle_id.is_empty()
        && bundle_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

/// Memoizing icon resolver.
///
/// Successful outcomes, including placeholders, are cached per bundle id.
/// Network failures are returned and not cached, so a later call retries.
pub struct IconResolver {
    config: IconsConfig,
    http: reqwest::Client,
    cache: Mutex<HashMap<String, Arc<IconResponse>>>,
    limiter: Semaphore,
}

impl IconResolver {
    pub fn new(config: &IconsConfig) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config: config.clone(),
            http,
            cache: Mutex::new(HashMap::new()),
            limiter: Semaphore::new(1),
        })
    }

    /// Resolve the icon for a bundle id.
    pub async fn resolve(&self, bundle_id: &str) -> Result<Arc<IconResponse>> {
        let id = clean_bundle_id(bundle_id);
        if !is_valid_bundle_id(id) {
            return Err(Error::Icon(format!("invalid bundle id {:?}", bundle_id)));
        }

        if let Some(hit) = self.cached(id) {
            return Ok(hit);
        }

        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| Error::Icon(format!("icon limiter closed: {}", e)))?;

        // Another caller may have resolved it while we waited
        if let Some(hit) = self.cached(id) {
            return Ok(hit);
        }

        let response = if self.config.enabled {
            Arc::new(self.fetch(id).await?)
        } else {
            Arc::new(IconResponse::placeholder())
        };

        self.lock_cache()
            .insert(id.to_string(), Arc::clone(&response));
        Ok(response)
    }

    /// Number of bundle ids with a cached outcome
    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }

    fn cached(&self, id: &str) -> Option<Arc<IconResponse>> {
        self.lock_cache().get(id).cloned()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<IconResponse>>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn fetch(&self, id: &str) -> Result<IconResponse> {
        let url = format!("{}?bundleId={}", self.config.lookup_url, urlencoding::encode(id));
        let started = std::time::Instant::now();

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Icon(format!("lookup request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Icon(format!("lookup returned {}", status)));
        }
        let lookup: LookupResponse = response
            .json()
            .await
            .map_err(|e| Error::Icon(format!("failed to parse lookup response: {}", e)))?;

        tracing::debug!(
            bundle_id = %id,
            results = lookup.results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Looked up app"
        );

        let artwork_url = match lookup
            .results
            .into_iter()
            .next()
            .and_then(|r| r.artwork_url_60)
        {
            Some(url) => url,
            None => return Ok(IconResponse::placeholder()),
        };

        let artwork = self
            .http
            .get(&artwork_url)
            .send()
            .await
            .map_err(|e| Error::Icon(format!("artwork request failed: {}", e)))?;
        if artwork.status() != reqwest::StatusCode::OK {
            tracing::info!(bundle_id = %id, status = %artwork.status(), "Artwork unavailable");
            return Ok(IconResponse::placeholder());
        }

        let content_type = artwork
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = artwork
            .bytes()
            .await
            .map_err(|e| Error::Icon(format!("failed to read artwork: {}", e)))?;

        tracing::info!(bundle_id = %id, bytes = bytes.len(), "Fetched artwork");

        Ok(IconResponse {
            status: 200,
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `body` as JSON to every connection, counting requests.
    async fn serve_json(body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let reply = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/lookup", addr), hits)
    }

    fn config(lookup_url: String) -> IconsConfig {
        IconsConfig {
            enabled: true,
            lookup_url,
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_clean_and_validate_bundle_id() {
        assert_eq!(clean_bundle_id("terminusd/com.apple.podcasts"), "com.apple.podcasts");
        assert_eq!(clean_bundle_id("com.apple.podcasts"), "com.apple.podcasts");
        assert!(is_valid_bundle_id("com.getdropbox.Dropbox"));
        assert!(!is_valid_bundle_id("com.example/../etc"));
        assert!(!is_valid_bundle_id(""));
    }

    #[tokio::test]
    async fn test_invalid_bundle_id_is_rejected() {
        let resolver = IconResolver::new(&IconsConfig::default()).unwrap();
        let err = resolver.resolve("not a bundle id").await.unwrap_err();
        assert!(matches!(err, Error::Icon(_)));
        assert_eq!(resolver.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_no_results_yields_cached_placeholder() {
        let (url, hits) = serve_json(r#"{"resultCount":0,"results":[]}"#).await;
        let resolver = IconResolver::new(&config(url)).unwrap();

        let first = resolver.resolve("com.example.missing").await.unwrap();
        assert!(first.is_placeholder());
        let second = resolver
            .resolve("terminusd/com.example.missing")
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_lookup() {
        let (url, hits) = serve_json(r#"{"resultCount":0,"results":[]}"#).await;
        let resolver = IconResolver::new(&config(url)).unwrap();

        let (a, b) = tokio::join!(
            resolver.resolve("com.example.app"),
            resolver.resolve("com.example.app")
        );
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_network_error_is_not_cached() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let resolver = IconResolver::new(&config(format!("http://{}/lookup", addr))).unwrap();
        assert!(resolver.resolve("com.example.app").await.is_err());
        assert_eq!(resolver.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_disabled_resolver_serves_placeholder() {
        let resolver = IconResolver::new(&IconsConfig {
            enabled: false,
            ..Default::default()
        })
        .unwrap();
        let icon = resolver.resolve("com.example.app").await.unwrap();
        assert!(icon.is_placeholder());
        assert_eq!(icon.status, 200);
    }
}

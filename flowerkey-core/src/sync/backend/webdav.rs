//! WebDAV backend over reqwest (Nextcloud, Jianguoyun, plain Apache mod_dav).

use super::{validate_name, BackendError, BackendResult, StorageBackend};
use crate::sync::models::OPLOG_DIR;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 3;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:"><d:prop><d:resourcetype/></d:prop></d:propfind>"#;

fn default_base_path() -> String {
    "/FlowerKey".to_string()
}

/// Connection settings for a WebDAV share.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebDavConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_base_path")]
    pub base_path: String,
}

impl fmt::Debug for WebDavConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDavConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("base_path", &self.base_path)
            .finish()
    }
}

/// Blob store on a WebDAV collection.
pub struct WebDavBackend {
    base_url: Url,
    root: String,
    username: String,
    password: String,
    http: Client,
}

impl WebDavBackend {
    pub fn new(config: WebDavConfig) -> BackendResult<Self> {
        let endpoint = config.url.trim();
        if endpoint.is_empty() {
            return Err(BackendError::InvalidConfig("WebDAV URL is empty".into()));
        }
        let base_url = Url::parse(endpoint)
            .map_err(|e| BackendError::InvalidConfig(format!("invalid WebDAV URL: {}", e)))?;

        // Basic auth credentials must not cross the network in clear text
        let is_local = base_url
            .host_str()
            .map(|h| {
                matches!(
                    h.to_lowercase().as_str(),
                    "localhost" | "127.0.0.1" | "[::1]" | "::1"
                )
            })
            .unwrap_or(false);
        if !is_local && base_url.scheme() != "https" {
            return Err(BackendError::InvalidConfig(
                "WebDAV URL must use HTTPS (plain HTTP is only allowed for localhost)".into(),
            ));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| BackendError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            root: config.base_path.trim_matches('/').to_string(),
            username: config.username,
            password: config.password,
            http,
        })
    }

    fn auth_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", general_purpose::STANDARD.encode(raw))
    }

    /// URL of `rel` below the server endpoint.
    fn endpoint_url(&self, rel: &str) -> Url {
        let mut path = self.base_url.path().trim_end_matches('/').to_string();
        path.push('/');
        path.push_str(rel);

        let mut url = self.base_url.clone();
        url.set_path(&path);
        url
    }

    /// URL of `name` below the base path. An empty name is the base itself.
    fn url_for(&self, name: &str) -> Url {
        if self.root.is_empty() {
            self.endpoint_url(name)
        } else {
            self.endpoint_url(&format!("{}/{}", self.root, name))
        }
    }

    async fn send(
        &self,
        method: Method,
        name: &str,
        body: Option<&[u8]>,
        depth: Option<&'static str>,
    ) -> BackendResult<Response> {
        self.send_to(method, self.url_for(name), name, body, depth).await
    }

    async fn send_to(
        &self,
        method: Method,
        url: Url,
        name: &str,
        body: Option<&[u8]>,
        depth: Option<&'static str>,
    ) -> BackendResult<Response> {
        let mut last_error = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500 * (1 << attempt))).await;
                debug!("WebDAV {} {} retry {}/{}", method, name, attempt + 1, MAX_ATTEMPTS);
            }

            let mut builder = self
                .http
                .request(method.clone(), url.clone())
                .header("Authorization", self.auth_header());
            if let Some(depth) = depth {
                builder = builder
                    .header("Depth", depth)
                    .header("Content-Type", "application/xml; charset=utf-8");
            }
            if let Some(body) = body {
                builder = builder.body(body.to_vec());
            }

            match builder.send().await {
                Ok(resp) => return Ok(resp),
                Err(e) => last_error = Some(e),
            }
        }

        Err(BackendError::Network(format!(
            "WebDAV {} {} failed after {} attempts: {}",
            method,
            name,
            MAX_ATTEMPTS,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Create one collection, given relative to the server endpoint.
    async fn mkcol(&self, rel: &str) -> BackendResult<()> {
        let resp = self
            .send_to(dav_method(b"MKCOL")?, self.endpoint_url(rel), rel, None, None)
            .await?;
        let status = resp.status();
        // 405 and 409 mean the collection already exists
        if !matches!(
            status,
            StatusCode::OK
                | StatusCode::CREATED
                | StatusCode::METHOD_NOT_ALLOWED
                | StatusCode::CONFLICT
        ) {
            return Err(http_error(status, "MKCOL", rel));
        }
        Ok(())
    }
}

fn dav_method(name: &[u8]) -> BackendResult<Method> {
    Method::from_bytes(name).map_err(|e| BackendError::InvalidConfig(format!("HTTP method: {}", e)))
}

fn http_error(status: StatusCode, op: &'static str, name: &str) -> BackendError {
    BackendError::Http {
        status: status.as_u16(),
        op,
        name: name.to_string(),
    }
}

/// File names in a Depth-1 PROPFIND listing. Collections are skipped.
fn parse_listing(xml: &str) -> BackendResult<Vec<String>> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| BackendError::Unavailable(format!("unparseable PROPFIND response: {}", e)))?;

    let dav_ns = "DAV:";
    let mut names = Vec::new();
    for response in doc.descendants().filter(|n| n.has_tag_name((dav_ns, "response"))) {
        let href = response
            .descendants()
            .find(|n| n.has_tag_name((dav_ns, "href")))
            .and_then(|n| n.text())
            .unwrap_or_default()
            .trim();
        let is_collection = href.ends_with('/')
            || response
                .descendants()
                .any(|n| n.has_tag_name((dav_ns, "collection")));
        if href.is_empty() || is_collection {
            continue;
        }

        let raw = href.rsplit('/').next().unwrap_or_default();
        let decoded = urlencoding::decode(raw)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        if !decoded.is_empty() {
            names.push(decoded);
        }
    }
    names.sort();
    Ok(names)
}

#[async_trait]
impl StorageBackend for WebDavBackend {
    async fn ensure_dir(&self) -> BackendResult<()> {
        // MKCOL is not recursive; create each level of the base path
        let mut current = String::new();
        for part in self.root.split('/').filter(|p| !p.is_empty()) {
            current.push_str(part);
            current.push('/');
            self.mkcol(&current).await?;
        }
        self.mkcol(&format!("{}{}/", current, OPLOG_DIR)).await
    }

    async fn read(&self, name: &str) -> BackendResult<Option<Vec<u8>>> {
        validate_name(name)?;
        let resp = self.send(Method::GET, name, None, None).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| BackendError::Network(format!("GET {}: {}", name, e)))?;
                Ok(Some(bytes.to_vec()))
            }
            s => Err(http_error(s, "GET", name)),
        }
    }

    async fn write(&self, name: &str, data: &[u8]) -> BackendResult<()> {
        validate_name(name)?;
        let resp = self.send(Method::PUT, name, Some(data), None).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(http_error(status, "PUT", name));
        }
        Ok(())
    }

    async fn list_oplog(&self) -> BackendResult<Vec<String>> {
        let dir = format!("{}/", OPLOG_DIR);
        let resp = self
            .send(dav_method(b"PROPFIND")?, &dir, Some(PROPFIND_BODY.as_bytes()), Some("1"))
            .await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(http_error(status, "PROPFIND", &dir));
        }

        let xml = resp
            .text()
            .await
            .map_err(|e| BackendError::Network(format!("PROPFIND {}: {}", dir, e)))?;
        let names = parse_listing(&xml)?;
        debug!("WebDAV oplog listing: {} objects", names.len());
        Ok(names)
    }

    async fn remove(&self, name: &str) -> BackendResult<()> {
        validate_name(name)?;
        let resp = self.send(Method::DELETE, name, None, None).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(()),
            s if s.is_success() => Ok(()),
            s => {
                warn!("WebDAV DELETE {} returned {}", name, s);
                Err(http_error(s, "DELETE", name))
            }
        }
    }
}

//! Confluence-style wiki connector.
//!
//! Lists the pages of one space through the REST content API and then
//! fetches each page body in storage format.
//!
//! # Configuration
//!
//! ```toml
//! [docs]
//! base_url = "https://acme.atlassian.net"
//! space_key = "ENG"
//! limit = 50
//! ```
//!
//! Credentials come from `CONFLUENCE_EMAIL` and `CONFLUENCE_API_TOKEN` (or
//! the variables named by `email_env` / `token_env`) and are sent as HTTP
//! Basic auth.
//!
//! Pages whose last modification falls outside the fetch window are
//! dropped; pages without a modification time are kept. A failure listing
//! the space aborts the source. A page whose body cannot be fetched is left
//! out of the batch and reported as failed, so the stored copy stays as it
//! is until a later run reads the body.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

use kb_ingest_core::error::IngestError;
use kb_ingest_core::models::RawPage;

use crate::config::{DocsConfig, DocsCredentials};
use crate::traits::{DocumentSource, FetchedPages};

const SOURCE_NAME: &str = "confluence";
/// Largest page size the content API accepts.
const MAX_PAGE_SIZE: u32 = 50;

/// A wiki connector instance that implements [`DocumentSource`].
pub struct WikiConnector {
    config: DocsConfig,
    auth_header: String,
    client: reqwest::Client,
}

impl WikiConnector {
    pub fn new(config: DocsConfig, credentials: DocsCredentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", credentials.email, credentials.token));
        Ok(Self {
            config,
            auth_header: format!("Basic {}", encoded),
            client,
        })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    async fn call_api(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/wiki/rest/api/{}", self.base_url(), endpoint);
        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.auth_header)
            .header("Accept", "application/json")
            .query(params)
            .send()
            .await
            .with_context(|| format!("GET {} failed", endpoint))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(IngestError::Configuration(format!(
                "wiki credentials rejected: HTTP {}",
                status
            ))
            .into());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GET {} returned HTTP {}: {}", endpoint, status, body);
        }
        response
            .json()
            .await
            .with_context(|| format!("GET {} returned invalid JSON", endpoint))
    }

    async fn list_pages(&self) -> Result<Vec<Value>> {
        let page_size = self.config.limit.min(MAX_PAGE_SIZE);
        let total = self.config.limit as usize;
        let mut pages: Vec<Value> = Vec::new();
        let mut start = 0u32;

        while pages.len() < total {
            let json = self
                .call_api(
                    "content",
                    &[
                        ("spaceKey", self.config.space_key.clone()),
                        ("type", "page".to_string()),
                        ("limit", page_size.to_string()),
                        ("start", start.to_string()),
                        ("expand", "version,history,space".to_string()),
                    ],
                )
                .await?;
            let batch = json
                .get("results")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if batch.is_empty() {
                break;
            }
            pages.extend(batch);

            let has_next = json
                .get("_links")
                .and_then(|l| l.get("next"))
                .is_some();
            if !has_next {
                break;
            }
            start += page_size;
        }
        pages.truncate(total);
        Ok(pages)
    }

    async fn page_body(&self, page_id: &str) -> Result<String> {
        let json = self
            .call_api(
                &format!("content/{}", page_id),
                &[("expand", "body.storage,version".to_string())],
            )
            .await?;
        json.pointer("/body/storage/value")
            .and_then(Value::as_str)
            .map(str::to_string)
            .with_context(|| format!("page {} has no storage body", page_id))
    }

    fn page_url(&self, page: &Value, page_id: &str, space_key: &str) -> String {
        match page.pointer("/_links/webui").and_then(Value::as_str) {
            Some(webui) if !webui.is_empty() => format!("{}/wiki{}", self.base_url(), webui),
            _ => format!(
                "{}/wiki/spaces/{}/pages/{}",
                self.base_url(),
                space_key,
                page_id
            ),
        }
    }
}

#[async_trait]
impl DocumentSource for WikiConnector {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<FetchedPages> {
        let listed = self.list_pages().await.map_err(|e| {
            if e.downcast_ref::<IngestError>().is_some() {
                return e;
            }
            anyhow::Error::from(IngestError::AdapterFetch {
                source_name: SOURCE_NAME.to_string(),
                message: format!("{:#}", e),
            })
        })?;
        info!(space = %self.config.space_key, pages = listed.len(), "Listed wiki pages");

        let mut fetched = FetchedPages::default();
        for page in &listed {
            let Some(meta) = page_metadata(page, &self.config.space_key) else {
                warn!("Skipping wiki page without an id");
                continue;
            };
            if let Some(modified) = meta.modified_at {
                if modified < window_start || modified > window_end {
                    continue;
                }
            }

            let body_html = match self.page_body(&meta.page_id).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(page_id = %meta.page_id, error = %format!("{:#}", e), "Could not fetch page body; leaving page for the next run");
                    fetched.failed.push(meta.page_id);
                    continue;
                }
            };
            let url = self.page_url(page, &meta.page_id, &meta.space_key);
            fetched.pages.push(RawPage {
                page_id: meta.page_id,
                title: meta.title,
                body_html,
                author: meta.author,
                version: meta.version,
                modified_at: meta.modified_at,
                url: Some(url),
                space_key: meta.space_key,
            });
        }
        fetched
            .pages
            .sort_by(|a, b| a.modified_at.cmp(&b.modified_at));
        Ok(fetched)
    }
}

struct PageMetadata {
    page_id: String,
    title: String,
    author: Option<String>,
    version: Option<i64>,
    modified_at: Option<DateTime<Utc>>,
    space_key: String,
}

/// Pull the listing fields out of one `content` result.
fn page_metadata(page: &Value, default_space: &str) -> Option<PageMetadata> {
    let page_id = match page.get("id")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let author = ["/version/by/displayName", "/version/by/username"]
        .iter()
        .filter_map(|p| page.pointer(p).and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .map(str::to_string);
    let modified_at = page
        .pointer("/version/when")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));

    Some(PageMetadata {
        page_id,
        title: page
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Untitled")
            .to_string(),
        author,
        version: page.pointer("/version/number").and_then(Value::as_i64),
        modified_at,
        space_key: page
            .pointer("/space/key")
            .and_then(Value::as_str)
            .unwrap_or(default_space)
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use kb_ingest_core::models::SourceKind;
    use kb_ingest_core::store::memory::InMemoryStore;
    use kb_ingest_core::store::KnowledgeStore;
    use kb_ingest_core::summarize::DisabledSummarizer;

    use crate::ingest::{Coordinator, RunWindow};
    use crate::upsert::RetryPolicy;

    fn connector(base_url: &str) -> WikiConnector {
        WikiConnector::new(
            DocsConfig {
                base_url: base_url.to_string(),
                space_key: "ENG".to_string(),
                email_env: "E".to_string(),
                token_env: "T".to_string(),
                limit: 50,
                timeout_secs: 5,
            },
            DocsCredentials {
                email: "a@b.c".to_string(),
                token: "t".to_string(),
            },
        )
        .unwrap()
    }

    #[derive(Clone, Copy)]
    enum Body {
        Ok,
        ServerError,
        Missing,
    }

    /// What the local wiki serves for page 42.
    struct Wiki {
        version: i64,
        body: Body,
    }

    /// Minimal HTTP/1.1 server answering the listing and body endpoints
    /// from `state`, one request per connection.
    async fn serve_wiki(state: Arc<Mutex<Wiki>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let state = state.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let mut read = 0;
                    while read < buf.len() {
                        let n = socket.read(&mut buf[read..]).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        read += n;
                        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let request = String::from_utf8_lossy(&buf[..read]).to_string();
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let (status, body) = {
                        let wiki = state.lock().unwrap();
                        respond(&wiki, &path)
                    };
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}", addr)
    }

    fn respond(wiki: &Wiki, path: &str) -> (&'static str, String) {
        if path.starts_with("/wiki/rest/api/content/42") {
            return match wiki.body {
                Body::Ok => (
                    "200 OK",
                    json!({
                        "id": "42",
                        "body": {"storage": {"value": format!("<p>Rollback steps, revision {}</p>", wiki.version)}}
                    })
                    .to_string(),
                ),
                Body::ServerError => (
                    "500 Internal Server Error",
                    json!({"message": "backend unavailable"}).to_string(),
                ),
                Body::Missing => ("200 OK", json!({"id": "42"}).to_string()),
            };
        }
        if path.starts_with("/wiki/rest/api/content?") {
            let listing = json!({
                "results": [{
                    "id": "42",
                    "title": "Runbook",
                    "space": {"key": "ENG"},
                    "version": {"number": wiki.version, "when": "2025-11-10T09:00:00.000Z"}
                }],
                "_links": {}
            });
            return ("200 OK", listing.to_string());
        }
        ("404 Not Found", "{}".to_string())
    }

    fn window() -> RunWindow {
        RunWindow {
            start: "2025-11-09T00:00:00Z".parse().unwrap(),
            end: "2025-11-12T00:00:00Z".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn unreadable_body_is_reported_not_emitted() {
        for body in [Body::ServerError, Body::Missing] {
            let state = Arc::new(Mutex::new(Wiki { version: 4, body }));
            let wiki = connector(&serve_wiki(state).await);
            let fetched = wiki.fetch(window().start, window().end).await.unwrap();
            assert!(fetched.pages.is_empty());
            assert_eq!(fetched.failed, vec!["42".to_string()]);
        }
    }

    #[tokio::test]
    async fn body_outage_does_not_wipe_stored_page() {
        let state = Arc::new(Mutex::new(Wiki {
            version: 3,
            body: Body::Ok,
        }));
        let wiki = connector(&serve_wiki(state.clone()).await);
        let store = InMemoryStore::new();
        let retry = RetryPolicy {
            attempts: 1,
            base_delay: Duration::from_millis(1),
        };
        let coordinator = Coordinator::new(&store, &DisabledSummarizer, retry, false);

        let stats = coordinator.sync_documents(&wiki, window()).await.unwrap();
        assert_eq!(stats.created, 1);

        *state.lock().unwrap() = Wiki {
            version: 4,
            body: Body::ServerError,
        };
        let stats = coordinator.sync_documents(&wiki, window()).await.unwrap();
        assert_eq!(stats.errored, 1);
        assert_eq!(stats.replaced, 0);
        let stored = store.list(Some(SourceKind::Document)).await.unwrap();
        assert_eq!(stored[0].version, Some(3));
        assert!(stored[0].raw_text.contains("Rollback steps, revision 3"));

        state.lock().unwrap().body = Body::Ok;
        let stats = coordinator.sync_documents(&wiki, window()).await.unwrap();
        assert_eq!(stats.replaced, 1);
        let stored = store.list(Some(SourceKind::Document)).await.unwrap();
        assert_eq!(stored[0].version, Some(4));
        assert!(stored[0].raw_text.contains("Rollback steps, revision 4"));
    }

    #[test]
    fn metadata_from_listing() {
        let page = json!({
            "id": "12345",
            "title": "Release Runbook",
            "space": {"key": "ENG"},
            "version": {
                "number": 7,
                "when": "2025-11-10T09:15:00.000Z",
                "by": {"displayName": "Bo"}
            }
        });
        let meta = page_metadata(&page, "FALLBACK").unwrap();
        assert_eq!(meta.page_id, "12345");
        assert_eq!(meta.version, Some(7));
        assert_eq!(meta.author.as_deref(), Some("Bo"));
        assert_eq!(meta.space_key, "ENG");
        assert_eq!(
            meta.modified_at.unwrap().to_rfc3339(),
            "2025-11-10T09:15:00+00:00"
        );
    }

    #[test]
    fn metadata_defaults() {
        let meta = page_metadata(&json!({"id": 9}), "OPS").unwrap();
        assert_eq!(meta.page_id, "9");
        assert_eq!(meta.title, "Untitled");
        assert_eq!(meta.space_key, "OPS");
        assert!(meta.version.is_none());
        assert!(page_metadata(&json!({"title": "x"}), "OPS").is_none());
    }

    #[test]
    fn urls_prefer_webui_link() {
        let connector = connector("https://acme.atlassian.net/");
        let linked = json!({"_links": {"webui": "/spaces/ENG/pages/1/Runbook"}});
        assert_eq!(
            connector.page_url(&linked, "1", "ENG"),
            "https://acme.atlassian.net/wiki/spaces/ENG/pages/1/Runbook"
        );
        assert_eq!(
            connector.page_url(&json!({}), "1", "ENG"),
            "https://acme.atlassian.net/wiki/spaces/ENG/pages/1"
        );
        assert_eq!(connector.auth_header, "Basic YUBiLmM6dA==");
    }
}

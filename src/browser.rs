use crate::config::BrowserConfig;
use crate::fetcher::Fetcher;
use crate::types::{PipelineError, Result};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_POLLS: u32 = 20;

#[derive(Debug, Deserialize)]
struct RenderSession {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RenderResult {
    status: String,
    #[serde(default)]
    html: Option<String>,
}

/// Fetches fully-rendered HTML for pages whose listings are assembled by
/// client-side scripts. When a rendering service is configured the page is
/// loaded through it; otherwise we fall back to a plain fetch, which is
/// sufficient for listings that are server-rendered.
pub struct BrowserFetcher {
    fetcher: Arc<Fetcher>,
    client: reqwest::Client,
    config: Option<BrowserConfig>,
}

impl BrowserFetcher {
    pub fn new(fetcher: Arc<Fetcher>, config: Option<BrowserConfig>) -> Self {
        Self {
            fetcher,
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Get the rendered document for `url`. Errors from the rendering
    /// service degrade to the plain fetch rather than failing the page.
    pub async fn fetch_rendered(&self, url: &str) -> Result<String> {
        let Some(config) = &self.config else {
            debug!(url, "No rendering service configured, fetching directly");
            return self.fetcher.fetch_text_decoded(url).await;
        };

        match self.render_remote(config, url).await {
            Ok(html) => Ok(html),
            Err(e) => {
                warn!(url, error = %e, "Rendering service failed, falling back to direct fetch");
                self.fetcher.fetch_text_decoded(url).await
            }
        }
    }

    async fn render_remote(&self, config: &BrowserConfig, url: &str) -> Result<String> {
        let session = self.start_session(config, url).await?;
        info!(session_id = %session.id, url, "Started render session");
        let guard = SessionGuard::new(self.client.clone(), config, session.id.clone());

        // Close on success and on failure; the guard's Drop covers the
        // case where this future is cancelled mid-render.
        let rendered = self.drive_session(config, &session.id, session.status).await;
        guard.close().await;
        rendered
    }

    async fn drive_session(
        &self,
        config: &BrowserConfig,
        id: &str,
        mut status: String,
    ) -> Result<String> {
        for _ in 0..MAX_POLLS {
            if status == "succeeded" || status == "failed" {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            status = self.poll_session(config, id).await?;
        }

        let result = self.session_result(config, id).await?;
        if result.status != "succeeded" {
            return Err(PipelineError::Upstream(format!(
                "render session ended with status {}",
                result.status
            )));
        }
        result
            .html
            .ok_or_else(|| PipelineError::Upstream("render session returned no html".to_string()))
    }

    async fn start_session(&self, config: &BrowserConfig, url: &str) -> Result<RenderSession> {
        let endpoint = format!("{}/sessions", config.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&config.token)
            .json(&json!({ "url": url, "waitUntil": "networkidle" }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PipelineError::Upstream(format!(
                "render service returned HTTP {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn poll_session(&self, config: &BrowserConfig, id: &str) -> Result<String> {
        let endpoint = format!("{}/sessions/{}", config.endpoint.trim_end_matches('/'), id);
        let session: RenderSession = self
            .client
            .get(&endpoint)
            .bearer_auth(&config.token)
            .send()
            .await?
            .json()
            .await?;
        Ok(session.status)
    }

    async fn session_result(&self, config: &BrowserConfig, id: &str) -> Result<RenderResult> {
        let endpoint = format!(
            "{}/sessions/{}/result",
            config.endpoint.trim_end_matches('/'),
            id
        );
        Ok(self
            .client
            .get(&endpoint)
            .bearer_auth(&config.token)
            .send()
            .await?
            .json()
            .await?)
    }

}

/// Owns a live render session id and guarantees its release. The normal
/// paths close explicitly via `close`; if the enclosing future is dropped
/// while a render is in flight, `Drop` hands the DELETE to the runtime.
struct SessionGuard {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    id: Option<String>,
}

impl SessionGuard {
    fn new(client: reqwest::Client, config: &BrowserConfig, id: String) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            id: Some(id),
        }
    }

    async fn close(mut self) {
        if let Some(id) = self.id.take() {
            close_session(&self.client, &self.endpoint, &self.token, &id).await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else { return };
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let token = self.token.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                close_session(&client, &endpoint, &token, &id).await;
            });
        }
    }
}

async fn close_session(client: &reqwest::Client, endpoint: &str, token: &str, id: &str) {
    let url = format!("{}/sessions/{}", endpoint, id);
    if let Err(e) = client.delete(&url).bearer_auth(token).send().await {
        debug!(session_id = id, error = %e, "Failed to close render session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    async fn handle(mut socket: TcpStream, deleted: Arc<Mutex<Vec<String>>>, poll_fails: bool) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let request_line = head.lines().next().unwrap_or_default().to_string();
        let content_length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }

        let (status, body) = if request_line.starts_with("POST /sessions") {
            ("200 OK", r#"{"id":"s1","status":"pending"}"#.to_string())
        } else if request_line.starts_with("DELETE /sessions/") {
            let path = request_line.split_whitespace().nth(1).unwrap_or_default();
            deleted.lock().unwrap().push(path.to_string());
            ("200 OK", "{}".to_string())
        } else if request_line.starts_with("GET /sessions/") {
            if poll_fails {
                ("500 Internal Server Error", String::new())
            } else {
                ("200 OK", r#"{"id":"s1","status":"running"}"#.to_string())
            }
        } else {
            ("200 OK", "<html><body>직접 가져온 본문</body></html>".to_string())
        };

        let response = format!(
            "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let _ = socket.write_all(response.as_bytes()).await;
    }

    /// Serves the render-session surface; `deleted` records every DELETE
    /// path that arrives.
    async fn spawn_render_service(poll_fails: bool) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&deleted);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(handle(socket, Arc::clone(&recorded), poll_fails));
            }
        });
        (base, deleted)
    }

    fn browser_for(base: &str) -> BrowserFetcher {
        BrowserFetcher::new(
            Arc::new(Fetcher::new(FetchConfig::default()).unwrap()),
            Some(BrowserConfig {
                endpoint: base.to_string(),
                token: "토큰".to_string(),
            }),
        )
    }

    #[tokio::test]
    async fn poll_failure_closes_the_session_and_falls_back() {
        let (base, deleted) = spawn_render_service(true).await;
        let browser = browser_for(&base);

        let html = browser
            .fetch_rendered(&format!("{}/page", base))
            .await
            .unwrap();
        assert!(html.contains("직접 가져온 본문"));
        assert!(deleted.lock().unwrap().iter().any(|p| p == "/sessions/s1"));
    }

    #[tokio::test]
    async fn cancelled_render_still_releases_the_session() {
        let (base, deleted) = spawn_render_service(false).await;
        let browser = browser_for(&base);

        // The service never finishes rendering; cancel mid-poll.
        let url = format!("{}/page", base);
        let render = browser.fetch_rendered(&url);
        let _ = tokio::time::timeout(Duration::from_millis(150), render).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(deleted.lock().unwrap().iter().any(|p| p == "/sessions/s1"));
    }
}

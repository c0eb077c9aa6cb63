use std::future::Future;
use std::time::Duration;

use chromiumoxide::Page;
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::browser::{self, BrowserError};
use crate::types::CoursePair;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("http_{0}")]
    Status(u16),
    #[error("{0}")]
    Transport(String),
    #[error("browser_error:{0}")]
    Browser(#[from] BrowserError),
}

impl FetchError {
    /// The skip-log reason for this failure.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// Something that can produce the raw class-data XML for one course pair.
pub trait ClassDataSource {
    fn fetch(&self, pair: &CoursePair) -> impl Future<Output = Result<String, FetchError>>;
}

// Runs inside the page so the request carries the site's cookies, clock and timezone.
const PAGE_FETCH_JS: &str = r#"
async ([base, term, target, timeoutMs]) => {
  const url = `${base}/api/class-data?term=${term}&course_0_0=${encodeURIComponent(target)}&nouser=1&_=${Date.now()}`;
  const ctrl = new AbortController();
  const timer = setTimeout(() => ctrl.abort("timeout"), timeoutMs);
  try {
    const res = await fetch(url, { method: "GET", credentials: "include", signal: ctrl.signal });
    if (!res.ok) return { kind: "http", status: res.status };
    return { kind: "ok", body: await res.text() };
  } catch (e) {
    const message = typeof e === "string" ? e : (e && e.message) || "fetch_error";
    return { kind: "error", message };
  } finally {
    clearTimeout(timer);
  }
}
"#;

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum PageReply {
    Ok { body: String },
    Http { status: u16 },
    Error { message: String },
}

/// Replays the class-data API through `fetch` calls evaluated in a live page.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    page: Page,
    base_url: String,
    term: String,
    timeout: Duration,
}

impl PageFetcher {
    pub fn new(page: Page, base_url: &str, term: &str, timeout: Duration) -> Self {
        Self {
            page,
            base_url: base_url.trim_end_matches('/').to_string(),
            term: term.to_string(),
            timeout,
        }
    }
}

impl ClassDataSource for PageFetcher {
    async fn fetch(&self, pair: &CoursePair) -> Result<String, FetchError> {
        let args = serde_json::to_string(&(
            &self.base_url,
            &self.term,
            pair.target(),
            self.timeout.as_millis() as u64,
        ))
        .map_err(BrowserError::from)?;
        let reply: PageReply =
            browser::evaluate(&self.page, format!("({})({})", PAGE_FETCH_JS.trim(), args)).await?;

        match reply {
            PageReply::Ok { body } => Ok(body),
            PageReply::Http { status } => Err(FetchError::Status(status)),
            PageReply::Error { message } => Err(FetchError::Transport(message)),
        }
    }
}

/// Plain HTTP client for deployments that do not enforce page-context checks.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: String,
    term: String,
}

impl HttpFetcher {
    pub fn new(base_url: &str, term: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!(
                "{}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            term: term.to_string(),
        })
    }

    pub fn class_data_url(&self, pair: &CoursePair) -> Result<Url, FetchError> {
        let target = pair.target();
        let cache_buster = chrono::Utc::now().timestamp_millis().to_string();
        Url::parse_with_params(
            &format!("{}/api/class-data", self.base_url),
            &[
                ("term", self.term.as_str()),
                ("course_0_0", target.as_str()),
                ("nouser", "1"),
                ("_", cache_buster.as_str()),
            ],
        )
        .map_err(|e| FetchError::Transport(e.to_string()))
    }
}

impl ClassDataSource for HttpFetcher {
    async fn fetch(&self, pair: &CoursePair) -> Result<String, FetchError> {
        let url = self.class_data_url(pair)?;
        log::debug!("GET {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Transport("timeout".to_string())
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response
            .text()
            .await
            .inspect_err(|e| log::error!("Decode error: {e:?}"))
            .map_err(|e| FetchError::Transport(e.to_string()))
    }
}

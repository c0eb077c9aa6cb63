//! Browser session plumbing shared by the catalog paginator and the timetable clients.

use std::path::Path;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Browser configuration error: {0}")]
    Config(String),
    #[error("CDP error: {0}")]
    Cdp(#[from] CdpError),
    #[error("Timed out after {timeout:?} waiting for {selector}")]
    Timeout { selector: String, timeout: Duration },
    #[error("Unexpected script result: {0}")]
    Script(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub window: (u32, u32),
    pub user_agent: Option<String>,
    pub timezone: Option<String>,
    pub locale: Option<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            window: (1400, 2000),
            user_agent: None,
            timezone: None,
            locale: None,
        }
    }
}

/// A launched browser and the task driving its CDP connection.
pub struct Session {
    browser: Browser,
    handler: JoinHandle<()>,
    options: LaunchOptions,
}

impl Session {
    pub async fn launch(options: LaunchOptions) -> Result<Self, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .window_size(options.window.0, options.window.1)
            .arg("--no-sandbox")
            .arg("--disable-gpu");
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::Config)?;

        log::debug!("Launching browser (headless: {})", options.headless);
        let (browser, mut handler) = Browser::launch(config)
            .await
            .inspect_err(|e| log::error!("Failed to launch browser: {e}"))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    log::debug!("Browser handler stopped: {e}");
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            handler,
            options,
        })
    }

    /// Opens a page with the configured user agent, timezone and locale applied.
    pub async fn new_page(&self, url: &str) -> Result<Page, BrowserError> {
        let page = self.browser.new_page("about:blank").await?;
        if let Some(user_agent) = &self.options.user_agent {
            page.set_user_agent(SetUserAgentOverrideParams::new(user_agent.as_str()))
                .await?;
        }
        if let Some(timezone) = &self.options.timezone {
            page.execute(SetTimezoneOverrideParams::new(timezone.as_str()))
                .await?;
        }
        if let Some(locale) = &self.options.locale {
            page.execute(SetLocaleOverrideParams {
                locale: Some(locale.clone()),
            })
            .await?;
        }
        if url != "about:blank" {
            log::info!("Opening {}", url);
            page.goto(url).await?;
        }
        Ok(page)
    }

    pub async fn close(mut self) -> Result<(), BrowserError> {
        self.browser.close().await?;
        self.browser.wait().await?;
        self.handler.abort();
        Ok(())
    }
}

/// Polls for `selector` until it appears or `timeout` elapses.
pub async fn wait_for_selector(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> Result<Element, BrowserError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Ok(element);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(BrowserError::Timeout {
                selector: selector.to_string(),
                timeout,
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Evaluates an expression, awaiting promises, and decodes its JSON value.
pub async fn evaluate<T: serde::de::DeserializeOwned>(
    page: &Page,
    expression: String,
) -> Result<T, BrowserError> {
    let params = EvaluateParams::builder()
        .expression(expression)
        .await_promise(true)
        .return_by_value(true)
        .build()
        .map_err(BrowserError::Config)?;
    let result = page.evaluate_expression(params).await?;
    Ok(result.into_value()?)
}

/// Writes a full-page PNG. Failures are logged, never returned.
pub async fn screenshot(page: &Page, path: &Path) {
    if let Some(parent) = path.parent()
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        log::warn!("Could not create {}: {e}", parent.display());
        return;
    }
    let params = ScreenshotParams::builder()
        .format(CaptureScreenshotFormat::Png)
        .full_page(true)
        .build();
    match page.save_screenshot(params, path).await {
        Ok(_) => log::info!("Saved screenshot {}", path.display()),
        Err(e) => log::warn!("Screenshot {} failed: {e}", path.display()),
    }
}

use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use super::harvest::{HarvestConfig, Harvester};
use super::skiplog::SkipLog;
use super::source::{FetchError, HttpFetcher, PageFetcher};
use super::ui::{PageSearch, UiConfig, UiDriver, UiSelectors};
use crate::browser::{BrowserError, LaunchOptions, Session};
use crate::codes::{ExtractError, read_course_pairs};
use crate::store::{Store, StoreError};
use crate::utils::Tally;

#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    #[error(transparent)]
    Input(#[from] ExtractError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("Source error: {0}")]
    Source(#[from] FetchError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where class-data bodies come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Same-origin fetches evaluated inside one live page.
    Api,
    /// Typing each course into the search box and capturing the response.
    Ui,
    /// Plain HTTP requests with no browser.
    Direct,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: Mode,
    pub codes: PathBuf,
    pub db: PathBuf,
    pub skip_log: PathBuf,
    pub logs_dir: PathBuf,
    pub base_url: String,
    pub term: String,
    /// Drop every block row before the run.
    pub fresh: bool,
    pub request_timeout: Duration,
    pub launch: LaunchOptions,
    pub harvest: HarvestConfig,
    pub ui: UiConfig,
    pub selectors: UiSelectors,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Api,
            codes: PathBuf::from("course_codes.txt"),
            db: PathBuf::from("mytimetable.db"),
            skip_log: PathBuf::from("skipped_courses.txt"),
            logs_dir: PathBuf::from("logs"),
            base_url: crate::BASE_URL.to_string(),
            term: crate::TERM.to_string(),
            fresh: false,
            request_timeout: Duration::from_millis(crate::REQUEST_TIMEOUT_MS),
            launch: LaunchOptions {
                user_agent: Some(crate::USER_AGENT.to_string()),
                timezone: Some(crate::TIMEZONE.to_string()),
                locale: Some(crate::LOCALE.to_string()),
                ..Default::default()
            },
            harvest: HarvestConfig::default(),
            ui: UiConfig::default(),
            selectors: UiSelectors::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tally: Tally,
    pub db: PathBuf,
    pub skip_log: PathBuf,
}

impl Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tally)?;
        writeln!(f, "  DB:       {}", self.db.display())?;
        writeln!(f, "  Skip log: {}", self.skip_log.display())
    }
}

/// Reads the course list, then harvests every pair into the database.
///
/// A missing course list fails before the database or a browser is touched.
pub async fn run(config: &RunConfig) -> Result<RunReport, HarvestError> {
    let pairs = read_course_pairs(&config.codes)
        .inspect_err(|e| log::error!("Cannot start harvest: {e}"))?;

    let store = Store::open(&config.db).await?;
    if config.fresh {
        let removed = store.clear_blocks().await?;
        log::info!("Cleared {} block row(s)", removed);
    }
    let mut skip_log = SkipLog::create(&config.skip_log).await?;

    log::info!(
        "[{}] harvesting {} pair(s) for term {}",
        chrono::Local::now().format("%H:%M:%S"),
        pairs.len(),
        config.term
    );

    let tally = match config.mode {
        Mode::Direct => {
            let source = HttpFetcher::new(&config.base_url, &config.term, config.request_timeout)?;
            Harvester::new(&source, &store, config.harvest)
                .run(&pairs, &mut skip_log)
                .await
        }
        Mode::Api => {
            let session = Session::launch(config.launch.clone()).await?;
            let page = session
                .new_page(&format!(
                    "{}/criteria.jsp",
                    config.base_url.trim_end_matches('/')
                ))
                .await?;
            let source = PageFetcher::new(
                page,
                &config.base_url,
                &config.term,
                config.request_timeout,
            );
            let tally = Harvester::new(&source, &store, config.harvest)
                .run(&pairs, &mut skip_log)
                .await;
            close(session).await;
            tally
        }
        Mode::Ui => {
            let session = Session::launch(config.launch.clone()).await?;
            let search = PageSearch::open(
                &session,
                &config.base_url,
                config.selectors.clone(),
                config.logs_dir.clone(),
            )
            .await?;
            let tally = UiDriver::new(&search, &store, config.ui)
                .run(&pairs, &mut skip_log)
                .await;
            close(session).await;
            tally
        }
    };

    Ok(RunReport {
        tally,
        db: config.db.clone(),
        skip_log: skip_log.path().to_path_buf(),
    })
}

async fn close(session: Session) {
    if let Err(e) = session.close().await {
        log::warn!("Browser did not close cleanly: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_codes_aborts_before_db() {
        let dir = std::env::temp_dir().join(format!("classlist-{}-run", std::process::id()));
        let config = RunConfig {
            mode: Mode::Direct,
            codes: dir.join("course_codes.txt"),
            db: dir.join("mytimetable.db"),
            skip_log: dir.join("skipped_courses.txt"),
            ..Default::default()
        };

        let result = run(&config).await;

        assert!(matches!(
            result,
            Err(HarvestError::Input(ExtractError::MissingInput(_)))
        ));
        assert!(!config.db.exists());
        assert!(!config.skip_log.exists());
    }

    #[test]
    fn test_report_display() {
        let report = RunReport {
            tally: Tally {
                saved: 1,
                skipped: 1,
                failed: 0,
            },
            db: PathBuf::from("mytimetable.db"),
            skip_log: PathBuf::from("skipped_courses.txt"),
        };
        let text = report.to_string();
        assert!(text.contains("Saved:   1"));
        assert!(text.contains("DB:       mytimetable.db"));
        assert!(text.contains("Skip log: skipped_courses.txt"));
    }
}

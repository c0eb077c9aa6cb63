use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chromiumoxide::Page;

use super::parser::{CatalogPage, TABLE_CONTAINER, parse_catalog_page, parse_last_page};
use crate::browser::{self, BrowserError, Session};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub url: String,
    pub start_page: u32,
    /// Overrides pagination detection when set.
    pub end_page: Option<u32>,
    pub output: PathBuf,
    pub logs_dir: PathBuf,
    pub table_timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: crate::CATALOG_URL.to_string(),
            start_page: 1,
            end_page: None,
            output: PathBuf::from("course_names.csv"),
            logs_dir: PathBuf::from("logs"),
            table_timeout: Duration::from_secs(25),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CatalogSummary {
    pub pages: u32,
    pub names: usize,
    pub failed_rows: usize,
}

impl Display for CatalogSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nCatalog:")?;
        writeln!(f, "  Pages scraped: {}", self.pages)?;
        writeln!(f, "  Course names:  {}", self.names)?;
        writeln!(f, "  Failed rows:   {}", self.failed_rows)
    }
}

/// Walks the calendar's paginated course list and writes every course name to a CSV.
pub struct CatalogScraper<'a> {
    session: &'a Session,
    config: CatalogConfig,
}

impl<'a> CatalogScraper<'a> {
    pub fn new(session: &'a Session, config: CatalogConfig) -> Self {
        Self { session, config }
    }

    pub async fn run(&self) -> Result<CatalogSummary, CatalogError> {
        log::info!(
            "[{}] starting scrape of names only",
            chrono::Local::now().format("%H:%M:%S")
        );

        let page = self.session.new_page(&self.config.url).await?;
        self.wait_for_table(&page).await?;

        let html = page.content().await.map_err(BrowserError::from)?;
        let last_page = self
            .config
            .end_page
            .or_else(|| parse_last_page(&html))
            .unwrap_or(crate::FALLBACK_LAST_PAGE);
        log::info!("Using last page: {}", last_page);

        let mut writer = csv::Writer::from_path(&self.config.output)?;
        writer.write_record(["Course Name"])?;

        let mut summary = CatalogSummary::default();
        let mut current = self.config.start_page.max(1);
        if current > 1 && !self.goto_page(&page, current).await? {
            log::error!("could not click Page {}", current);
            return Ok(summary);
        }

        loop {
            let html = page.content().await.map_err(BrowserError::from)?;
            let parsed = parse_catalog_page(&html);
            log::info!("Page {}: found {} rows", current, parsed.rows_found);

            for name in &parsed.names {
                writer.write_record([name])?;
                log::debug!("✓ {}", name);
            }
            writer.flush()?;
            self.dump_failures(&page, current, &parsed).await;

            summary.pages += 1;
            summary.names += parsed.names.len();
            summary.failed_rows += parsed.failures.len();

            if current >= last_page {
                break;
            }
            current += 1;
            match self.goto_page(&page, current).await {
                Ok(true) => {}
                Ok(false) => {
                    log::error!("could not click Page {}: control not found", current);
                    break;
                }
                Err(e) => {
                    log::error!("could not click Page {}: {}", current, e);
                    break;
                }
            }
        }

        log::info!(
            "[{}] done. wrote {}",
            chrono::Local::now().format("%H:%M:%S"),
            self.config.output.display()
        );
        Ok(summary)
    }

    async fn wait_for_table(&self, page: &Page) -> Result<(), BrowserError> {
        browser::wait_for_selector(page, TABLE_CONTAINER, self.config.table_timeout).await?;
        Ok(())
    }

    async fn goto_page(&self, page: &Page, number: u32) -> Result<bool, BrowserError> {
        let label = serde_json::to_string(&format!("[aria-label=\"Page {number}\"]"))?;
        let clicked: bool = browser::evaluate(
            page,
            format!(
                "(() => {{ const b = document.querySelector({label}); \
                 if (!b) return false; b.click(); return true; }})()"
            ),
        )
        .await?;
        if !clicked {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.wait_for_table(page).await?;
        Ok(true)
    }

    async fn dump_failures(&self, page: &Page, page_number: u32, parsed: &CatalogPage) {
        for failure in &parsed.failures {
            let stem = format!("page_{}_row_{}", page_number, failure.index);
            let png = self.config.logs_dir.join(format!("{stem}.png"));
            let html = self.config.logs_dir.join(format!("{stem}.html"));

            browser::screenshot(page, &png).await;
            if let Err(e) = write_artifact(&html, &failure.html).await {
                log::warn!("Could not write {}: {}", html.display(), e);
            }
            log::warn!(
                "row {}: failed ({}) → saved {} / {}",
                failure.index,
                failure.error,
                file_name(&png),
                file_name(&html)
            );
        }
    }
}

async fn write_artifact(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

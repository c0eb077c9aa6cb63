use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use serde::Deserialize;

use super::harvest::{ingest, record};
use super::skiplog::SkipLog;
use crate::browser::{self, BrowserError, Session};
use crate::store::Store;
use crate::types::CoursePair;
use crate::utils::{Outcome, Tally, truncate};

/// What the page showed after a course search was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    NotFound,
    WrongTerm,
    Response(String),
}

impl Signal {
    pub fn from_toast(text: &str) -> Option<Signal> {
        let text = text.to_lowercase();
        if text.contains("could not be found") {
            Some(Signal::NotFound)
        } else if text.contains("only available") {
            Some(Signal::WrongTerm)
        } else {
            None
        }
    }
}

/// The add/remove course surface of the timetable UI.
pub trait CourseSearch {
    fn submit(&self, pair: &CoursePair) -> impl Future<Output = Result<(), BrowserError>>;
    fn poll(&self, pair: &CoursePair) -> impl Future<Output = Result<Option<Signal>, BrowserError>>;
    fn clear_selections(&self) -> impl Future<Output = Result<usize, BrowserError>>;
    /// Removes toasts left on the page by earlier searches.
    fn dismiss_notices(&self) -> impl Future<Output = Result<usize, BrowserError>>;
    /// Reloads the search page from scratch.
    fn reload(&self) -> impl Future<Output = Result<(), BrowserError>>;
    fn capture_debug(&self, name: &str) -> impl Future<Output = ()>;
}

#[derive(Debug, Clone, Copy)]
pub struct UiConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_millis(crate::SLOW_TIMEOUT_MS),
        }
    }
}

/// Polls until the page settles on a signal or the timeout elapses.
pub async fn race<C: CourseSearch>(
    search: &C,
    pair: &CoursePair,
    config: UiConfig,
) -> Result<Option<Signal>, BrowserError> {
    let deadline = tokio::time::Instant::now() + config.timeout;
    loop {
        if let Some(signal) = search.poll(pair).await? {
            return Ok(Some(signal));
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(config.poll_interval).await;
    }
}

/// Drives the UI one course pair at a time.
pub struct UiDriver<'a, C> {
    search: &'a C,
    store: &'a Store,
    config: UiConfig,
}

impl<'a, C: CourseSearch> UiDriver<'a, C> {
    pub fn new(search: &'a C, store: &'a Store, config: UiConfig) -> Self {
        Self {
            search,
            store,
            config,
        }
    }

    pub async fn run(&self, pairs: &[CoursePair], skip_log: &mut SkipLog) -> Tally {
        let mut tally = Tally::default();
        let mut dirty = false;
        log::info!("Total inputs: {}", pairs.len());

        for pair in pairs {
            // A pair never runs on a page that still holds another pair's state.
            if dirty && !self.reload(pair).await {
                let outcome = Outcome::Skipped("ui_reset_failed".to_string());
                record(&mut tally, skip_log, pair, &outcome).await;
                continue;
            }

            let outcome = match self.process_one(pair).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!("{} ui error: {}", pair, e);
                    self.search
                        .capture_debug(&format!("ui_{}_{}", pair.subject, pair.number))
                        .await;
                    Outcome::Failed(format!("ui_error:{}", truncate(&e.to_string(), 120)))
                }
            };
            dirty = !self.reset(pair).await;

            record(&mut tally, skip_log, pair, &outcome).await;
        }

        tally
    }

    /// Removes every selection added for `pair`, reloading the page if that fails.
    async fn reset(&self, pair: &CoursePair) -> bool {
        match self.search.clear_selections().await {
            Ok(removed) => {
                log::debug!("Removed {} selection(s) after {}", removed, pair);
                true
            }
            Err(e) => {
                log::warn!("Could not clear selections after {}: {}; reloading", pair, e);
                self.reload(pair).await
            }
        }
    }

    async fn reload(&self, pair: &CoursePair) -> bool {
        match self.search.reload().await {
            Ok(()) => true,
            Err(e) => {
                log::error!("Could not reload the search page around {}: {}", pair, e);
                false
            }
        }
    }

    async fn process_one(&self, pair: &CoursePair) -> Result<Outcome, BrowserError> {
        let stale = self.search.dismiss_notices().await?;
        if stale > 0 {
            log::debug!("Dismissed {} stale notice(s) before {}", stale, pair);
        }
        self.search.submit(pair).await?;

        Ok(match race(self.search, pair, self.config).await? {
            Some(Signal::NotFound) => Outcome::Skipped("skip_not_found".to_string()),
            Some(Signal::WrongTerm) => Outcome::Skipped("skip_wrong_term".to_string()),
            Some(Signal::Response(body)) => ingest(self.store, pair, &body).await,
            None => Outcome::Skipped("no_option".to_string()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct UiSelectors {
    pub search_input: String,
    pub toast: String,
    pub remove_button: String,
}

impl Default for UiSelectors {
    fn default() -> Self {
        Self {
            search_input: "#code_number".to_string(),
            toast: ".toast, .alert, [role=alert]".to_string(),
            remove_button: ".course_box .remove_course_button, a[title=\"Remove\"]".to_string(),
        }
    }
}

// Records class-data responses so the polling loop can pick them up.
const CAPTURE_JS: &str = r#"
(() => {
  if (window.__classlistCapture) return;
  window.__classlistCapture = [];
  const keep = (url, body) => {
    if (String(url).includes("api/class-data")) window.__classlistCapture.push({ url: String(url), body });
  };
  const nativeFetch = window.fetch;
  window.fetch = async (...args) => {
    const res = await nativeFetch(...args);
    try {
      const url = res.url || String(args[0]);
      if (url.includes("api/class-data")) res.clone().text().then((body) => keep(url, body));
    } catch (e) {}
    return res;
  };
  const open = XMLHttpRequest.prototype.open;
  XMLHttpRequest.prototype.open = function (method, url, ...rest) {
    this.__classlistUrl = url;
    return open.call(this, method, url, ...rest);
  };
  const send = XMLHttpRequest.prototype.send;
  XMLHttpRequest.prototype.send = function (...args) {
    this.addEventListener("load", () => keep(this.__classlistUrl, this.responseText));
    return send.apply(this, args);
  };
})();
"#;

#[derive(Debug, Deserialize)]
struct PollReply {
    toast: String,
    body: Option<String>,
}

/// [`CourseSearch`] over a live timetable page.
pub struct PageSearch {
    page: Page,
    criteria_url: String,
    selectors: UiSelectors,
    logs_dir: PathBuf,
    ui_timeout: Duration,
}

impl PageSearch {
    pub async fn open(
        session: &Session,
        base_url: &str,
        selectors: UiSelectors,
        logs_dir: PathBuf,
    ) -> Result<Self, BrowserError> {
        let page = session.new_page("about:blank").await?;
        page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(CAPTURE_JS))
            .await?;
        let criteria_url = format!("{}/criteria.jsp", base_url.trim_end_matches('/'));
        log::info!("Opening {}", criteria_url);
        page.goto(criteria_url.as_str()).await?;

        let ui_timeout = Duration::from_millis(crate::UI_TIMEOUT_MS);
        browser::wait_for_selector(
            &page,
            &selectors.search_input,
            Duration::from_millis(crate::SLOW_TIMEOUT_MS),
        )
        .await?;

        Ok(Self {
            page,
            criteria_url,
            selectors,
            logs_dir,
            ui_timeout,
        })
    }

    fn js_string(value: &str) -> Result<String, BrowserError> {
        Ok(serde_json::to_string(value)?)
    }
}

impl CourseSearch for PageSearch {
    async fn submit(&self, pair: &CoursePair) -> Result<(), BrowserError> {
        let input = Self::js_string(&self.selectors.search_input)?;
        let _: bool = browser::evaluate(
            &self.page,
            format!(
                "(() => {{ window.__classlistCapture = []; \
                 const el = document.querySelector({input}); \
                 if (el) el.value = ''; return !!el; }})()"
            ),
        )
        .await?;

        let element =
            browser::wait_for_selector(&self.page, &self.selectors.search_input, self.ui_timeout)
                .await?;
        element.click().await?;
        element.type_str(pair.to_string()).await?;
        element.press_key("Enter").await?;
        Ok(())
    }

    async fn poll(&self, pair: &CoursePair) -> Result<Option<Signal>, BrowserError> {
        let toast = Self::js_string(&self.selectors.toast)?;
        let target = Self::js_string(&pair.target())?;
        let reply: PollReply = browser::evaluate(
            &self.page,
            format!(
                "(() => {{ \
                 const toast = Array.from(document.querySelectorAll({toast})) \
                   .map((e) => e.innerText || '').join('\\n'); \
                 const key = 'course_0_0=' + encodeURIComponent({target}); \
                 const hit = (window.__classlistCapture || []).find((r) => r.url.includes(key)); \
                 return {{ toast, body: hit ? hit.body : null }}; }})()"
            ),
        )
        .await?;

        if let Some(signal) = Signal::from_toast(&reply.toast) {
            return Ok(Some(signal));
        }
        Ok(reply.body.map(Signal::Response))
    }

    async fn clear_selections(&self) -> Result<usize, BrowserError> {
        let remove = Self::js_string(&self.selectors.remove_button)?;
        let script = format!(
            "(() => {{ const buttons = Array.from(document.querySelectorAll({remove})); \
             buttons.forEach((b) => b.click()); return buttons.length; }})()"
        );

        let deadline = tokio::time::Instant::now() + self.ui_timeout;
        let mut removed = 0;
        loop {
            let clicked: usize = browser::evaluate(&self.page, script.clone()).await?;
            if clicked == 0 {
                return Ok(removed);
            }
            removed += clicked;
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    selector: self.selectors.remove_button.clone(),
                    timeout: self.ui_timeout,
                });
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn dismiss_notices(&self) -> Result<usize, BrowserError> {
        let toast = Self::js_string(&self.selectors.toast)?;
        browser::evaluate(
            &self.page,
            format!(
                "(() => {{ const nodes = Array.from(document.querySelectorAll({toast})); \
                 nodes.forEach((n) => n.remove()); return nodes.length; }})()"
            ),
        )
        .await
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        log::info!("Reloading {}", self.criteria_url);
        self.page.goto(self.criteria_url.as_str()).await?;
        browser::wait_for_selector(
            &self.page,
            &self.selectors.search_input,
            Duration::from_millis(crate::SLOW_TIMEOUT_MS),
        )
        .await?;
        Ok(())
    }

    async fn capture_debug(&self, name: &str) {
        browser::screenshot(&self.page, &self.logs_dir.join(format!("{name}.png"))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::fs;

    #[derive(Default)]
    struct StubSearch {
        script: RefCell<VecDeque<Result<Option<Signal>, ()>>>,
        events: RefCell<Vec<String>>,
        selected: RefCell<usize>,
        // A not-found or wrong-term toast stays on the page until dismissed.
        toast: RefCell<Option<Signal>>,
        current: RefCell<String>,
        fail_submit_for: Option<String>,
        fail_clear_for: Option<String>,
        fail_reload: bool,
    }

    impl StubSearch {
        fn with_script(script: Vec<Result<Option<Signal>, ()>>) -> Self {
            Self {
                script: RefCell::new(script.into()),
                ..Default::default()
            }
        }
    }

    impl CourseSearch for StubSearch {
        async fn submit(&self, pair: &CoursePair) -> Result<(), BrowserError> {
            assert_eq!(*self.selected.borrow(), 0, "Selections leaked into {pair}");
            self.events.borrow_mut().push(format!("submit {pair}"));
            *self.current.borrow_mut() = pair.to_string();
            *self.selected.borrow_mut() += 1;
            if self.fail_submit_for.as_deref() == Some(pair.to_string().as_str()) {
                return Err(BrowserError::Config("search box detached".into()));
            }
            Ok(())
        }

        async fn poll(&self, _pair: &CoursePair) -> Result<Option<Signal>, BrowserError> {
            if let Some(toast) = self.toast.borrow().clone() {
                return Ok(Some(toast));
            }
            match self.script.borrow_mut().pop_front() {
                Some(Ok(signal)) => {
                    if matches!(signal, Some(Signal::NotFound | Signal::WrongTerm)) {
                        *self.toast.borrow_mut() = signal.clone();
                    }
                    Ok(signal)
                }
                Some(Err(())) => Err(BrowserError::Config("page crashed".into())),
                None => Ok(None),
            }
        }

        async fn clear_selections(&self) -> Result<usize, BrowserError> {
            self.events.borrow_mut().push("clear".into());
            if self.fail_clear_for.as_deref() == Some(self.current.borrow().as_str()) {
                return Err(BrowserError::Config("remove button detached".into()));
            }
            Ok(std::mem::take(&mut *self.selected.borrow_mut()))
        }

        async fn dismiss_notices(&self) -> Result<usize, BrowserError> {
            self.events.borrow_mut().push("dismiss".into());
            Ok(usize::from(self.toast.borrow_mut().take().is_some()))
        }

        async fn reload(&self) -> Result<(), BrowserError> {
            self.events.borrow_mut().push("reload".into());
            if self.fail_reload {
                return Err(BrowserError::Config("navigation failed".into()));
            }
            *self.selected.borrow_mut() = 0;
            *self.toast.borrow_mut() = None;
            Ok(())
        }

        async fn capture_debug(&self, name: &str) {
            self.events.borrow_mut().push(format!("screenshot {name}"));
        }
    }

    fn fast() -> UiConfig {
        UiConfig {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(20),
        }
    }

    fn pair(line: &str) -> CoursePair {
        line.parse().expect("Should parse pair")
    }

    #[test]
    fn test_signal_from_toast() {
        assert_eq!(
            Signal::from_toast("MATH 9Z99 could not be found."),
            Some(Signal::NotFound)
        );
        assert_eq!(
            Signal::from_toast("This course is Only Available in Winter"),
            Some(Signal::WrongTerm)
        );
        assert_eq!(Signal::from_toast(""), None);
    }

    #[tokio::test]
    async fn test_race_returns_first_signal() {
        let search = StubSearch::with_script(vec![Ok(None), Ok(None), Ok(Some(Signal::WrongTerm))]);
        let result = race(&search, &pair("MATH 1ZB3"), fast()).await;
        assert_eq!(result.expect("Should not error"), Some(Signal::WrongTerm));
    }

    #[tokio::test]
    async fn test_race_times_out() {
        let search = StubSearch::default();
        let result = race(&search, &pair("MATH 1ZB3"), fast()).await;
        assert_eq!(result.expect("Should not error"), None);
    }

    #[tokio::test]
    async fn test_driver_outcomes_and_isolation() {
        let xml = fs::read_to_string("fixtures/class_data_math_1zb3.xml")
            .expect("Failed to read fixture");
        let mut search = StubSearch::with_script(vec![
            Ok(Some(Signal::Response(xml))),
            Ok(Some(Signal::NotFound)),
            Ok(Some(Signal::WrongTerm)),
            Err(()),
        ]);
        search.fail_submit_for = Some("ENGL 1A03".into());

        let store = Store::in_memory().await.expect("Failed to open store");
        let log_path =
            std::env::temp_dir().join(format!("classlist-{}-ui-skips.txt", std::process::id()));
        let mut skip_log = SkipLog::create(&log_path).await.expect("Failed to create log");

        let input: Vec<CoursePair> = [
            "MATH 1ZB3",
            "FAKE 9999",
            "MATH 3X03",
            "CHEM 1A03",
            "ENGL 1A03",
            "PHYS 1D03",
        ]
        .iter()
        .map(|l| pair(l))
        .collect();

        let tally = UiDriver::new(&search, &store, fast())
            .run(&input, &mut skip_log)
            .await;

        assert_eq!(
            tally,
            Tally {
                saved: 1,
                skipped: 3,
                failed: 2
            }
        );

        let events = search.events.borrow();
        let clears = events.iter().filter(|e| *e == "clear").count();
        assert_eq!(clears, input.len(), "Selections cleared after every pair");
        assert!(events.contains(&"screenshot ui_CHEM_1A03".to_string()));
        assert!(events.contains(&"screenshot ui_ENGL_1A03".to_string()));
        assert_eq!(events.last().map(String::as_str), Some("clear"));

        let log = fs::read_to_string(&log_path).expect("Failed to read skip log");
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines[0], "FAKE 9999\tskip_not_found");
        assert_eq!(lines[1], "MATH 3X03\tskip_wrong_term");
        assert!(lines[2].starts_with("CHEM 1A03\tui_error:"));
        assert!(lines[3].starts_with("ENGL 1A03\tui_error:"));
        assert_eq!(lines[4], "PHYS 1D03\tno_option");

        assert_eq!(store.counts().await.expect("Failed to count").courses, 1);
        fs::remove_file(&log_path).ok();
    }

    fn math_1zb3() -> String {
        fs::read_to_string("fixtures/class_data_math_1zb3.xml").expect("Failed to read fixture")
    }

    fn temp_log(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("classlist-{}-{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn test_driver_dismisses_stale_toasts() {
        let search = StubSearch::with_script(vec![
            Ok(Some(Signal::NotFound)),
            Ok(Some(Signal::Response(math_1zb3()))),
        ]);
        let store = Store::in_memory().await.expect("Failed to open store");
        let log_path = temp_log("ui-stale-toast.txt");
        let mut skip_log = SkipLog::create(&log_path).await.expect("Failed to create log");

        let input = vec![pair("FAKE 9999"), pair("MATH 1ZB3")];
        let tally = UiDriver::new(&search, &store, fast())
            .run(&input, &mut skip_log)
            .await;

        assert_eq!(
            tally,
            Tally {
                saved: 1,
                skipped: 1,
                failed: 0
            }
        );
        let events = search.events.borrow();
        let dismiss = events.iter().rposition(|e| e == "dismiss");
        let submit = events.iter().position(|e| e == "submit MATH 1ZB3");
        assert!(dismiss < submit, "Toasts dismissed before the next search");

        let log = fs::read_to_string(&log_path).expect("Failed to read skip log");
        assert_eq!(log, "FAKE 9999\tskip_not_found\n");
        fs::remove_file(&log_path).ok();
    }

    #[tokio::test]
    async fn test_driver_reloads_when_clear_fails() {
        let mut search = StubSearch::with_script(vec![
            Ok(Some(Signal::Response(math_1zb3()))),
            Ok(Some(Signal::WrongTerm)),
        ]);
        search.fail_clear_for = Some("MATH 1ZB3".into());

        let store = Store::in_memory().await.expect("Failed to open store");
        let log_path = temp_log("ui-reload.txt");
        let mut skip_log = SkipLog::create(&log_path).await.expect("Failed to create log");

        let input = vec![pair("MATH 1ZB3"), pair("CHEM 1A03")];
        let tally = UiDriver::new(&search, &store, fast())
            .run(&input, &mut skip_log)
            .await;

        assert_eq!(
            tally,
            Tally {
                saved: 1,
                skipped: 1,
                failed: 0
            }
        );
        let events = search.events.borrow();
        let reload = events.iter().position(|e| e == "reload");
        let submit = events.iter().position(|e| e == "submit CHEM 1A03");
        assert!(reload.is_some());
        assert!(reload < submit, "Page reloaded before the next search");
        fs::remove_file(&log_path).ok();
    }

    #[tokio::test]
    async fn test_driver_skips_pairs_when_reset_fails() {
        let mut search = StubSearch::with_script(vec![Ok(Some(Signal::Response(math_1zb3())))]);
        search.fail_clear_for = Some("MATH 1ZB3".into());
        search.fail_reload = true;

        let store = Store::in_memory().await.expect("Failed to open store");
        let log_path = temp_log("ui-reset-failed.txt");
        let mut skip_log = SkipLog::create(&log_path).await.expect("Failed to create log");

        let input = vec![pair("MATH 1ZB3"), pair("CHEM 1A03"), pair("PHYS 1D03")];
        let tally = UiDriver::new(&search, &store, fast())
            .run(&input, &mut skip_log)
            .await;

        assert_eq!(
            tally,
            Tally {
                saved: 1,
                skipped: 2,
                failed: 0
            }
        );
        let events = search.events.borrow();
        assert!(!events.iter().any(|e| e.starts_with("submit CHEM")));
        assert!(!events.iter().any(|e| e.starts_with("submit PHYS")));
        assert_eq!(events.iter().filter(|e| *e == "reload").count(), 3);

        let log = fs::read_to_string(&log_path).expect("Failed to read skip log");
        assert_eq!(
            log,
            "CHEM 1A03\tui_reset_failed\nPHYS 1D03\tui_reset_failed\n"
        );
        fs::remove_file(&log_path).ok();
    }
}

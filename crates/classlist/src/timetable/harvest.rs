use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::Semaphore;

use super::skiplog::SkipLog;
use super::source::ClassDataSource;
use crate::parser::{parse_class_data, precheck};
use crate::store::Store;
use crate::types::CoursePair;
use crate::utils::{Outcome, Tally, truncate};

const PARSE_ERROR_CHARS: usize = 120;

#[derive(Debug, Clone, Copy)]
pub struct HarvestConfig {
    /// Maximum fetches in flight at once.
    pub concurrency: usize,
    /// Pairs per batch; each batch finishes before the next one starts.
    pub chunk_size: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            concurrency: crate::MAX_CONCURRENCY,
            chunk_size: 1000,
        }
    }
}

/// Turns one fetched class-data body into an outcome, saving it when it carries selections.
pub async fn ingest(store: &Store, pair: &CoursePair, body: &str) -> Outcome {
    if let Err(reason) = precheck(body) {
        return Outcome::Skipped(reason);
    }

    let data = match parse_class_data(body) {
        Ok(data) => data,
        Err(e) if e.is_empty_course() => return Outcome::Skipped("no_uselection".to_string()),
        Err(e) => {
            log::error!("{} parse_error: {}", pair, e);
            return Outcome::Failed(format!(
                "parse_error:{}",
                truncate(&e.to_string(), PARSE_ERROR_CHARS)
            ));
        }
    };

    match store.save_class_data(&data).await {
        Ok(()) => Outcome::Saved {
            selections: data.selections.len(),
        },
        Err(e) => {
            log::error!("{} save failed: {}", pair, e);
            Outcome::Failed(format!(
                "parse_error:{}",
                truncate(&e.to_string(), PARSE_ERROR_CHARS)
            ))
        }
    }
}

/// Logs an outcome, counts it, and appends non-saved outcomes to the skip log.
pub async fn record(tally: &mut Tally, skip_log: &mut SkipLog, pair: &CoursePair, outcome: &Outcome) {
    match outcome {
        Outcome::Saved { selections } => {
            log::info!("✓ {}   selections={}", pair, selections)
        }
        Outcome::Skipped(reason) => log::warn!("- {}   skipped: {}", pair, reason),
        Outcome::Failed(reason) => log::error!("! {}   failed: {}", pair, reason),
    }
    if let Some(reason) = outcome.reason() {
        skip_log.append(pair, reason).await;
    }
    tally.add(outcome);
}

/// Replays the class-data API for many course pairs with bounded concurrency.
pub struct Harvester<'a, S> {
    source: &'a S,
    store: &'a Store,
    config: HarvestConfig,
}

impl<'a, S: ClassDataSource> Harvester<'a, S> {
    pub fn new(source: &'a S, store: &'a Store, config: HarvestConfig) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    pub async fn run(&self, pairs: &[CoursePair], skip_log: &mut SkipLog) -> Tally {
        let semaphore = Semaphore::new(self.config.concurrency.max(1));
        let mut tally = Tally::default();

        log::info!("Total inputs: {}", pairs.len());

        for (i, chunk) in pairs.chunks(self.config.chunk_size.max(1)).enumerate() {
            log::debug!("Starting batch {} ({} pairs)", i + 1, chunk.len());
            let mut futs: FuturesUnordered<_> = chunk
                .iter()
                .map(|pair| {
                    let semaphore = &semaphore;
                    async move { (pair, self.process_one(pair, semaphore).await) }
                })
                .collect();

            while let Some((pair, outcome)) = futs.next().await {
                record(&mut tally, skip_log, pair, &outcome).await;
            }
        }

        tally
    }

    async fn process_one(&self, pair: &CoursePair, semaphore: &Semaphore) -> Outcome {
        let Ok(_permit) = semaphore.acquire().await else {
            return Outcome::Failed("semaphore_closed".to_string());
        };

        match self.source.fetch(pair).await {
            Ok(body) => ingest(self.store, pair, &body).await,
            Err(e) => Outcome::Skipped(e.reason()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timetable::source::FetchError;
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubSource {
        responses: HashMap<String, Result<String, u16>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl StubSource {
        fn new(responses: Vec<(&str, Result<String, u16>)>) -> Self {
            Self {
                responses: responses
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl ClassDataSource for StubSource {
        async fn fetch(&self, pair: &CoursePair) -> Result<String, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.responses.get(&pair.target()) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(status)) => Err(FetchError::Status(*status)),
                None => Err(FetchError::Status(404)),
            }
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("classlist-{}-{}", std::process::id(), name))
    }

    fn pairs(lines: &[&str]) -> Vec<CoursePair> {
        lines
            .iter()
            .map(|l| l.parse().expect("Should parse pair"))
            .collect()
    }

    #[tokio::test]
    async fn test_harvest_saves_valid_and_skips_404() {
        let xml = fs::read_to_string("fixtures/class_data_math_1zb3.xml")
            .expect("Failed to read fixture");
        let source = StubSource::new(vec![("MATH-1ZB3", Ok(xml)), ("FAKE-9999", Err(404))]);
        let store = Store::in_memory().await.expect("Failed to open store");
        let log_path = temp_path("skips-e2e.txt");
        let mut skip_log = SkipLog::create(&log_path).await.expect("Failed to create log");

        let harvester = Harvester::new(&source, &store, HarvestConfig::default());
        let tally = harvester
            .run(&pairs(&["MATH 1ZB3", "FAKE 9999"]), &mut skip_log)
            .await;

        assert_eq!(
            tally,
            Tally {
                saved: 1,
                skipped: 1,
                failed: 0
            }
        );
        let log = fs::read_to_string(&log_path).expect("Failed to read skip log");
        assert_eq!(log, "FAKE 9999\thttp_404\n");
        assert_eq!(store.counts().await.expect("Failed to count").courses, 1);

        fs::remove_file(&log_path).ok();
    }

    #[tokio::test]
    async fn test_harvest_classifies_bodies() {
        let error_xml =
            fs::read_to_string("fixtures/class_data_error.xml").expect("Failed to read fixture");
        let empty = r#"<addcourse><classdata term="1"><term v="2025 Fall" n="1"/>
            <course key="9" code="MATH" number="4X03"/></classdata></addcourse>"#;
        let broken = r#"<classdata term="1"><course key="9"><uselection><selection key="s">
            <block timeblockids="1"/></selection><timeblock id="1" day="x"/></uselection></course></classdata>"#;

        let source = StubSource::new(vec![
            ("FAKE-9999", Ok(error_xml)),
            ("MATH-4X03", Ok(empty.to_string())),
            ("MATH-9Z99", Ok(broken.to_string())),
            ("MATH-1B03", Ok("<html>".to_string())),
            ("MATH-2R03", Err(500)),
        ]);
        let store = Store::in_memory().await.expect("Failed to open store");
        let log_path = temp_path("skips-classify.txt");
        let mut skip_log = SkipLog::create(&log_path).await.expect("Failed to create log");

        let tally = Harvester::new(&source, &store, HarvestConfig::default())
            .run(
                &pairs(&[
                    "FAKE 9999",
                    "MATH 4X03",
                    "MATH 9Z99",
                    "MATH 1B03",
                    "MATH 2R03",
                ]),
                &mut skip_log,
            )
            .await;

        assert_eq!(
            tally,
            Tally {
                saved: 0,
                skipped: 4,
                failed: 1
            }
        );

        let log = fs::read_to_string(&log_path).expect("Failed to read skip log");
        let mut lines: Vec<&str> = log.lines().collect();
        lines.sort();
        assert_eq!(
            lines,
            vec![
                "FAKE 9999\tCourse not found | FAKE-9999 is not offered in this term",
                "MATH 1B03\tbad_xml",
                "MATH 2R03\thttp_500",
                "MATH 4X03\tno_uselection",
                "MATH 9Z99\tparse_error:Invalid number in timeblock@day: \"x\"",
            ]
        );

        fs::remove_file(&log_path).ok();
    }

    #[tokio::test]
    async fn test_harvest_respects_concurrency_limit() {
        let source = StubSource::new(vec![]);
        let store = Store::in_memory().await.expect("Failed to open store");
        let log_path = temp_path("skips-limit.txt");
        let mut skip_log = SkipLog::create(&log_path).await.expect("Failed to create log");

        let input: Vec<CoursePair> = (0..40)
            .map(|i| CoursePair {
                subject: "TEST".into(),
                number: format!("{i}A03"),
            })
            .collect();
        let config = HarvestConfig {
            concurrency: 3,
            chunk_size: 16,
        };
        let tally = Harvester::new(&source, &store, config)
            .run(&input, &mut skip_log)
            .await;

        assert_eq!(tally.skipped, 40);
        assert!(source.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(fs::read_to_string(&log_path).expect("log").lines().count(), 40);

        fs::remove_file(&log_path).ok();
    }
}

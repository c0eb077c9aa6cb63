pub mod browser;
pub mod catalog;
pub mod codes;
pub mod parser;
pub mod store;
pub mod timetable;
pub mod types;
pub mod utils;
pub mod viewer;

pub use store::Store;

pub const BASE_URL: &str = "https://mytimetable.mcmaster.ca";
pub const TERM: &str = "3202530";
pub const CATALOG_URL: &str =
    "https://academiccalendars.romcmaster.ca/content.php?catoid=58&navoid=12627";

pub const TIMEZONE: &str = "America/Toronto";
pub const LOCALE: &str = "en-CA";
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15) AppleWebKit/537.36 \
                              (KHTML, like Gecko) Chrome/125 Safari/537.36";

pub const MAX_CONCURRENCY: usize = 6;
pub const REQUEST_TIMEOUT_MS: u64 = 3_500;
pub const UI_TIMEOUT_MS: u64 = 3_000;
pub const SLOW_TIMEOUT_MS: u64 = 6_000;
pub const FALLBACK_LAST_PAGE: u32 = 31;

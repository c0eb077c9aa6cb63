//! Timetable clients: the API-replay harvester and the UI-driven variant.

pub mod harvest;
pub mod run;
pub mod skiplog;
pub mod source;
pub mod ui;

pub use harvest::{HarvestConfig, Harvester};
pub use run::{HarvestError, Mode, RunConfig, RunReport, run};
pub use skiplog::SkipLog;
pub use source::{ClassDataSource, FetchError, HttpFetcher, PageFetcher};
pub use ui::{CourseSearch, PageSearch, UiConfig, UiDriver, UiSelectors};

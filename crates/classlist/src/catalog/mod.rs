mod parser;
pub mod scraper;

pub use parser::{
    CatalogPage, RowError, RowFailure, TABLE_CONTAINER, parse_catalog_page, parse_last_page,
};
pub use scraper::{CatalogConfig, CatalogError, CatalogScraper, CatalogSummary};

use std::fmt::Display;
use std::path::Path;

use serde::Serialize;

use crate::store::{BlockRow, CourseSummary, Store, StoreError, TableCounts};

pub const EXPORT_HEADER: [&str; 7] = [
    "course",
    "block_type",
    "sec_no",
    "room",
    "day",
    "start",
    "end",
];

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A snapshot of what the database holds.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub counts: TableCounts,
    pub courses: Vec<CourseSummary>,
    pub blocks: Vec<BlockRow>,
}

impl Report {
    pub async fn load(store: &Store, sample: i64) -> Result<Self, ViewerError> {
        Ok(Self {
            counts: store.counts().await?,
            courses: store.recent_courses(sample).await?,
            blocks: store.recent_blocks(sample).await?,
        })
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nCourses saved (sample {}):", self.courses.len())?;
        for course in &self.courses {
            writeln!(f, "   {}", course)?;
        }
        writeln!(f, "\nBlocks (sample {}):", self.blocks.len())?;
        for block in &self.blocks {
            writeln!(f, "   {}", block)?;
        }
        write!(f, "{}", self.counts)
    }
}

pub fn write_csv<W: std::io::Write>(rows: &[BlockRow], out: W) -> Result<(), ViewerError> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(EXPORT_HEADER)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub async fn export_csv(store: &Store, path: &Path) -> Result<usize, ViewerError> {
    let rows = store.export_rows().await?;
    let file = std::fs::File::create(path)?;
    write_csv(&rows, file)?;
    log::info!("Wrote CSV -> {}", path.display());
    Ok(rows.len())
}

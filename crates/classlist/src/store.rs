use std::fmt::Display;
use std::path::Path;

use serde::Serialize;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::types::ClassData;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Local timetable database.
///
/// Courses and selections are upserted by their vendor keys, so re-ingesting a
/// course is safe. Block rows are append-only: ingesting the same course twice
/// duplicates its blocks unless [`Store::clear_blocks`] runs first.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CourseSummary {
    pub course: String,
    pub title: String,
    pub term_label: String,
}

impl Display for CourseSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {} ({})", self.course, self.title, self.term_label)
    }
}

/// One exported meeting row: `course,block_type,sec_no,room,day,start,end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct BlockRow {
    pub course: String,
    pub block_type: String,
    pub sec_no: String,
    pub room: String,
    pub day: String,
    pub start: String,
    pub end: String,
}

impl Display for BlockRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}-{}",
            self.course, self.block_type, self.sec_no, self.room, self.day, self.start, self.end
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub courses: i64,
    pub selections: i64,
    pub blocks: i64,
}

impl Display for TableCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nRows:")?;
        writeln!(f, "  Courses:    {}", self.courses)?;
        writeln!(f, "  Selections: {}", self.selections)?;
        writeln!(f, "  Blocks:     {}", self.blocks)
    }
}

const BLOCK_UPGRADE_COLUMNS: [(&str, &str); 5] = [
    ("location", "TEXT"),
    ("building", "TEXT"),
    ("room", "TEXT"),
    ("instruction_mode", "TEXT"),
    ("is_online", "INTEGER DEFAULT 0"),
];

const BLOCK_COLUMNS: &str = r#"
    COALESCE(c.code, '') || '-' || COALESCE(c.number, '') AS course,
    COALESCE(b.block_type, '') AS block_type,
    COALESCE(b.sec_no, '') AS sec_no,
    COALESCE(b.room, '') AS room,
    COALESCE(b.day_name, '') AS day,
    COALESCE(b.start_time, '') AS start,
    COALESCE(b.end_time, '') AS end
    FROM blocks b
    JOIN selections s ON s.selection_key = b.selection_key
    JOIN courses    c ON c.course_key    = s.course_key
"#;

impl Store {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        // One connection keeps concurrent saves from contending for the write lock.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .inspect_err(|e| log::error!("Failed to open {}: {e}", path.as_ref().display()))?;
        Self::migrate(pool).await
    }

    /// Opens an existing database without creating it or applying migrations.
    pub async fn open_read_only(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .inspect_err(|e| log::error!("Failed to open {}: {e}", path.as_ref().display()))?;
        Ok(Self { pool })
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        let store = Self { pool };
        store.upgrade_blocks().await?;
        Ok(store)
    }

    /// Adds the location columns to a `blocks` table created by the older room-only schema.
    async fn upgrade_blocks(&self) -> Result<(), StoreError> {
        let existing: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info('blocks')")
                .fetch_all(&self.pool)
                .await?;

        for (column, decl) in BLOCK_UPGRADE_COLUMNS {
            if existing.iter().any(|c| c == column) {
                continue;
            }
            log::info!("Adding blocks.{} to an older database", column);
            sqlx::query(&format!("ALTER TABLE blocks ADD COLUMN {column} {decl}"))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn save_class_data(&self, data: &ClassData) -> Result<(), StoreError> {
        let course = &data.course;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO courses
                (course_key, code, number, title, term_label, raw_term)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&course.course_key)
        .bind(&course.code)
        .bind(&course.number)
        .bind(&course.title)
        .bind(&course.term_label)
        .bind(&course.raw_term)
        .execute(&mut *tx)
        .await?;

        for selection in &data.selections {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO selections (selection_key, course_key, variant_va)
                VALUES (?1, ?2, ?3)
                "#,
            )
            .bind(&selection.selection_key)
            .bind(&course.course_key)
            .bind(&selection.variant_va)
            .execute(&mut *tx)
            .await?;

            for block in &selection.blocks {
                for tb in &block.timeblocks {
                    sqlx::query(
                        r#"
                        INSERT INTO blocks
                            (selection_key, block_type, sec_no, location, building, room,
                            instruction_mode, is_online, timeblock_id, day_num, day_name,
                            start_min, end_min, start_time, end_time)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                        "#,
                    )
                    .bind(&selection.selection_key)
                    .bind(&block.block_type)
                    .bind(&block.sec_no)
                    .bind(&block.location)
                    .bind(&block.building)
                    .bind(&block.room)
                    .bind(&block.instruction_mode)
                    .bind(block.is_online)
                    .bind(&tb.id)
                    .bind(i64::from(tb.day))
                    .bind(tb.day_name())
                    .bind(i64::from(tb.start_min))
                    .bind(i64::from(tb.end_min))
                    .bind(tb.start_time())
                    .bind(tb.end_time())
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn clear_blocks(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM blocks")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn recent_courses(&self, limit: i64) -> Result<Vec<CourseSummary>, StoreError> {
        Ok(sqlx::query_as::<_, CourseSummary>(
            r#"
            SELECT
                COALESCE(code, '') || '-' || COALESCE(number, '') AS course,
                COALESCE(title, '') AS title,
                COALESCE(term_label, '') AS term_label
            FROM courses
            ORDER BY rowid DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn recent_blocks(&self, limit: i64) -> Result<Vec<BlockRow>, StoreError> {
        let sql = format!("SELECT {BLOCK_COLUMNS} ORDER BY b.id DESC LIMIT ?1");
        Ok(sqlx::query_as::<_, BlockRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    /// All block rows ordered by course, day and start time.
    pub async fn export_rows(&self) -> Result<Vec<BlockRow>, StoreError> {
        let sql = format!(
            "SELECT {BLOCK_COLUMNS} ORDER BY c.code, c.number, b.day_num, b.start_min, b.id"
        );
        Ok(sqlx::query_as::<_, BlockRow>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn counts(&self) -> Result<TableCounts, StoreError> {
        let count = |table: &'static str| {
            let pool = self.pool.clone();
            async move {
                sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
                    .fetch_one(&pool)
                    .await
            }
        };
        Ok(TableCounts {
            courses: count("courses").await?,
            selections: count("selections").await?,
            blocks: count("blocks").await?,
        })
    }
}

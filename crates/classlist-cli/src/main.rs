use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use classlist::Store;
use classlist::browser::{LaunchOptions, Session};
use classlist::catalog::{CatalogConfig, CatalogScraper};
use classlist::codes::extract_from_csv;
use classlist::timetable::{self, HarvestConfig, Mode, RunConfig};
use classlist::viewer::{Report, export_csv};
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "classlist")]
#[command(about = "A course catalog and timetable scraper", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, ValueEnum)]
enum HarvestMode {
    /// Replay the class-data API from inside a live page
    Api,
    /// Drive the course search box one course at a time
    Ui,
    /// Plain HTTP requests, no browser
    Direct,
}

impl From<HarvestMode> for Mode {
    fn from(mode: HarvestMode) -> Self {
        match mode {
            HarvestMode::Api => Mode::Api,
            HarvestMode::Ui => Mode::Ui,
            HarvestMode::Direct => Mode::Direct,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the academic calendar's course list and write every course name to a CSV
    Catalog {
        #[arg(long, default_value = classlist::CATALOG_URL, help = "Catalog listing URL")]
        url: String,

        #[arg(
            long,
            default_value_t = 1,
            value_parser = clap::value_parser!(u32).range(1..),
            help = "First page to scrape"
        )]
        start_page: u32,

        #[arg(
            long,
            value_parser = clap::value_parser!(u32).range(1..),
            help = "Last page to scrape (detected from the pager when omitted)"
        )]
        end_page: Option<u32>,

        #[arg(short = 'f', long, default_value = "course_names.csv", help = "Output CSV")]
        file: PathBuf,

        #[arg(long, default_value = "logs", help = "Directory for failed-row artifacts")]
        logs_dir: PathBuf,

        #[arg(long, help = "Show the browser window")]
        headed: bool,
    },
    /// Extract unique SUBJECT NUMBER codes from a catalog CSV
    Extract {
        #[arg(short = 'i', long, default_value = "course_names.csv", help = "Catalog CSV")]
        input: PathBuf,

        #[arg(long, default_value = "course_codes.txt", help = "Where to write codes")]
        codes: PathBuf,

        #[arg(long, default_value = "rejected_lines.txt", help = "Where to write rejected lines")]
        rejects: PathBuf,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Fetch class data for every course code and store it in SQLite
    Harvest {
        #[arg(long, value_enum, default_value = "api", help = "How class data is fetched")]
        mode: HarvestMode,

        #[arg(long, default_value = "course_codes.txt", help = "Course codes, one per line")]
        codes: PathBuf,

        #[arg(long, default_value = "mytimetable.db", help = "SQLite database")]
        db: PathBuf,

        #[arg(long, default_value = "skipped_courses.txt", help = "Skip log")]
        skip_log: PathBuf,

        #[arg(long, default_value = "logs", help = "Directory for debug screenshots")]
        logs_dir: PathBuf,

        #[arg(long, default_value = classlist::BASE_URL, help = "Timetable site")]
        base_url: String,

        #[arg(long, default_value = classlist::TERM, help = "Vendor term id")]
        term: String,

        #[arg(
            long,
            default_value_t = classlist::MAX_CONCURRENCY,
            help = "Fetches in flight at once"
        )]
        concurrency: usize,

        #[arg(
            long,
            default_value_t = classlist::REQUEST_TIMEOUT_MS,
            help = "Per-request timeout in milliseconds"
        )]
        timeout_ms: u64,

        #[arg(long, help = "Delete stored blocks before harvesting")]
        fresh: bool,

        #[arg(long, help = "Show the browser window")]
        headed: bool,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Show a sample of stored courses and blocks, and export blocks to CSV
    View {
        #[arg(long, default_value = "mytimetable.db", help = "SQLite database")]
        db: PathBuf,

        #[arg(long, default_value = "blocks_export.csv", help = "CSV export path")]
        export: PathBuf,

        #[arg(long, default_value_t = 10, help = "Rows per sample")]
        sample: i64,

        #[arg(long, help = "Skip the CSV export")]
        no_export: bool,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

fn browser_options(headed: bool) -> LaunchOptions {
    LaunchOptions {
        headless: !headed,
        user_agent: Some(classlist::USER_AGENT.to_string()),
        timezone: Some(classlist::TIMEZONE.to_string()),
        locale: Some(classlist::LOCALE.to_string()),
        ..Default::default()
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    match cli.command {
        Commands::Catalog {
            url,
            start_page,
            end_page,
            file,
            logs_dir,
            headed,
        } => {
            let session = Session::launch(browser_options(headed))
                .await
                .unwrap_or_else(|e| {
                    log::error!("Error launching browser: {}", e);
                    process::exit(1);
                });

            let config = CatalogConfig {
                url,
                start_page,
                end_page,
                output: file,
                logs_dir,
                ..Default::default()
            };

            let result = CatalogScraper::new(&session, config).run().await;
            if let Err(e) = session.close().await {
                log::warn!("Browser did not close cleanly: {}", e);
            }

            let summary = result.unwrap_or_else(|e| {
                log::error!("Error scraping catalog: {}", e);
                process::exit(1);
            });
            print!("{}", summary);
        }

        Commands::Extract {
            input,
            codes,
            rejects,
            format,
        } => {
            let extraction = extract_from_csv(&input, &codes, &rejects).unwrap_or_else(|e| {
                log::error!("Error extracting course codes: {}", e);
                process::exit(1);
            });

            match format {
                OutputFormat::Json => serialize_json(&extraction),
                OutputFormat::Text => println!("{}", extraction),
            }
        }

        Commands::Harvest {
            mode,
            codes,
            db,
            skip_log,
            logs_dir,
            base_url,
            term,
            concurrency,
            timeout_ms,
            fresh,
            headed,
            format,
        } => {
            let config = RunConfig {
                mode: mode.into(),
                codes,
                db,
                skip_log,
                logs_dir,
                base_url,
                term,
                fresh,
                request_timeout: Duration::from_millis(timeout_ms),
                launch: browser_options(headed),
                harvest: HarvestConfig {
                    concurrency,
                    ..Default::default()
                },
                ..Default::default()
            };

            let report = timetable::run(&config).await.unwrap_or_else(|e| {
                log::error!("Error harvesting class data: {}", e);
                process::exit(1);
            });

            match format {
                OutputFormat::Json => serialize_json(&report),
                OutputFormat::Text => print!("{}", report),
            }
        }

        Commands::View {
            db,
            export,
            sample,
            no_export,
            format,
        } => {
            if !db.exists() {
                log::error!("Database not found: {}", db.display());
                process::exit(1);
            }

            let store = Store::open_read_only(&db).await.unwrap_or_else(|e| {
                log::error!("Error opening database: {}", e);
                process::exit(1);
            });

            let report = Report::load(&store, sample).await.unwrap_or_else(|e| {
                log::error!("Error reading database: {}", e);
                process::exit(1);
            });

            match format {
                OutputFormat::Json => serialize_json(&report),
                OutputFormat::Text => print!("{}", report),
            }

            if !no_export {
                let rows = export_csv(&store, &export).await.unwrap_or_else(|e| {
                    log::error!("Error exporting CSV: {}", e);
                    process::exit(1);
                });
                log::info!("Exported {} row(s) to {}", rows, export.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_defaults() {
        let cli = Cli::try_parse_from(["classlist", "extract"]).expect("Should parse");
        let Commands::Extract {
            input,
            codes,
            rejects,
            ..
        } = cli.command
        else {
            panic!("Expected the extract command");
        };
        assert_eq!(input, PathBuf::from("course_names.csv"));
        assert_eq!(codes, PathBuf::from("course_codes.txt"));
        assert_eq!(rejects, PathBuf::from("rejected_lines.txt"));
    }
}

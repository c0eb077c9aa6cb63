use std::collections::BTreeSet;
use std::fmt::Display;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::types::CoursePair;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Input file not found: {0}")]
    MissingInput(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

// Subject is 2+ letters (& for joint subjects), catalog number is digit, two alnum, digit: 1ZB3, 3G03.
static RE_CODE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Z&]{2,})\s+(\d[A-Z0-9]{2}\d)\b").expect("invalid regex: code line")
});

const HEADER: &str = "COURSE NAME";

#[derive(Debug, Default, Serialize)]
pub struct Extraction {
    pub codes: BTreeSet<String>,
    pub rejected: Vec<String>,
}

impl Display for Extraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} unique code(s), {} rejected line(s)",
            self.codes.len(),
            self.rejected.len()
        )
    }
}

pub fn normalize_line(line: &str) -> String {
    line.replace(['–', '—'], "-")
        .replace('•', "")
        .trim()
        .to_uppercase()
}

pub fn extract_codes<I, S>(lines: I) -> Extraction
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut extraction = Extraction::default();
    let mut header_seen = false;

    for line in lines {
        let text = normalize_line(line.as_ref());

        if !header_seen && text == HEADER {
            header_seen = true;
            continue;
        }

        match RE_CODE_LINE.captures(&text) {
            Some(caps) => {
                extraction.codes.insert(format!("{} {}", &caps[1], &caps[2]));
            }
            None => extraction.rejected.push(text),
        }
    }

    extraction
}

/// Reads the first column of every non-empty row of a course-name CSV.
pub fn read_name_column(path: &Path) -> Result<Vec<String>, ExtractError> {
    if !path.exists() {
        return Err(ExtractError::MissingInput(path.display().to_string()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut names = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.is_empty() {
            continue;
        }
        names.push(record.get(0).unwrap_or_default().to_string());
    }
    Ok(names)
}

pub fn extract_from_csv(
    input: &Path,
    codes_out: &Path,
    rejects_out: &Path,
) -> Result<Extraction, ExtractError> {
    let names = read_name_column(input)?;
    log::info!("Read {} row(s) from {}", names.len(), input.display());

    let extraction = extract_codes(&names);

    write_lines(codes_out, &extraction.codes)?;
    write_lines(rejects_out, &extraction.rejected)?;

    log::info!(
        "Wrote {} codes to {} (and {} rejects to {})",
        extraction.codes.len(),
        codes_out.display(),
        extraction.rejected.len(),
        rejects_out.display()
    );
    Ok(extraction)
}

fn write_lines<'a, I>(path: &Path, lines: I) -> Result<(), ExtractError>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut file = fs::File::create(path)?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

/// Loads `course_codes.txt`. Blank lines are ignored and malformed lines are logged and skipped.
pub fn read_course_pairs(path: &Path) -> Result<Vec<CoursePair>, ExtractError> {
    if !path.exists() {
        return Err(ExtractError::MissingInput(path.display().to_string()));
    }
    let text = fs::read_to_string(path)?;
    Ok(parse_course_pairs(&text))
}

pub fn parse_course_pairs(text: &str) -> Vec<CoursePair> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|line| {
            line.parse::<CoursePair>()
                .inspect_err(|_| log::warn!("Skipping bad line: {}", line))
                .ok()
        })
        .collect()
}

use std::fmt::Display;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static RE_COURSE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z&]+)\s+([0-9A-Za-z]+)\s*$").expect("invalid regex: course line")
});

#[derive(Debug, thiserror::Error)]
#[error("Invalid course line '{0}'. Expected 'SUBJECT NUMBER'")]
pub struct CoursePairParseError(String);

/// A `(subject, number)` pair to look up in the timetable service, e.g. `MATH 1ZB3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoursePair {
    pub subject: String,
    pub number: String,
}

impl CoursePair {
    /// The `SUBJECT-NUMBER` form used by the class-data API.
    pub fn target(&self) -> String {
        format!("{}-{}", self.subject, self.number)
    }
}

impl FromStr for CoursePair {
    type Err = CoursePairParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = RE_COURSE_LINE
            .captures(s)
            .ok_or_else(|| CoursePairParseError(s.to_string()))?;
        Ok(CoursePair {
            subject: caps[1].to_uppercase(),
            number: caps[2].to_uppercase(),
        })
    }
}

impl Display for CoursePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.subject, self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub course_key: String,
    pub code: String,
    pub number: String,
    pub title: String,
    pub term_label: String,
    pub raw_term: String,
}

impl Display for Course {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{} {}", self.code, self.number, self.title)?;
        if !self.term_label.is_empty() {
            write!(f, " ({})", self.term_label)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub selection_key: String,
    pub variant_va: String,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub block_type: String,
    pub sec_no: String,
    pub location: String,
    pub building: Option<String>,
    pub room: Option<String>,
    pub instruction_mode: String,
    pub is_online: bool,
    pub timeblocks: Vec<Timeblock>,
}

/// A recurring weekly meeting: day 1 (Sunday) to 7 (Saturday), minutes since midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeblock {
    pub id: String,
    pub day: u8,
    pub start_min: u32,
    pub end_min: u32,
}

impl Timeblock {
    pub fn day_name(&self) -> String {
        day_name(self.day)
    }

    pub fn start_time(&self) -> String {
        minutes_to_hhmm(self.start_min)
    }

    pub fn end_time(&self) -> String {
        minutes_to_hhmm(self.end_min)
    }
}

impl Display for Timeblock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}-{}",
            self.day_name(),
            self.start_time(),
            self.end_time()
        )
    }
}

/// One course query response after normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassData {
    pub course: Course,
    pub selections: Vec<Selection>,
}

impl ClassData {
    /// Number of `blocks` rows this record set expands to.
    pub fn block_rows(&self) -> usize {
        self.selections
            .iter()
            .flat_map(|s| &s.blocks)
            .map(|b| b.timeblocks.len())
            .sum()
    }
}

impl Display for ClassData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "┌─ {}", self.course)?;
        writeln!(f, "└─ {} selection(s)", self.selections.len())?;
        for selection in &self.selections {
            writeln!(
                f,
                "── {} (va {})",
                selection.selection_key, selection.variant_va
            )?;
            for block in &selection.blocks {
                write!(f, "  ▸ {} {}", block.block_type, block.sec_no)?;
                if block.is_online {
                    write!(f, " [online]")?;
                } else if !block.location.is_empty() {
                    write!(f, " @ {}", block.location)?;
                }
                writeln!(f)?;
                for tb in &block.timeblocks {
                    writeln!(f, "    {}", tb)?;
                }
            }
        }
        Ok(())
    }
}

pub fn day_name(day: u8) -> String {
    match day {
        1 => "Sun",
        2 => "Mon",
        3 => "Tue",
        4 => "Wed",
        5 => "Thu",
        6 => "Fri",
        7 => "Sat",
        other => return other.to_string(),
    }
    .to_string()
}

pub fn minutes_to_hhmm(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes_to_hhmm() {
        assert_eq!(minutes_to_hhmm(75), "01:15");
        assert_eq!(minutes_to_hhmm(0), "00:00");
        assert_eq!(minutes_to_hhmm(870), "14:30");
    }

    #[test]
    fn test_timeblock_display() {
        let tb = Timeblock {
            id: "101".into(),
            day: 2,
            start_min: 510,
            end_min: 560,
        };
        assert_eq!(tb.to_string(), "Mon 08:30-09:20");
    }

    #[test]
    fn test_day_name() {
        assert_eq!(day_name(1), "Sun");
        assert_eq!(day_name(4), "Wed");
        assert_eq!(day_name(7), "Sat");
        assert_eq!(day_name(9), "9");
    }

    #[test]
    fn test_course_pair_from_line() {
        let pair: CoursePair = "  math 1zb3 ".parse().expect("Should parse course line");
        assert_eq!(pair.subject, "MATH");
        assert_eq!(pair.number, "1ZB3");
        assert_eq!(pair.target(), "MATH-1ZB3");
        assert_eq!(pair.to_string(), "MATH 1ZB3");
    }

    #[test]
    fn test_course_pair_rejects_bad_lines() {
        assert!("MATH".parse::<CoursePair>().is_err());
        assert!("MATH 1ZB3 extra".parse::<CoursePair>().is_err());
        assert!("".parse::<CoursePair>().is_err());
    }
}

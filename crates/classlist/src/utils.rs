use serde::Serialize;

/// How a single course pair ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Saved { selections: usize },
    Skipped(String),
    Failed(String),
}

impl Outcome {
    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Saved { .. } => None,
            Outcome::Skipped(reason) | Outcome::Failed(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Tally {
    pub fn add(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Saved { .. } => self.saved += 1,
            Outcome::Skipped(_) => self.skipped += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.saved + self.skipped + self.failed
    }
}

impl std::fmt::Display for Tally {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nSummary:")?;
        writeln!(f, "  Saved:   {}", self.saved)?;
        writeln!(f, "  Skipped: {}", self.skipped)?;
        writeln!(f, "  Failed:  {}", self.failed)
    }
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! Training Corpora
//!
//! Append-only CSV files feeding the two learners:
//! - `training_data.csv`: supervised rows for the baseline predictor
//! - `q_experience.csv`: transitions for the policy's fitted-Q update
//!
//! The header is written when the file is first created. Rows that fail to
//! parse on read are skipped with a warning.

use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::features::FeatureTriple;
use crate::history::{read_text_lines, ParseError};
use crate::policy::Action;

pub const TRAINING_HEADER: [&str; 5] = [
    "task",
    "avg_interval",
    "preference",
    "manual_count",
    "predicted_interval",
];

pub const EXPERIENCE_HEADER: [&str; 8] = [
    "avg",
    "pref",
    "manual",
    "action",
    "reward",
    "next_avg",
    "next_pref",
    "next_manual",
];

/// One supervised row: features and the interval chosen for them
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub task: String,
    pub features: FeatureTriple,
    pub predicted_interval: f64,
}

impl TrainingSample {
    fn to_fields(&self) -> Vec<String> {
        vec![
            self.task.clone(),
            self.features.avg_interval.to_string(),
            self.features.preference.to_string(),
            self.features.manual_count.to_string(),
            format!("{:.2}", self.predicted_interval),
        ]
    }

    fn from_fields(fields: &[String]) -> Result<Self, ParseError> {
        if fields.len() < TRAINING_HEADER.len() {
            return Err(ParseError::MissingField("predicted_interval"));
        }
        Ok(Self {
            task: fields[0].clone(),
            features: FeatureTriple::new(
                number(&fields[1], "avg_interval")?,
                number(&fields[2], "preference")?,
                number(&fields[3], "manual_count")?,
            ),
            predicted_interval: number(&fields[4], "predicted_interval")?,
        })
    }
}

/// One policy transition
#[derive(Debug, Clone, PartialEq)]
pub struct Experience {
    pub state: FeatureTriple,
    pub action: Action,
    pub reward: f64,
    pub next_state: FeatureTriple,
}

impl Experience {
    fn to_fields(&self) -> Vec<String> {
        let s = self.state.as_array();
        let n = self.next_state.as_array();
        vec![
            s[0].to_string(),
            s[1].to_string(),
            s[2].to_string(),
            self.action.index().to_string(),
            self.reward.to_string(),
            n[0].to_string(),
            n[1].to_string(),
            n[2].to_string(),
        ]
    }

    fn from_fields(fields: &[String]) -> Result<Self, ParseError> {
        if fields.len() < EXPERIENCE_HEADER.len() {
            return Err(ParseError::MissingField("next_manual"));
        }
        let action = fields[3]
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(Action::from_index)
            .ok_or_else(|| ParseError::UnknownAction(fields[3].clone()))?;

        Ok(Self {
            state: FeatureTriple::new(
                number(&fields[0], "avg")?,
                number(&fields[1], "pref")?,
                number(&fields[2], "manual")?,
            ),
            action,
            reward: number(&fields[4], "reward")?,
            next_state: FeatureTriple::new(
                number(&fields[5], "next_avg")?,
                number(&fields[6], "next_pref")?,
                number(&fields[7], "next_manual")?,
            ),
        })
    }
}

fn number(raw: &str, column: &'static str) -> Result<f64, ParseError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::BadNumber {
            column,
            value: raw.to_string(),
        })
}

/// Append-only CSV file with a fixed header
#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
    header: &'static [&'static str],
}

impl CsvLog {
    pub fn new(path: impl Into<PathBuf>, header: &'static [&'static str]) -> Self {
        Self {
            path: path.into(),
            header,
        }
    }

    pub fn training(path: impl Into<PathBuf>) -> Self {
        Self::new(path, &TRAINING_HEADER)
    }

    pub fn experience(path: impl Into<PathBuf>) -> Self {
        Self::new(path, &EXPERIENCE_HEADER)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, writing the header first if the file is new
    pub fn append(&self, fields: &[String]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let needs_header = std::fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let mut buf = String::new();
        if needs_header {
            buf.push_str(&self.header.join(","));
            buf.push('\n');
        }
        buf.push_str(&join_record(fields));
        buf.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(buf.as_bytes())
    }

    /// Data rows (header excluded); a missing file has none
    pub fn rows(&self) -> std::io::Result<Vec<Vec<String>>> {
        Ok(read_text_lines(&self.path)?
            .into_iter()
            .filter(|(lineno, line)| *lineno > 0 && !line.trim().is_empty())
            .map(|(_, line)| split_record(&line))
            .collect())
    }

    pub fn append_sample(&self, sample: &TrainingSample) -> std::io::Result<()> {
        self.append(&sample.to_fields())
    }

    pub fn append_experience(&self, experience: &Experience) -> std::io::Result<()> {
        self.append(&experience.to_fields())
    }

    pub fn read_samples(&self) -> std::io::Result<Vec<TrainingSample>> {
        self.parse_rows(TrainingSample::from_fields)
    }

    pub fn read_experiences(&self) -> std::io::Result<Vec<Experience>> {
        self.parse_rows(Experience::from_fields)
    }

    fn parse_rows<T>(
        &self,
        parse: impl Fn(&[String]) -> Result<T, ParseError>,
    ) -> std::io::Result<Vec<T>> {
        let mut out = Vec::new();
        for (i, row) in self.rows()?.iter().enumerate() {
            match parse(row) {
                Ok(record) => out.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    row = i + 1,
                    "Skipping malformed corpus row: {}",
                    e
                ),
            }
        }
        Ok(out)
    }
}

fn join_record(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| {
            if f.contains([',', '"', '\n']) {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

//! Structured status files and their semantic merge.
//!
//! A status file is Markdown with TOML front matter:
//!
//! ```text
//! +++
//! lane = "doing"
//!
//! [[history]]
//! timestamp = "2025-01-10T09:00:00Z"
//! lane = "doing"
//! actor = "agent-a"
//! +++
//! - [x] write the model
//! - [ ] add tests
//! ```
//!
//! Two versions of the same file merge without human input: the most
//! advanced lane wins, histories are unioned, and a checked box beats an
//! unchecked one. Any other difference in the body makes the merge fail.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use toml::{Table, Value};

use crate::core::Lane;
use crate::Result;

const DELIMITER: &str = "+++";

/// Checkbox list item: `- [ ] text`, `* [x] text`.
static CHECKBOX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*[-*+]\s+\[)([ xX])(\].*)$").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct StatusFile {
    front: Table,
    lane: Lane,
    body: String,
}

impl StatusFile {
    /// Parse a status file, `None` if the text does not follow the schema.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut lines = text.split_inclusive('\n');
        if lines.next()?.trim_end() != DELIMITER {
            return None;
        }

        let mut front = String::new();
        let mut closed = false;
        let mut consumed = 0;
        for line in lines.by_ref() {
            consumed += line.len();
            if line.trim_end() == DELIMITER {
                closed = true;
                break;
            }
            front.push_str(line);
        }
        if !closed {
            return None;
        }
        let header_len = text.split_inclusive('\n').next()?.len();
        let body = text[header_len + consumed..].to_string();

        let front: Table = toml::from_str(&front).ok()?;
        let lane: Lane = front.get("lane")?.as_str()?.parse().ok()?;
        let history = front.get("history")?.as_array()?;
        if !history.iter().all(|entry| HistoryEntry::from_value(entry).is_some()) {
            return None;
        }

        Some(Self { front, lane, body })
    }

    pub fn lane(&self) -> Lane {
        self.lane
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.front
            .get("history")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(HistoryEntry::from_value).collect())
            .unwrap_or_default()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn render(&self) -> Result<String> {
        let front = toml::to_string(&self.front)?;
        Ok(format!("{DELIMITER}\n{front}{DELIMITER}\n{}", self.body))
    }
}

/// One `[[history]]` entry. Only the fields used for ordering and
/// deduplication are extracted; the full table is carried through.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: String,
    pub actor: String,
    parsed: Option<DateTime<Utc>>,
    raw: Value,
}

impl HistoryEntry {
    fn from_value(value: &Value) -> Option<Self> {
        let table = value.as_table()?;
        let timestamp = match table.get("timestamp")? {
            Value::String(s) => s.clone(),
            Value::Datetime(dt) => dt.to_string(),
            _ => return None,
        };
        let actor = table.get("actor")?.as_str()?.to_string();
        table.get("lane")?.as_str()?.parse::<Lane>().ok()?;
        let parsed = DateTime::parse_from_rfc3339(&timestamp)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
        Some(Self {
            timestamp,
            actor,
            parsed,
            raw: value.clone(),
        })
    }

    /// Identity for deduplication: the same instant by the same actor.
    fn key(&self) -> (String, String) {
        let instant = match self.parsed {
            Some(dt) => dt.to_rfc3339(),
            None => self.timestamp.clone(),
        };
        (instant, self.actor.clone())
    }
}

fn normalize_line(line: &str) -> String {
    CHECKBOX_RE.replace(line, "$1 $3").into_owned()
}

fn is_checked(line: &str) -> bool {
    CHECKBOX_RE
        .captures(line)
        .is_some_and(|c| matches!(c.get(2).map(|m| m.as_str()), Some("x" | "X")))
}

/// Merge the bodies line by line. Lines must match once checkbox state is
/// ignored; a box checked on any side ends up checked.
fn merge_bodies(bodies: &[&str]) -> Option<String> {
    let split: Vec<Vec<&str>> = bodies.iter().map(|b| b.split('\n').collect()).collect();
    let first = split.first()?;
    for other in &split[1..] {
        if other.len() != first.len() {
            return None;
        }
        let same = first
            .iter()
            .zip(other.iter())
            .all(|(a, b)| normalize_line(a) == normalize_line(b));
        if !same {
            return None;
        }
    }

    let merged: Vec<String> = (0..first.len())
        .map(|i| {
            let line = first[i];
            if CHECKBOX_RE.is_match(line) && split.iter().any(|side| is_checked(side[i])) {
                CHECKBOX_RE.replace(line, "${1}x$3").into_owned()
            } else {
                line.to_string()
            }
        })
        .collect();
    Some(merged.join("\n"))
}

/// Semantically merge several versions of one status file.
///
/// Returns `None` when the versions differ in a way no rule covers.
pub fn merge(sides: &[StatusFile]) -> Option<StatusFile> {
    let first = sides.first()?;

    let lane = sides.iter().map(StatusFile::lane).max()?;

    let mut seen = BTreeSet::new();
    let mut history: Vec<HistoryEntry> = sides
        .iter()
        .flat_map(StatusFile::history)
        .filter(|entry| seen.insert(entry.key()))
        .collect();
    history.sort_by(|a, b| match (a.parsed, b.parsed) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => a.timestamp.cmp(&b.timestamp),
    });

    let mut front = first.front.clone();
    for side in &sides[1..] {
        for (key, value) in &side.front {
            front.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    front.insert("lane".into(), Value::String(lane.as_str().to_string()));
    front.insert(
        "history".into(),
        Value::Array(history.into_iter().map(|e| e.raw).collect()),
    );

    let bodies: Vec<&str> = sides.iter().map(StatusFile::body).collect();
    let body = merge_bodies(&bodies)?;

    Some(StatusFile { front, lane, body })
}

/// Parse every version and merge them; `None` if any version is not a
/// status file or the merge has no rule for the difference.
pub fn merge_texts(texts: &[&str]) -> Result<Option<String>> {
    let parsed: Option<Vec<StatusFile>> = texts.iter().map(|t| StatusFile::parse(t)).collect();
    match parsed.as_deref().and_then(merge) {
        Some(file) => Ok(Some(file.render()?)),
        None => Ok(None),
    }
}

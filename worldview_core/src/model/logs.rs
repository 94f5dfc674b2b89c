use crate::timeseries::{merge, Reducer, TimeSeries};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Unknown,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn parse(s: &str) -> LogLevel {
        match s.to_lowercase().as_str() {
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warning" | "warn" => LogLevel::Warning,
            "error" => LogLevel::Error,
            "critical" | "fatal" => LogLevel::Critical,
            _ => LogLevel::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Unknown => "unknown",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Critical)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Word skeleton of a log message: the alphabetic tokens, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Pattern {
    words: Vec<String>,
}

impl Pattern {
    pub fn new(message: &str) -> Self {
        let first_line = message.lines().next().unwrap_or("");
        let words = first_line
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| w.len() > 1 && w.chars().all(|c| c.is_alphabetic() || c == '_'))
            .map(str::to_string)
            .collect();
        Self { words }
    }

    pub fn from_words(words: &str) -> Self {
        Self {
            words: words.split_whitespace().map(str::to_string).collect(),
        }
    }

    pub fn words(&self) -> String {
        self.words.join(" ")
    }

    /// Same number of words with at most a quarter of them differing.
    pub fn weak_equal(&self, other: &Pattern) -> bool {
        if self.words.len() != other.words.len() || self.words.is_empty() {
            return false;
        }
        let diff = self
            .words
            .iter()
            .zip(other.words.iter())
            .filter(|(a, b)| a != b)
            .count();
        diff * 4 <= self.words.len()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogPattern {
    pub pattern: Pattern,
    pub sample: String,
    pub multiline: bool,
    pub messages: TimeSeries,
    pub similar_pattern_hashes: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogMessages {
    pub messages: TimeSeries,
    /// Keyed by the hash of the first pattern seen.
    pub patterns: BTreeMap<String, LogPattern>,
}

impl LogMessages {
    /// Attaches per-step message counts of one pattern, merging it into a
    /// known pattern when the hash was seen as similar or the words match weakly.
    pub fn add_pattern(&mut self, hashes: &[&str], pattern: Pattern, sample: &str, multiline: bool, values: &TimeSeries) {
        let Some(first) = hashes.first() else {
            return;
        };
        let key = self
            .patterns
            .iter()
            .find(|(k, p)| hashes.iter().any(|h| *k == h || p.similar_pattern_hashes.contains(*h)))
            .or_else(|| self.patterns.iter().find(|(_, p)| p.pattern.weak_equal(&pattern)))
            .map(|(k, _)| k.clone());
        let p = match key {
            Some(k) => self.patterns.entry(k).or_default(),
            None => self.patterns.entry(first.to_string()).or_insert_with(|| LogPattern {
                pattern,
                sample: sample.to_string(),
                multiline,
                ..Default::default()
            }),
        };
        p.similar_pattern_hashes.extend(hashes.iter().map(|h| h.to_string()));
        merge(&mut p.messages, values, Reducer::NanSum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeseries::{Duration, Time};

    #[test]
    fn test_pattern_words() {
        let p = Pattern::new("2024-01-01 ERROR failed to connect to 10.0.0.1:5432: timeout\n\tat foo");
        assert_eq!(p.words(), "ERROR failed to connect to timeout");
    }

    #[test]
    fn test_weak_equal() {
        let a = Pattern::from_words("user alice logged in from office");
        let b = Pattern::from_words("user bob logged in from office");
        let c = Pattern::from_words("user bob logged out from home");
        assert!(a.weak_equal(&b));
        assert!(!a.weak_equal(&c));
        assert!(!a.weak_equal(&Pattern::from_words("user")));
    }

    #[test]
    fn test_patterns_merge() {
        let v = TimeSeries::from_data(Time(0), Duration(30), vec![1.0, 2.0]);
        let mut msgs = LogMessages::default();
        msgs.add_pattern(&["h1"], Pattern::from_words("user alice logged in from office"), "s1", false, &v);
        msgs.add_pattern(&["h2"], Pattern::from_words("user bob logged in from office"), "s2", false, &v);
        msgs.add_pattern(&["h2"], Pattern::from_words("completely different"), "s3", false, &v);
        msgs.add_pattern(&["h3"], Pattern::from_words("disk is full"), "s4", true, &v);
        assert_eq!(msgs.patterns.len(), 2);
        let p = &msgs.patterns["h1"];
        assert_eq!(p.messages.data(), &[3.0, 6.0]);
        assert!(p.similar_pattern_hashes.contains("h2"));
        assert!(msgs.patterns["h3"].multiline);
    }
}

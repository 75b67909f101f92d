use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Who said a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// A single labeled transcript line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub speaker: Speaker,

    /// Display tag, e.g. "You" or "Rhino"
    pub label: String,

    pub text: String,

    /// When this line was received
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for TranscriptLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.text)
    }
}

/// Most recent transcript lines, oldest first
#[derive(Debug, Clone)]
pub struct TranscriptLog {
    lines: VecDeque<TranscriptLine>,
    capacity: usize,
    user_label: String,
    assistant_label: String,
}

impl TranscriptLog {
    pub fn new(capacity: usize, user_label: impl Into<String>, assistant_label: impl Into<String>) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            user_label: user_label.into(),
            assistant_label: assistant_label.into(),
        }
    }

    /// Append a line, dropping the oldest beyond capacity
    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) -> &TranscriptLine {
        let label = match speaker {
            Speaker::User => self.user_label.clone(),
            Speaker::Assistant => self.assistant_label.clone(),
        };

        self.lines.push_back(TranscriptLine {
            speaker,
            label,
            text: text.into(),
            timestamp: Utc::now(),
        });
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
        &self.lines[self.lines.len() - 1]
    }

    pub fn lines(&self) -> Vec<TranscriptLine> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_labeled() {
        let mut log = TranscriptLog::new(5, "You", "Rhino");
        log.push(Speaker::User, "hello");
        log.push(Speaker::Assistant, "welcome to xrhino");

        let rendered: Vec<String> = log.lines().iter().map(|l| l.to_string()).collect();
        assert_eq!(rendered, vec!["You: hello", "Rhino: welcome to xrhino"]);
    }

    #[test]
    fn test_keeps_five_most_recent_in_order() {
        let mut log = TranscriptLog::new(5, "You", "Rhino");
        for i in 0..8 {
            log.push(Speaker::User, format!("line {}", i));
        }

        let texts: Vec<String> = log.lines().into_iter().map(|l| l.text).collect();
        assert_eq!(texts, vec!["line 3", "line 4", "line 5", "line 6", "line 7"]);
        assert_eq!(log.len(), 5);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut log = TranscriptLog::new(0, "You", "Rhino");
        log.push(Speaker::User, "a");
        log.push(Speaker::User, "b");
        assert_eq!(log.len(), 1);
        assert_eq!(log.lines()[0].text, "b");
    }
}

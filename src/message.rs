use crate::error::Result;
use chrono::{DateTime, Local};

/// One retrieved notification email.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub subject: String,
    /// Plain-text body
    pub body: String,
    pub timestamp: DateTime<Local>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        timestamp: DateTime<Local>,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            timestamp,
        }
    }
}

/// Where a run reads its messages from.
pub trait MessageSource {
    /// Messages received within `[start, end]`.
    fn search(&self, start: DateTime<Local>, end: DateTime<Local>) -> Result<Vec<Message>>;
}

/// Fixed message list, used by `--test-email` and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    messages: Vec<Message>,
}

impl StaticSource {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl MessageSource for StaticSource {
    fn search(&self, start: DateTime<Local>, end: DateTime<Local>) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .iter()
            .filter(|m| m.timestamp >= start && m.timestamp <= end)
            .cloned()
            .collect())
    }
}

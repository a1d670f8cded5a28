//! Greeting text with `{date}`, `{time}`, `{timestamp}` and `{group}`
//! placeholders.

use crate::time::{date_and_time, rfc3339};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub const DEFAULT_GREETING: &str = "👋 Welcome to {group}!\n\n\
We're glad to have you here. Please take a moment to read the group description.\n\n\
Joined: {date} at {time} (UTC)";

const PLACEHOLDERS: &[&str] = &["date", "time", "timestamp", "group"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GreetingTemplate(String);

impl Default for GreetingTemplate {
    fn default() -> Self {
        Self(DEFAULT_GREETING.to_string())
    }
}

impl GreetingTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject empty text and unknown `{name}` placeholders
    pub fn validate(&self) -> Result<(), String> {
        if self.0.trim().is_empty() {
            return Err("dispatch.template must not be empty".to_string());
        }

        let mut rest = self.0.as_str();
        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else { break };
            let name = &after[..close];
            let looks_like_placeholder =
                !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if looks_like_placeholder && !PLACEHOLDERS.contains(&name) {
                return Err(format!(
                    "dispatch.template uses unknown placeholder {{{}}} (known: {})",
                    name,
                    PLACEHOLDERS.join(", ")
                ));
            }
            rest = &after[close + 1..];
        }
        Ok(())
    }

    pub fn render(&self, group_name: &str, at: SystemTime) -> String {
        let (date, time) = date_and_time(at);
        // {group} last: a display name may itself contain braces
        self.0
            .replace("{date}", &date)
            .replace("{time}", &time)
            .replace("{timestamp}", &rfc3339(at))
            .replace("{group}", group_name)
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A named task definition, stored in a [`TaskContainer`](crate::TaskContainer)
/// before (or alongside) scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    /// Unique key within a container.
    pub name: String,
    /// Higher runs first.
    #[serde(default)]
    pub priority: i32,
    /// Disabled definitions are kept but never scheduled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_interval_ms: u64,
    /// Delay after scheduling before first eligibility.
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

impl TaskDefinition {
    /// Create an enabled, non-recurring definition with priority 0 and no retries.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            enabled: default_enabled(),
            recurring: false,
            max_retries: 0,
            retry_interval_ms: 0,
            delay_ms: 0,
            description: None,
            tags: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_recurring(mut self, recurring: bool) -> Self {
        self.recurring = recurring;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, interval: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Wait between a failed run and its retry.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let def = TaskDefinition::new("expose");
        assert_eq!(def.name, "expose");
        assert_eq!(def.priority, 0);
        assert!(def.enabled);
        assert!(!def.recurring);
        assert_eq!(def.retry_interval(), Duration::ZERO);
        assert_eq!(def.delay(), Duration::ZERO);
    }

    #[test]
    fn builder_sets_durations_in_millis() {
        let def = TaskDefinition::new("plate_solve")
            .with_retries(3, Duration::from_millis(250))
            .with_delay(Duration::from_secs(2));
        assert_eq!(def.max_retries, 3);
        assert_eq!(def.retry_interval_ms, 250);
        assert_eq!(def.delay(), Duration::from_secs(2));
    }

    #[test]
    fn deserialize_minimal_json_fills_defaults() {
        let def: TaskDefinition = serde_json::from_str(r#"{"name":"slew"}"#).unwrap();
        assert_eq!(def, TaskDefinition::new("slew"));
    }
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;
use uuid::Uuid;

/// One extraction rule for a named field.
///
/// `selector` addresses the node, `action` picks what to take from it
/// (text, html, attribute name), `range` optionally narrows a node list
/// and `callback` names a user hook run on the extracted value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub selector: String,
    pub action: String,
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub callback: Option<String>,
}

/// Unit of crawl work moved through the pipeline.
///
/// A task is created by a seed producer or re-admitted by the parser for
/// a discovered sub-URL, enqueued exactly once and discarded after the
/// downloader forwards it. There is no persisted task history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub task_type: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub rule_name: Option<String>,
    /// Two-level mapping: field name -> extraction rule.
    #[serde(default)]
    pub rule: HashMap<String, FieldRule>,
    /// Link-hop distance from the originating seed task.
    #[serde(default)]
    pub depth: u32,
    /// Open extension map carried through download and parse.
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub create_time: i64,
}

impl Task {
    pub fn new(url: impl Into<String>) -> Self {
        Task {
            id: Uuid::new_v4(),
            task_type: "task".to_string(),
            url: url.into(),
            method: "GET".to_string(),
            referer: None,
            rule_name: None,
            rule: HashMap::new(),
            depth: 0,
            context: HashMap::new(),
            create_time: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_rule(mut self, name: impl Into<String>, rule: HashMap<String, FieldRule>) -> Self {
        self.rule_name = Some(name.into());
        self.rule = rule;
        self
    }

    pub fn add_context<T>(mut self, key: impl AsRef<str>, value: T) -> Self
    where
        T: serde::Serialize,
    {
        if let Ok(val) = serde_json::to_value(value) {
            self.context.insert(key.as_ref().to_string(), val);
        }
        self
    }

    /// Derive a sub-task for a URL discovered while parsing this task.
    ///
    /// The child inherits method, context and incremented depth; rule and
    /// rule_name are cleared so the child resolves its rules independently.
    pub fn derive(&self, url: impl Into<String>) -> Task {
        Task {
            id: Uuid::new_v4(),
            task_type: self.task_type.clone(),
            url: url.into(),
            method: self.method.clone(),
            referer: Some(self.url.clone()),
            rule_name: None,
            rule: HashMap::new(),
            depth: self.depth + 1,
            context: self.context.clone(),
            create_time: chrono::Utc::now().timestamp(),
        }
    }

    /// True when the caller opted out of dedup via `context["do_dedup"] = false`.
    pub fn dedup_disabled(&self) -> bool {
        matches!(
            self.context.get("do_dedup"),
            Some(serde_json::Value::Bool(false))
        )
    }
}

/// A task URL must be an absolute http or https URL.
pub fn validate_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            (parsed.scheme() == "http" || parsed.scheme() == "https")
                && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("http://example.com/a/b?c=d"));
        assert!(validate_url("https://example.com"));
        assert!(!validate_url("ftp://example.com/file"));
        assert!(!validate_url("javascript:void(0)"));
        assert!(!validate_url("/relative/path"));
        assert!(!validate_url("example.com/no-scheme"));
        assert!(!validate_url(""));
    }

    #[test]
    fn test_derive_clears_rules() {
        let mut rule = HashMap::new();
        rule.insert(
            "title".to_string(),
            FieldRule {
                selector: "h1".to_string(),
                action: "text".to_string(),
                range: None,
                callback: None,
            },
        );
        let parent = Task::new("http://example.com/list")
            .with_rule("list_page", rule)
            .with_depth(2)
            .add_context("session", "abc");

        let child = parent.derive("http://example.com/item/1");
        assert_eq!(child.depth, 3);
        assert_eq!(child.referer.as_deref(), Some("http://example.com/list"));
        assert!(child.rule.is_empty());
        assert!(child.rule_name.is_none());
        assert_eq!(child.context, parent.context);
        assert_ne!(child.id, parent.id);
    }

    #[test]
    fn test_dedup_opt_out() {
        let task = Task::new("http://example.com");
        assert!(!task.dedup_disabled());
        let task = task.add_context("do_dedup", false);
        assert!(task.dedup_disabled());
    }

    #[test]
    fn test_task_json_round_trip() {
        let task = Task::new("http://example.com").with_method("POST");
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"type\":\"task\""));
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.url, task.url);
        assert_eq!(back.method, "POST");
    }
}

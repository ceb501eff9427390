//! Capability sets advertised by downstream servers.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use crate::config::schema::ProxyDescriptor;

/// One tool, resource or prompt as listed by the downstream.
///
/// `name` is the tool/prompt name, or the URI for resources.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capability {
    pub name: String,
    pub description: Option<String>,
    pub definition: Value,
}

impl Capability {
    /// Build from a listing entry, reading the identifier from `key`.
    /// A missing identifier yields an empty name, which import rejects.
    pub fn from_listing(definition: Value, key: &str) -> Self {
        let name = definition
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let description = definition
            .get("description")
            .and_then(Value::as_str)
            .map(String::from);
        Self {
            name,
            description,
            definition,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            definition: serde_json::json!({ "name": name }),
            name,
            description: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CapabilitySet {
    pub tools: Vec<Capability>,
    pub resources: Vec<Capability>,
    pub prompts: Vec<Capability>,
}

impl CapabilitySet {
    pub fn len(&self) -> usize {
        self.tools.len() + self.resources.len() + self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the set keeping only what `filter` permits.
    pub fn filtered(&self, filter: &CapabilityFilter) -> CapabilitySet {
        let keep = |items: &[Capability]| -> Vec<Capability> {
            items.iter().filter(|c| filter.permits(&c.name)).cloned().collect()
        };
        CapabilitySet {
            tools: keep(&self.tools),
            resources: keep(&self.resources),
            prompts: keep(&self.prompts),
        }
    }
}

/// Allow/deny lists from a descriptor's `whiteLists` and `exclude`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityFilter {
    allow: Option<HashSet<String>>,
    deny: HashSet<String>,
}

impl CapabilityFilter {
    pub fn new(allow: Option<Vec<String>>, deny: Vec<String>) -> Self {
        Self {
            allow: allow.map(|names| names.into_iter().collect()),
            deny: deny.into_iter().collect(),
        }
    }

    pub fn from_descriptor(descriptor: &ProxyDescriptor) -> Self {
        Self::new(descriptor.white_lists.clone(), descriptor.exclude.clone())
    }

    /// Deny wins over allow.
    pub fn permits(&self, name: &str) -> bool {
        if self.deny.contains(name) {
            return false;
        }
        match &self.allow {
            Some(allow) => allow.contains(name),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set() -> CapabilitySet {
        CapabilitySet {
            tools: vec![Capability::named("forecast"), Capability::named("alerts")],
            resources: vec![Capability::from_listing(json!({"uri": "file:///readme"}), "uri")],
            prompts: vec![Capability::named("summarize")],
        }
    }

    #[test]
    fn test_from_listing() {
        let tool = Capability::from_listing(
            json!({"name": "forecast", "description": "Weather", "inputSchema": {}}),
            "name",
        );
        assert_eq!(tool.name, "forecast");
        assert_eq!(tool.description.as_deref(), Some("Weather"));

        let nameless = Capability::from_listing(json!({"description": "?"}), "name");
        assert!(nameless.name.is_empty());
    }

    #[test]
    fn test_no_filter_keeps_everything() {
        assert_eq!(set().filtered(&CapabilityFilter::default()), set());
    }

    #[test]
    fn test_exclude_removes() {
        let filtered = set().filtered(&CapabilityFilter::new(None, vec!["alerts".into()]));
        assert_eq!(filtered.tools, vec![Capability::named("forecast")]);
        assert_eq!(filtered.len(), 3);
    }

    #[test]
    fn test_allow_list_keeps_only_listed() {
        let filter = CapabilityFilter::new(
            Some(vec!["forecast".into(), "file:///readme".into()]),
            vec![],
        );
        let filtered = set().filtered(&filter);
        assert_eq!(filtered.tools.len(), 1);
        assert_eq!(filtered.resources.len(), 1);
        assert!(filtered.prompts.is_empty());
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let filter = CapabilityFilter::new(Some(vec!["forecast".into()]), vec!["forecast".into()]);
        assert!(!filter.permits("forecast"));
    }
}

//! Namespaced catalog of imported capabilities.
//!
//! # Design Decisions
//! - Tools and prompts are renamed `{prefix}_{name}`
//! - Resource URIs gain the prefix as their authority: `proto://prefix/path`,
//!   or `prefix/uri` when the URI has no scheme
//! - Importing produces a new catalog; the old one is untouched on error

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use thiserror::Error;

use crate::client::{Capability, CapabilitySet};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    #[error("prefix '{0}' is already imported")]
    DuplicatePrefix(String),

    #[error("{prefix}: downstream listed a {kind} with an empty name")]
    EmptyName { prefix: String, kind: &'static str },

    #[error("{prefix}: namespaced {kind} name '{name}' collides")]
    NameCollision {
        prefix: String,
        kind: &'static str,
        name: String,
    },
}

/// A capability as exposed on the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamespacedCapability {
    /// Name (or URI) clients see.
    pub name: String,
    /// Name (or URI) the downstream knows it by.
    pub original: String,
    pub description: Option<String>,
}

/// Everything imported under one prefix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Namespace {
    pub prefix: String,
    pub server_name: String,
    pub tools: Vec<NamespacedCapability>,
    pub resources: Vec<NamespacedCapability>,
    pub prompts: Vec<NamespacedCapability>,
}

impl Namespace {
    pub fn capability_count(&self) -> usize {
        self.tools.len() + self.resources.len() + self.prompts.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Catalog {
    namespaces: BTreeMap<String, Namespace>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of this catalog with `capabilities` imported under
    /// `prefix`.
    pub fn with_namespace(
        &self,
        prefix: &str,
        server_name: &str,
        capabilities: &CapabilitySet,
    ) -> Result<Catalog, ImportError> {
        if self.namespaces.contains_key(prefix) {
            return Err(ImportError::DuplicatePrefix(prefix.to_string()));
        }

        let namespace = Namespace {
            prefix: prefix.to_string(),
            server_name: server_name.to_string(),
            tools: namespaced(prefix, "tool", &capabilities.tools, prefixed_name)?,
            resources: namespaced(prefix, "resource", &capabilities.resources, prefixed_uri)?,
            prompts: namespaced(prefix, "prompt", &capabilities.prompts, prefixed_name)?,
        };

        for (kind, mine) in [
            ("tool", &namespace.tools),
            ("resource", &namespace.resources),
            ("prompt", &namespace.prompts),
        ] {
            let taken: HashSet<&str> = self
                .namespaces
                .values()
                .flat_map(|ns| match kind {
                    "tool" => &ns.tools,
                    "resource" => &ns.resources,
                    _ => &ns.prompts,
                })
                .map(|c| c.name.as_str())
                .collect();
            if let Some(clash) = mine.iter().find(|c| taken.contains(c.name.as_str())) {
                return Err(ImportError::NameCollision {
                    prefix: prefix.to_string(),
                    kind,
                    name: clash.name.clone(),
                });
            }
        }

        let mut next = self.clone();
        next.namespaces.insert(prefix.to_string(), namespace);
        Ok(next)
    }

    pub fn get(&self, prefix: &str) -> Option<&Namespace> {
        self.namespaces.get(prefix)
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.namespaces.contains_key(prefix)
    }

    /// Prefixes in sorted order.
    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.values()
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

fn namespaced(
    prefix: &str,
    kind: &'static str,
    items: &[Capability],
    rename: fn(&str, &str) -> String,
) -> Result<Vec<NamespacedCapability>, ImportError> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if item.name.trim().is_empty() {
            return Err(ImportError::EmptyName {
                prefix: prefix.to_string(),
                kind,
            });
        }
        let name = rename(prefix, &item.name);
        if !seen.insert(name.clone()) {
            return Err(ImportError::NameCollision {
                prefix: prefix.to_string(),
                kind,
                name,
            });
        }
        out.push(NamespacedCapability {
            name,
            original: item.name.clone(),
            description: item.description.clone(),
        });
    }
    Ok(out)
}

pub fn prefixed_name(prefix: &str, name: &str) -> String {
    format!("{}_{}", prefix, name)
}

pub fn prefixed_uri(prefix: &str, uri: &str) -> String {
    match uri.split_once("://") {
        Some((scheme, rest)) => format!("{}://{}/{}", scheme, prefix, rest),
        None => format!("{}/{}", prefix, uri),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(tools: &[&str]) -> CapabilitySet {
        CapabilitySet {
            tools: tools.iter().map(|t| Capability::named(*t)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_renaming() {
        assert_eq!(prefixed_name("weather", "forecast"), "weather_forecast");
        assert_eq!(prefixed_uri("docs", "file:///readme.md"), "file://docs//readme.md");
        assert_eq!(prefixed_uri("docs", "notes://today"), "notes://docs/today");
        assert_eq!(prefixed_uri("docs", "readme"), "docs/readme");
    }

    #[test]
    fn test_import_adds_namespace() {
        let mut set = caps(&["forecast"]);
        set.resources.push(Capability::from_listing(
            serde_json::json!({"uri": "weather://today"}),
            "uri",
        ));

        let catalog = Catalog::new().with_namespace("weather", "weather-server", &set).unwrap();
        let ns = catalog.get("weather").unwrap();
        assert_eq!(ns.tools[0].name, "weather_forecast");
        assert_eq!(ns.tools[0].original, "forecast");
        assert_eq!(ns.resources[0].name, "weather://weather/today");
        assert_eq!(ns.capability_count(), 2);
    }

    #[test]
    fn test_duplicate_prefix_leaves_catalog_unchanged() {
        let catalog = Catalog::new().with_namespace("a", "s", &caps(&["x"])).unwrap();
        let err = catalog.with_namespace("a", "s", &caps(&["y"])).unwrap_err();
        assert_eq!(err, ImportError::DuplicatePrefix("a".into()));
        assert_eq!(catalog.get("a").unwrap().tools[0].original, "x");
    }

    #[test]
    fn test_cross_namespace_collision() {
        // "a" + "b_c" and "a_b" + "c" both become "a_b_c".
        let catalog = Catalog::new().with_namespace("a", "s", &caps(&["b_c"])).unwrap();
        let err = catalog.with_namespace("a_b", "s", &caps(&["c"])).unwrap_err();
        assert!(matches!(err, ImportError::NameCollision { ref name, .. } if name == "a_b_c"));
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_empty_and_duplicate_names_rejected() {
        let err = Catalog::new().with_namespace("a", "s", &caps(&[""])).unwrap_err();
        assert!(matches!(err, ImportError::EmptyName { kind: "tool", .. }));

        let err = Catalog::new().with_namespace("a", "s", &caps(&["x", "x"])).unwrap_err();
        assert!(matches!(err, ImportError::NameCollision { .. }));
    }

    #[test]
    fn test_prefixes_sorted() {
        let catalog = Catalog::new()
            .with_namespace("zeta", "s", &caps(&[]))
            .and_then(|c| c.with_namespace("alpha", "s", &caps(&[])))
            .unwrap();
        assert_eq!(catalog.prefixes().collect::<Vec<_>>(), vec!["alpha", "zeta"]);
    }
}

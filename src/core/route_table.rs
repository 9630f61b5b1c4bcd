//! Static route table mapping path prefixes to backend services.
//!
//! The table is built once at startup from the configured backend base URLs
//! and is read-only afterwards. Each route family accepts two prefixes: the
//! versioned form (`/api/v1/posts`) and the legacy unprefixed form
//! (`/posts`). Both resolve to the same backend and the same rewritten path
//! so older clients keep working. Resolution is longest-prefix match at
//! path-segment boundaries; at most one entry matches a given path.
use std::sync::Arc;

use crate::config::GatewayConfig;

const VERSIONED_PREFIX: &str = "/api/v1";

/// One proxied destination: a route family name, its accepted prefixes and
/// the backend it forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// Route family name ("auth", "posts", "categories").
    pub name: String,
    /// Accepted path prefixes, versioned first.
    pub prefixes: Vec<String>,
    /// Base URL of the backend handling this family.
    pub backend_base_url: String,
    /// Prefix re-applied to the path sent to the backend.
    pub rewrite_prefix: String,
}

impl RouteEntry {
    fn family(name: &str, backend_base_url: &str) -> Self {
        let legacy = format!("/{name}");
        Self {
            name: name.to_string(),
            prefixes: vec![format!("{VERSIONED_PREFIX}{legacy}"), legacy.clone()],
            backend_base_url: backend_base_url.trim_end_matches('/').to_string(),
            rewrite_prefix: legacy,
        }
    }

    /// The longest accepted prefix matching `path` at a segment boundary.
    fn matching_prefix(&self, path: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .filter(|prefix| {
                path.strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            })
            .max_by_key(|prefix| prefix.len())
            .map(|prefix| prefix.as_str())
    }

    /// Rewrite an inbound path into the path sent to the backend: strip the
    /// matched prefix, re-apply the canonical one. Pure; panics never.
    pub fn rewrite(&self, path: &str) -> String {
        match self.matching_prefix(path) {
            Some(prefix) => format!("{}{}", self.rewrite_prefix, &path[prefix.len()..]),
            // Unmatched paths pass through unchanged; resolve() never hands
            // such a path to rewrite().
            None => path.to_string(),
        }
    }
}

/// Immutable collection of route entries with longest-prefix resolution.
#[derive(Debug)]
pub struct RouteTable {
    entries: Vec<Arc<RouteEntry>>,
}

impl RouteTable {
    /// Build the table for the configured backends: the auth service owns
    /// `auth`, the content service owns both `posts` and `categories`.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            entries: vec![
                Arc::new(RouteEntry::family("auth", &config.auth_service_url)),
                Arc::new(RouteEntry::family("posts", &config.post_service_url)),
                Arc::new(RouteEntry::family("categories", &config.post_service_url)),
            ],
        }
    }

    /// Resolve a path to its route entry and rewritten backend path.
    /// Longest-prefix match across all entries; `None` means Not Found.
    pub fn resolve(&self, path: &str) -> Option<(Arc<RouteEntry>, String)> {
        self.entries
            .iter()
            .filter_map(|entry| {
                entry
                    .matching_prefix(path)
                    .map(|prefix| (entry, prefix.len()))
            })
            .max_by_key(|(_, prefix_len)| *prefix_len)
            .map(|(entry, _)| (entry.clone(), entry.rewrite(path)))
    }

    /// Route family names, in table order.
    pub fn family_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// (family, backend base URL) pairs for diagnostics endpoints.
    pub fn backends(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|e| (e.name.clone(), e.backend_base_url.clone()))
            .collect()
    }
}

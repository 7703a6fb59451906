//! Name and type filtering applied to a group's member proxies

use std::collections::HashSet;

use fancy_regex::Regex;
use tracing::warn;

use crate::adapter::ProxyHandle;
use crate::error::Result;

/// Ordered include filters plus exclusions.
///
/// Include filters are tried in order; the first one matching a name claims
/// the proxy, so earlier filters rank their matches first.
#[derive(Debug, Clone, Default)]
pub struct ProxyFilter {
    filters: Vec<Regex>,
    exclude: Option<Regex>,
    exclude_types: Vec<String>,
}

impl ProxyFilter {
    /// `filter` holds backtick-separated regexes, `exclude_type` holds
    /// `|`-separated adapter type names.
    pub fn new(filter: &str, exclude_filter: &str, exclude_type: &str) -> Result<Self> {
        let filters = filter
            .split('`')
            .filter(|f| !f.is_empty())
            .map(Regex::new)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let exclude = if exclude_filter.is_empty() {
            None
        } else {
            Some(Regex::new(exclude_filter)?)
        };

        let exclude_types = exclude_type
            .split('|')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            filters,
            exclude,
            exclude_types,
        })
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    /// Proxies matching any include filter, in filter-priority order,
    /// de-duplicated by name.
    pub fn select(&self, proxies: &[ProxyHandle]) -> Vec<ProxyHandle> {
        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for filter in &self.filters {
            for proxy in proxies {
                let name = proxy.name();
                if matches(filter, name) && seen.insert(name.to_string()) {
                    selected.push(proxy.clone());
                }
            }
        }
        selected
    }

    /// Re-rank proxies gathered from several providers: filter matches first
    /// in filter-priority order, then everything else in original order.
    pub fn rerank(&self, proxies: Vec<ProxyHandle>) -> Vec<ProxyHandle> {
        let mut ranked = self.select(&proxies);
        let mut seen: HashSet<String> = ranked.iter().map(|p| p.name().to_string()).collect();
        for proxy in proxies {
            if seen.insert(proxy.name().to_string()) {
                ranked.push(proxy);
            }
        }
        ranked
    }

    /// Drop excluded adapter types, then names matching the exclude filter
    pub fn exclude(&self, mut proxies: Vec<ProxyHandle>) -> Vec<ProxyHandle> {
        if !self.exclude_types.is_empty() {
            proxies.retain(|p| {
                let kind = p.adapter_type();
                !self
                    .exclude_types
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(kind.as_str()))
            });
        }

        if let Some(exclude) = &self.exclude {
            proxies.retain(|p| !matches(exclude, p.name()));
        }

        proxies
    }
}

/// Match `name`, treating a pattern that exhausts its backtrack limit as no match
fn matches(re: &Regex, name: &str) -> bool {
    re.is_match(name).unwrap_or_else(|e| {
        warn!(pattern = re.as_str(), name, "Filter evaluation failed: {}", e);
        false
    })
}

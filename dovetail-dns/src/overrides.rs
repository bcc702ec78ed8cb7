//! Domain override routing
//!
//! A static table mapping domain suffixes to alternate classic DNS
//! upstreams. Questions under a listed suffix bypass the DoH upstream
//! entirely and are resolved against the rule's server instead; the typical
//! use is keeping internal zones on an internal resolver.

use std::net::SocketAddr;

use hickory_proto::rr::Name;

/// A single suffix-to-upstream rule.
#[derive(Debug, Clone)]
pub struct OverrideRule {
    suffix: Name,
    upstream: SocketAddr,
}

impl OverrideRule {
    pub fn new(mut suffix: Name, upstream: SocketAddr) -> Self {
        suffix.set_fqdn(true);
        Self { suffix, upstream }
    }

    pub fn suffix(&self) -> &Name {
        &self.suffix
    }

    pub fn upstream(&self) -> SocketAddr {
        self.upstream
    }
}

/// Immutable suffix table with longest-match-wins semantics.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    rules: Vec<OverrideRule>,
}

impl OverrideTable {
    pub fn new(rules: impl IntoIterator<Item = OverrideRule>) -> Self {
        let mut rules: Vec<OverrideRule> = rules.into_iter().collect();
        // Most specific first, so a linear scan returns the longest match.
        rules.sort_by_key(|rule| std::cmp::Reverse(rule.suffix.num_labels()));
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// The upstream for the longest suffix matching `name`, if any.
    ///
    /// Matching is label-aligned and case-insensitive.
    pub fn upstream_for(&self, name: &Name) -> Option<SocketAddr> {
        self.rules
            .iter()
            .find(|rule| rule.suffix.zone_of(name))
            .map(|rule| rule.upstream)
    }
}

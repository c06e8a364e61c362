//! Per-backend feature capabilities.
//!
//! A [`CapabilitySet`] is plain data: one table per backend variant, built once
//! when the adapter is constructed and only read afterwards. Anything the table
//! does not mention is treated as unsupported.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Optional relational features a backend may or may not provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFlag {
    ForeignKeys,
    Views,
    MaterializedViews,
    Ranges,
    PartialIndex,
    IndexSortOrder,
    TransactionIsolation,
    Extensions,
    AdvisoryLocks,
    StatementCache,
    InsertReturning,
    /// `pg_collation` exists and `pg_attribute.attcollation` is populated.
    Collations,
    /// `generate_subscripts` and friends are callable in catalog queries.
    ArraySubscripts,
    /// Backslashes inside `'...'` literals are literal characters.
    StandardConformingStrings,
}

impl FeatureFlag {
    pub const ALL: [FeatureFlag; 14] = [
        FeatureFlag::ForeignKeys,
        FeatureFlag::Views,
        FeatureFlag::MaterializedViews,
        FeatureFlag::Ranges,
        FeatureFlag::PartialIndex,
        FeatureFlag::IndexSortOrder,
        FeatureFlag::TransactionIsolation,
        FeatureFlag::Extensions,
        FeatureFlag::AdvisoryLocks,
        FeatureFlag::StatementCache,
        FeatureFlag::InsertReturning,
        FeatureFlag::Collations,
        FeatureFlag::ArraySubscripts,
        FeatureFlag::StandardConformingStrings,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            FeatureFlag::ForeignKeys => "foreign_keys",
            FeatureFlag::Views => "views",
            FeatureFlag::MaterializedViews => "materialized_views",
            FeatureFlag::Ranges => "ranges",
            FeatureFlag::PartialIndex => "partial_index",
            FeatureFlag::IndexSortOrder => "index_sort_order",
            FeatureFlag::TransactionIsolation => "transaction_isolation",
            FeatureFlag::Extensions => "extensions",
            FeatureFlag::AdvisoryLocks => "advisory_locks",
            FeatureFlag::StatementCache => "statement_cache",
            FeatureFlag::InsertReturning => "insert_returning",
            FeatureFlag::Collations => "collations",
            FeatureFlag::ArraySubscripts => "array_subscripts",
            FeatureFlag::StandardConformingStrings => "standard_conforming_strings",
        }
    }
}

impl fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Immutable mapping from [`FeatureFlag`] to support.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet {
    flags: BTreeMap<FeatureFlag, bool>,
}

impl CapabilitySet {
    /// A set with nothing supported.
    pub fn none() -> Self {
        Self::default()
    }

    /// A set with every known flag supported.
    pub fn all() -> Self {
        FeatureFlag::ALL.iter().map(|flag| (*flag, true)).collect()
    }

    /// Builder-style setter used when assembling a backend table.
    pub fn with(mut self, flag: FeatureFlag, supported: bool) -> Self {
        self.flags.insert(flag, supported);
        self
    }

    /// Whether the backend supports `flag`. Unset flags are unsupported.
    pub fn capability(&self, flag: FeatureFlag) -> bool {
        self.flags.get(&flag).copied().unwrap_or(false)
    }

    /// Every flag with its resolved value, in declaration order.
    pub fn resolved(&self) -> impl Iterator<Item = (FeatureFlag, bool)> + '_ {
        FeatureFlag::ALL
            .iter()
            .map(move |flag| (*flag, self.capability(*flag)))
    }
}

impl FromIterator<(FeatureFlag, bool)> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = (FeatureFlag, bool)>>(iter: I) -> Self {
        Self {
            flags: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_flags_are_unsupported() {
        let caps = CapabilitySet::none().with(FeatureFlag::Views, true);
        for flag in FeatureFlag::ALL {
            if flag != FeatureFlag::Views {
                assert!(!caps.capability(flag), "{flag} should default to false");
            }
        }
        assert!(caps.capability(FeatureFlag::Views));
    }

    #[test]
    fn test_explicit_false_stays_false() {
        let caps = CapabilitySet::all().with(FeatureFlag::Ranges, false);
        assert!(!caps.capability(FeatureFlag::Ranges));
        assert!(caps.capability(FeatureFlag::ForeignKeys));
    }

    #[test]
    fn test_all_covers_every_flag() {
        let caps = CapabilitySet::all();
        assert!(caps.resolved().all(|(_, supported)| supported));
        assert_eq!(caps.resolved().count(), FeatureFlag::ALL.len());
    }

    #[test]
    fn test_deserialize_from_toml() {
        let caps: CapabilitySet = toml::from_str("views = true\nranges = false\n").unwrap();
        assert!(caps.capability(FeatureFlag::Views));
        assert!(!caps.capability(FeatureFlag::Ranges));
        assert!(!caps.capability(FeatureFlag::AdvisoryLocks));
    }

    #[test]
    fn test_keys_match_serde_names() {
        for flag in FeatureFlag::ALL {
            let json = serde_json::to_string(&flag).unwrap();
            assert_eq!(json, format!("\"{}\"", flag.key()));
        }
    }
}

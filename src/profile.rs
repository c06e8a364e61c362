//! Backend variant profiles.
//!
//! A profile is the whole description of one backend variant: its reported
//! version, capability table, statement rules and any extra connection
//! keywords. Onboarding a new variant means adding a profile (in code or in
//! `profiles.toml`), not writing new adapter types.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::capability::{CapabilitySet, FeatureFlag};
use crate::catalog::CatalogQueryTranslator;
use crate::error::{AdapterError, Result};
use crate::filter::{StatementFilter, StatementRule, SCHEMA_PURPOSE};
use crate::negotiate::BackendVersionTag;
use crate::params::{ParameterAllowList, ParameterMapper};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendProfile {
    pub name: String,
    pub version: BackendVersionTag,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub statement_rules: Vec<StatementRule>,
    /// Connection keywords accepted on top of the driver's own.
    #[serde(default)]
    pub extra_parameters: Vec<String>,
}

impl BackendProfile {
    pub fn new(name: &str, version: BackendVersionTag, capabilities: CapabilitySet) -> Self {
        Self {
            name: name.to_string(),
            version,
            capabilities,
            statement_rules: Vec::new(),
            extra_parameters: Vec::new(),
        }
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = StatementRule>) -> Self {
        self.statement_rules.extend(rules);
        self
    }

    /// Stock PostgreSQL: everything supported, no interception.
    pub fn postgresql() -> Self {
        Self::new("postgresql", BackendVersionTag::new(90500), CapabilitySet::all())
    }

    /// The columnar warehouse fork of PostgreSQL 8.0.
    ///
    /// It rejects per-session time zones and the `client_min_messages` and
    /// `standard_conforming_strings` settings, has no collation, range or
    /// constraint-enforcement machinery, and reports 8.2 so that the core
    /// accepts it without enabling newer syntax.
    pub fn redshift() -> Self {
        let capabilities = CapabilitySet::from_iter([
            (FeatureFlag::ForeignKeys, false),
            (FeatureFlag::Views, true),
            (FeatureFlag::MaterializedViews, false),
            (FeatureFlag::Ranges, false),
            (FeatureFlag::PartialIndex, false),
            (FeatureFlag::IndexSortOrder, false),
            (FeatureFlag::TransactionIsolation, false),
            (FeatureFlag::Extensions, false),
            (FeatureFlag::AdvisoryLocks, false),
            (FeatureFlag::StatementCache, false),
            (FeatureFlag::InsertReturning, false),
            (FeatureFlag::Collations, false),
            (FeatureFlag::ArraySubscripts, false),
            (FeatureFlag::StandardConformingStrings, false),
        ]);
        Self::new("redshift", BackendVersionTag::new(80200), capabilities).with_rules([
            StatementRule::suppress(Some(SCHEMA_PURPOSE), "SET time zone"),
            StatementRule::suppress(None, "SET client_min_messages"),
            StatementRule::suppress(None, "SET standard_conforming_strings"),
        ])
    }

    pub fn capability(&self, flag: FeatureFlag) -> bool {
        self.capabilities.capability(flag)
    }

    pub fn statement_filter(&self) -> StatementFilter {
        StatementFilter::new(self.statement_rules.iter().cloned())
    }

    pub fn parameter_mapper(&self) -> ParameterMapper {
        ParameterMapper::new(
            ParameterAllowList::from_driver().with_extra(self.extra_parameters.iter().cloned()),
        )
    }

    pub fn catalog(&self) -> CatalogQueryTranslator {
        CatalogQueryTranslator::new(&self.capabilities)
    }
}

#[derive(Debug, Deserialize)]
struct ProfileFile {
    #[serde(default, rename = "profile")]
    profiles: Vec<BackendProfile>,
}

/// Profiles keyed by case-insensitive variant name.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    profiles: BTreeMap<String, Arc<BackendProfile>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(BackendProfile::postgresql());
        registry.register(BackendProfile::redshift());
        registry
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty() -> Self {
        Self {
            profiles: BTreeMap::new(),
        }
    }

    /// Add a profile, replacing any profile with the same name.
    pub fn register(&mut self, profile: BackendProfile) {
        self.profiles
            .insert(profile.name.to_ascii_lowercase(), Arc::new(profile));
    }

    pub fn get(&self, name: &str) -> Result<Arc<BackendProfile>> {
        self.profiles
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| AdapterError::UnknownBackend(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.values().map(|p| p.name.as_str()).collect()
    }

    /// Merge `[[profile]]` tables from TOML text. Returns how many were loaded.
    pub fn load_toml(&mut self, content: &str) -> Result<usize> {
        let file: ProfileFile = toml::from_str(content)?;
        let count = file.profiles.len();
        for profile in file.profiles {
            self.register(profile);
        }
        Ok(count)
    }

    /// Merge profiles from `path`. A missing file contributes nothing.
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let content = std::fs::read_to_string(path)?;
        let count = self.load_toml(&content)?;
        info!(path = %path.display(), count, "loaded backend profiles");
        Ok(count)
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pgshim")
            .join("profiles.toml")
    }
}

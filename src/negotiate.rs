//! Version reporting and type-decoder negotiation.
//!
//! The generic client core picks syntax branches from the server version. A
//! backend variant reports a fixed, deliberately low version instead of its
//! real one: the lowest version whose version-gated code paths stay inside
//! what the backend can actually run.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capability::FeatureFlag;
use crate::db::RowSet;
use crate::error::{AdapterError, Result};
use crate::profile::BackendProfile;
use crate::types::{TypeDecodeMap, TypeMapInitializer, TypeRow};

/// Oldest version the core still has code paths for (`INSERT ... RETURNING`,
/// `pg_get_expr` defaults and the `information_schema` views all exist here).
pub const MINIMUM_SUPPORTED_VERSION: BackendVersionTag = BackendVersionTag(80200);

/// Version in `server_version_num` form: 80200 is 8.2, 90500 is 9.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendVersionTag(u32);

impl BackendVersionTag {
    pub const fn new(num: u32) -> Self {
        Self(num)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn major(&self) -> u32 {
        self.0 / 10000
    }

    pub fn minor(&self) -> u32 {
        (self.0 / 100) % 100
    }

    pub fn at_least(&self, num: u32) -> bool {
        self.0 >= num
    }

    /// Parse a dotted server version such as `8.0.2` or `9.5`.
    pub fn parse(version: &str) -> Option<Self> {
        let mut parts = version.trim().split('.');
        let major: u32 = parts.next()?.parse().ok()?;
        let minor: u32 = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        let patch: u32 = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() || minor > 99 || patch > 99 {
            return None;
        }
        let num = major.checked_mul(10000)?.checked_add(minor * 100 + patch)?;
        Some(Self(num))
    }
}

impl fmt::Display for BackendVersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

/// Reports the synthetic version and seeds type decoding for one backend.
#[derive(Debug, Clone)]
pub struct Negotiator {
    version: BackendVersionTag,
    ranges: bool,
}

impl Negotiator {
    pub fn new(profile: &BackendProfile) -> Self {
        Self {
            version: profile.version,
            ranges: profile.capabilities.capability(FeatureFlag::Ranges),
        }
    }

    /// The constant version handed to the core. The server is never asked.
    pub fn reported_version(&self) -> BackendVersionTag {
        self.version
    }

    pub fn ensure_supported(&self) -> Result<()> {
        if self.version < MINIMUM_SUPPORTED_VERSION {
            return Err(AdapterError::UnsupportedVersion {
                reported: self.version,
                minimum: MINIMUM_SUPPORTED_VERSION,
            });
        }
        Ok(())
    }

    /// Feed type-discovery rows into `map`, returning how many OIDs were added.
    ///
    /// A result set without an `rngsubtype` column is treated the same as a
    /// backend without range support.
    pub fn register_types(&self, rows: &RowSet, map: &mut TypeDecodeMap) -> usize {
        let has_range_column = rows.has_column("rngsubtype");
        let ranges = self.ranges && has_range_column;
        let type_rows: Vec<TypeRow> = (0..rows.len())
            .filter_map(|i| TypeRow::from_row_set(rows, i))
            .collect();
        let before = map.len();
        TypeMapInitializer::new(ranges).register(map, &type_rows);
        let added = map.len() - before;
        debug!(
            rows = type_rows.len(),
            added,
            ranges,
            "registered type decoders"
        );
        added
    }
}

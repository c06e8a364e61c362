use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use postgres_native_tls::MakeTlsConnector;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use super::query::{RowSet, Transport};
use crate::capability::FeatureFlag;
use crate::catalog::CatalogQueryTranslator;
use crate::error::{AdapterError, Result};
use crate::filter::{FilterAction, StatementFilter, SCHEMA_PURPOSE};
use crate::negotiate::{BackendVersionTag, Negotiator};
use crate::params::{ConnectionParameters, DriverSettings, SslMode};
use crate::profile::BackendProfile;
use crate::session::SessionSettings;
use crate::types::{TypeDecodeMap, TypedValue};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// A named entry in `connections.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedConnection {
    pub name: String,
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Free-form settings; normalized against the backend at connect time.
    #[serde(default)]
    pub params: Map<String, Value>,
}

fn default_backend() -> String {
    "postgresql".to_string()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedConnections {
    #[serde(default)]
    connections: Vec<SavedConnection>,
}

pub struct ConnectionStore;

impl ConnectionStore {
    pub fn get_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pgshim")
            .join("connections.toml")
    }

    pub fn load(path: &Path) -> Result<Vec<SavedConnection>> {
        if !path.exists() {
            return Ok(vec![]);
        }
        let content = std::fs::read_to_string(path)?;
        let saved: SavedConnections = toml::from_str(&content)?;
        Ok(saved.connections)
    }

    pub fn find(path: &Path, name: &str) -> Result<Option<SavedConnection>> {
        Ok(Self::load(path)?
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(name)))
    }

    /// Write connections back out. Passwords are never persisted.
    pub fn save(path: &Path, connections: &[SavedConnection]) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let saved = SavedConnections {
            connections: connections
                .iter()
                .cloned()
                .map(|mut c| {
                    c.params.remove("password");
                    c.params.retain(|_, v| !v.is_null());
                    c
                })
                .collect(),
        };
        std::fs::write(path, toml::to_string_pretty(&saved)?)?;
        Ok(())
    }
}

/// A client connection wrapped with one backend profile.
///
/// Owns the type-decode map for its lifetime; the map is built on first
/// column introspection or value decode.
pub struct AdaptedConnection<T = Client> {
    pub(super) transport: T,
    pub(super) profile: Arc<BackendProfile>,
    pub(super) filter: StatementFilter,
    pub(super) catalog: CatalogQueryTranslator,
    negotiator: Negotiator,
    type_map: Option<TypeDecodeMap>,
    /// OIDs a targeted discovery already failed to resolve.
    missing_oids: BTreeSet<u32>,
}

impl<T: Transport> AdaptedConnection<T> {
    pub fn new(transport: T, profile: Arc<BackendProfile>) -> Self {
        Self {
            filter: profile.statement_filter(),
            catalog: profile.catalog(),
            negotiator: Negotiator::new(&profile),
            transport,
            profile,
            type_map: None,
            missing_oids: BTreeSet::new(),
        }
    }

    pub fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    pub fn capability(&self, flag: FeatureFlag) -> bool {
        self.profile.capability(flag)
    }

    pub fn reported_version(&self) -> BackendVersionTag {
        self.negotiator.reported_version()
    }

    pub fn type_map(&self) -> Option<&TypeDecodeMap> {
        self.type_map.as_ref()
    }

    /// Run one statement on behalf of the core. Suppressed statements return
    /// an empty result without touching the transport.
    pub async fn execute_administrative(&self, sql: &str, purpose: Option<&str>) -> Result<RowSet> {
        match self.filter.filter(sql, purpose) {
            FilterAction::Execute => self.transport.simple_query(sql).await,
            FilterAction::Rewrite(replacement) => self.transport.simple_query(&replacement).await,
            FilterAction::Suppress => Ok(RowSet::empty()),
        }
    }

    pub async fn configure_session(&self, settings: &SessionSettings) -> Result<()> {
        let standard_strings = self.capability(FeatureFlag::StandardConformingStrings);
        for sql in settings.statements(standard_strings) {
            self.execute_administrative(&sql, Some(SCHEMA_PURPOSE)).await?;
        }
        Ok(())
    }

    /// Run type discovery and merge the result into this connection's map.
    /// Returns the number of decoders added.
    pub async fn initialize_type_decoding(&mut self, oids: Option<&BTreeSet<u32>>) -> Result<usize> {
        let sql = self.catalog.build_type_discovery_query(oids);
        let rows = self.execute_administrative(&sql, Some(SCHEMA_PURPOSE)).await?;
        let map = self.type_map.get_or_insert_with(TypeDecodeMap::new);
        Ok(self.negotiator.register_types(&rows, map))
    }

    pub(super) async fn ensure_type_map(&mut self) -> Result<&TypeDecodeMap> {
        if self.type_map.is_none() {
            self.initialize_type_decoding(None).await?;
        }
        Ok(self.type_map.get_or_insert_with(TypeDecodeMap::new))
    }

    /// Decode a text-format value. An OID missing from the map triggers one
    /// targeted discovery; if that finds nothing the value stays undecoded.
    pub async fn decode_value(&mut self, oid: u32, raw: Option<&[u8]>) -> Result<TypedValue> {
        let known = self.ensure_type_map().await?.contains(oid);
        if !known && !self.missing_oids.contains(&oid) {
            debug!(oid, "looking up unregistered type");
            let added = self
                .initialize_type_decoding(Some(&BTreeSet::from([oid])))
                .await?;
            if added == 0 {
                self.missing_oids.insert(oid);
            }
        }
        self.ensure_type_map().await?.decode(oid, raw)
    }
}

/// Open a connection for `profile` from a generic configuration map.
pub async fn establish_connection(
    profile: Arc<BackendProfile>,
    config: &Map<String, Value>,
) -> Result<AdaptedConnection<Client>> {
    Negotiator::new(&profile).ensure_supported()?;
    let params = profile.parameter_mapper().normalize(config)?;
    let session = SessionSettings::from_config(config)?;

    let client = create_client(&params).await?;
    let connection = AdaptedConnection::new(client, profile);
    info!(
        backend = %connection.profile().name,
        target = %params.display_string(),
        version = %connection.reported_version(),
        "connected"
    );

    connection.configure_session(&session).await?;
    Ok(connection)
}

/// Connect with the driver, picking a TLS connector from `sslmode`.
pub async fn create_client(params: &ConnectionParameters) -> Result<Client> {
    let settings = params.to_driver_settings()?;

    let client = if settings.ssl_mode == SslMode::Disable {
        let (client, connection) = tokio::time::timeout(CONNECT_TIMEOUT, settings.config.connect(NoTls))
            .await
            .map_err(|_| AdapterError::Timeout(CONNECT_TIMEOUT))?
            .map_err(|e| AdapterError::database(&e, ""))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("connection error: {}", e);
            }
        });
        client
    } else {
        let tls = build_tls_connector(&settings)?;
        let (client, connection) = tokio::time::timeout(CONNECT_TIMEOUT, settings.config.connect(tls))
            .await
            .map_err(|_| AdapterError::Timeout(CONNECT_TIMEOUT))?
            .map_err(|e| AdapterError::database(&e, ""))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("connection error: {}", e);
            }
        });
        client
    };

    Ok(client)
}

/// `prefer`/`require` encrypt without verifying unless a root certificate is
/// configured; `verify-ca` checks the chain only; `verify-full` also checks
/// the host name.
fn build_tls_connector(settings: &DriverSettings) -> Result<MakeTlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();

    if let Some(path) = &settings.root_cert {
        let pem = std::fs::read(path)?;
        for cert in split_pem_certificates(&pem) {
            builder.add_root_certificate(native_tls::Certificate::from_pem(&cert)?);
        }
    } else if !settings.ssl_mode.verifies_certificate() {
        builder.danger_accept_invalid_certs(true);
    }

    if settings.ssl_mode != SslMode::VerifyFull {
        builder.danger_accept_invalid_hostnames(true);
    }

    Ok(MakeTlsConnector::new(builder.build()?))
}

/// Split a PEM bundle into one PEM block per certificate.
fn split_pem_certificates(pem: &[u8]) -> Vec<Vec<u8>> {
    let text = String::from_utf8_lossy(pem);
    let mut certs = Vec::new();
    let mut current = String::new();
    let mut in_cert = false;

    for line in text.lines() {
        if line.contains("-----BEGIN CERTIFICATE-----") {
            in_cert = true;
            current.clear();
        }
        if in_cert {
            current.push_str(line.trim());
            current.push('\n');
        }
        if line.contains("-----END CERTIFICATE-----") && in_cert {
            in_cert = false;
            certs.push(current.clone().into_bytes());
        }
    }
    certs
}

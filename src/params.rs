//! Connection parameter normalization.
//!
//! Callers hand over a loose configuration map (as found in a TOML or JSON
//! config file). Before anything reaches the driver it is reduced to the
//! exact keyword set the driver accepts: nulls dropped, aliases renamed to
//! their canonical names, and everything outside the allow-list removed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AdapterError, Result};

/// Keywords accepted by the `tokio-postgres` connection-string parser.
pub const DRIVER_PARAMETERS: &[&str] = &[
    "host",
    "hostaddr",
    "port",
    "user",
    "password",
    "dbname",
    "options",
    "application_name",
    "sslmode",
    "connect_timeout",
    "tcp_user_timeout",
    "keepalives",
    "keepalives_idle",
    "keepalives_interval",
    "keepalives_retries",
    "target_session_attrs",
    "channel_binding",
    "load_balance_hosts",
];

/// Keys the adapter consumes itself instead of forwarding to the driver.
pub const EXTENSION_PARAMETERS: &[&str] = &["requiressl", "sslrootcert"];

/// Generic configuration names and the canonical keyword they map to.
const ALIASES: &[(&str, &str)] = &[("username", "user"), ("database", "dbname")];

/// SSL/TLS connection modes, matching libpq's `sslmode`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "disable" => Some(SslMode::Disable),
            // The driver has no "try plaintext first" mode; TLS-if-offered is closest.
            "allow" | "prefer" => Some(SslMode::Prefer),
            "require" => Some(SslMode::Require),
            "verify-ca" => Some(SslMode::VerifyCa),
            "verify-full" => Some(SslMode::VerifyFull),
            _ => None,
        }
    }

    /// Whether the server certificate must chain to a trusted root.
    pub fn verifies_certificate(&self) -> bool {
        matches!(self, SslMode::VerifyCa | SslMode::VerifyFull)
    }
}

/// The keyword set a backend driver accepts. Built once, then shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterAllowList {
    keys: BTreeSet<String>,
}

impl Default for ParameterAllowList {
    fn default() -> Self {
        Self::from_driver()
    }
}

impl ParameterAllowList {
    /// The driver's declared keywords plus the adapter's extension keys.
    pub fn from_driver() -> Self {
        Self {
            keys: DRIVER_PARAMETERS
                .iter()
                .chain(EXTENSION_PARAMETERS)
                .map(|k| k.to_string())
                .collect(),
        }
    }

    pub fn with_extra<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys.extend(extra.into_iter().map(Into::into));
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

/// Normalizes generic configuration maps against an allow-list.
#[derive(Debug, Clone, Default)]
pub struct ParameterMapper {
    allow_list: ParameterAllowList,
}

impl ParameterMapper {
    pub fn new(allow_list: ParameterAllowList) -> Self {
        Self { allow_list }
    }

    pub fn normalize(&self, input: &Map<String, Value>) -> Result<ConnectionParameters> {
        let mut entries: BTreeMap<String, &Value> = input
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.clone(), value))
            .collect();

        // Rename before filtering: the allow-list only knows canonical names.
        for (alias, canonical) in ALIASES {
            if let Some(value) = entries.remove(*alias) {
                entries.insert(canonical.to_string(), value);
            }
        }

        entries.retain(|key, _| self.allow_list.contains(key));

        let mut params = BTreeMap::new();
        for (key, value) in entries {
            let text = validate(&key, scalar_to_string(&key, value)?)?;
            params.insert(key, text);
        }
        Ok(ConnectionParameters(params))
    }
}

fn scalar_to_string(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        Value::Array(_) | Value::Object(_) => Err(AdapterError::configuration(
            key,
            "expected a string, number or boolean",
        )),
        Value::Null => Err(AdapterError::configuration(key, "unexpected null")),
    }
}

/// Check the keywords the driver would reject, returning the value to store.
fn validate(key: &str, value: String) -> Result<String> {
    match key {
        "port" => {
            // Multi-host configurations list one port per host. The driver
            // does not trim, so the stored list is written without spaces.
            let mut ports = Vec::new();
            for port in value.split(',') {
                match port.trim().parse::<u16>() {
                    Ok(p) if p > 0 => ports.push(p.to_string()),
                    _ => {
                        return Err(AdapterError::configuration(
                            key,
                            format!("{value:?} is not a port between 1 and 65535"),
                        ))
                    }
                }
            }
            Ok(ports.join(","))
        }
        "connect_timeout" => match value.trim().parse::<u64>() {
            Ok(seconds) => Ok(seconds.to_string()),
            Err(_) => Err(AdapterError::configuration(
                key,
                format!("{value:?} is not a non-negative number of seconds"),
            )),
        },
        "sslmode" if SslMode::parse(&value).is_none() => Err(AdapterError::configuration(
            key,
            format!("unknown sslmode {value:?}"),
        )),
        _ => Ok(value),
    }
}

/// Canonical, allow-listed connection parameters for one connection attempt.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionParameters(BTreeMap<String, String>);

/// What the driver needs to open a connection, split out of
/// [`ConnectionParameters`].
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub config: tokio_postgres::Config,
    pub ssl_mode: SslMode,
    pub root_cert: Option<PathBuf>,
}

impl ConnectionParameters {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.get("user").unwrap_or(""),
            self.get("host").unwrap_or("localhost"),
            self.get("port").unwrap_or("5432"),
            self.get("dbname").unwrap_or("")
        )
    }

    pub fn ssl_mode(&self) -> SslMode {
        match self.get("sslmode").and_then(SslMode::parse) {
            Some(mode) => mode,
            None if self.get("requiressl").is_some_and(is_truthy) => SslMode::Require,
            None => SslMode::default(),
        }
    }

    /// libpq `key='value'` string for the driver keywords. `sslmode` is left
    /// out because the driver only knows a subset of its values.
    pub fn connection_string(&self) -> String {
        self.iter()
            .filter(|(key, _)| DRIVER_PARAMETERS.contains(key) && *key != "sslmode")
            .map(|(key, value)| format!("{}={}", key, quote_conn_value(value)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn to_driver_settings(&self) -> Result<DriverSettings> {
        let mut config: tokio_postgres::Config = self
            .connection_string()
            .parse()
            .map_err(|e: tokio_postgres::Error| AdapterError::configuration("connection", e.to_string()))?;

        let ssl_mode = self.ssl_mode();
        config.ssl_mode(match ssl_mode {
            SslMode::Disable => tokio_postgres::config::SslMode::Disable,
            SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
            SslMode::Require | SslMode::VerifyCa | SslMode::VerifyFull => {
                tokio_postgres::config::SslMode::Require
            }
        });

        Ok(DriverSettings {
            config,
            ssl_mode,
            root_cert: self.get("sslrootcert").map(PathBuf::from),
        })
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in self.iter() {
            if key == "password" {
                map.entry(&key, &"********");
            } else {
                map.entry(&key, &value);
            }
        }
        map.finish()
    }
}

impl FromIterator<(String, String)> for ConnectionParameters {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Quote a value for use in a libpq key=value connection string.
/// Wraps in single quotes and escapes backslashes and single quotes.
fn quote_conn_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

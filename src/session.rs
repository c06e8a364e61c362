//! Session-setup statements issued right after connecting.
//!
//! These are the statements a stock PostgreSQL client runs on every new
//! connection. They are all tagged [`crate::filter::SCHEMA_PURPOSE`] and go through the
//! statement filter like any other statement, which is where backends that
//! reject them get their say.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::catalog::quote_literal;
use crate::error::{AdapterError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub encoding: Option<String>,
    pub min_messages: String,
    pub time_zone: String,
    pub variables: BTreeMap<String, String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            encoding: None,
            min_messages: "warning".to_string(),
            time_zone: "UTC".to_string(),
            variables: BTreeMap::new(),
        }
    }
}

impl SessionSettings {
    /// Read `encoding`, `min_messages`, `timezone` and `variables` from a
    /// connection config map. Other keys are ignored.
    pub fn from_config(input: &Map<String, Value>) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(encoding) = string_setting(input, "encoding")? {
            settings.encoding = Some(encoding);
        }
        if let Some(level) = string_setting(input, "min_messages")? {
            settings.min_messages = level;
        }
        if let Some(zone) = string_setting(input, "timezone")? {
            settings.time_zone = zone;
        }

        match input.get("variables") {
            None | Some(Value::Null) => {}
            Some(Value::Object(vars)) => {
                for (name, value) in vars {
                    if !is_setting_name(name) {
                        return Err(AdapterError::configuration(
                            "variables",
                            format!("{name:?} is not a valid setting name"),
                        ));
                    }
                    let value = match value {
                        Value::Null => continue,
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        _ => {
                            return Err(AdapterError::configuration(
                                "variables",
                                format!("value of {name:?} must be a scalar"),
                            ))
                        }
                    };
                    settings.variables.insert(name.clone(), value);
                }
            }
            Some(_) => {
                return Err(AdapterError::configuration(
                    "variables",
                    "expected a table of setting names to values",
                ))
            }
        }

        Ok(settings)
    }

    /// The setup statements in execution order.
    pub fn statements(&self, standard_strings: bool) -> Vec<String> {
        let quote = |v: &str| quote_literal(v, standard_strings);
        let mut statements = Vec::new();

        if let Some(encoding) = &self.encoding {
            statements.push(format!("SET client_encoding TO {}", quote(encoding)));
        }
        statements.push("SET standard_conforming_strings = on".to_string());
        statements.push(format!("SET client_min_messages TO {}", quote(&self.min_messages)));
        statements.push(format!("SET time zone {}", quote(&self.time_zone)));

        for (name, value) in &self.variables {
            let rendered = if value.eq_ignore_ascii_case("default") {
                "DEFAULT".to_string()
            } else {
                quote(value)
            };
            statements.push(format!("SET SESSION {} TO {}", name, rendered));
        }

        statements
    }
}

fn string_setting(input: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(AdapterError::configuration(key, "expected a string")),
    }
}

fn is_setting_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

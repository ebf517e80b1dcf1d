//! `secrets.yaml` lookup for the `!secret` tag

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde_yaml::Value;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Flat key to string map read from `secrets.yaml`
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: HashMap<String, String>,
}

impl Secrets {
    /// Read `secrets.yaml` from `config_dir`; a missing file yields no secrets
    pub fn load(config_dir: &Path) -> ConfigResult<Self> {
        let path = config_dir.join("secrets.yaml");
        if !path.is_file() {
            debug!(path = %path.display(), "No secrets file");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let raw: HashMap<String, Value> =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                path: path.clone(),
                source,
            })?;

        let values: HashMap<String, String> = raw
            .into_iter()
            .filter_map(|(key, value)| scalar_to_string(value).map(|v| (key, v)))
            .collect();
        debug!(path = %path.display(), count = values.len(), "Loaded secrets");
        Ok(Self { values })
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> ConfigResult<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::MissingSecret {
                key: key.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Secrets are substituted as strings; nested structures are not secrets
fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

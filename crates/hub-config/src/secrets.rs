//! `secrets.yaml`: credentials kept out of the main configuration

use indexmap::IndexMap;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};

pub const SECRETS_FILE: &str = "secrets.yaml";

/// Values that `!secret` tags resolve against. Every value is kept as a
/// string, so `pin: 4711` reads back as `"4711"`.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    file: PathBuf,
    values: IndexMap<String, String>,
}

impl Secrets {
    /// Read `secrets.yaml` from `config_dir`. A missing file gives an empty set.
    pub fn load(config_dir: &Path) -> ConfigResult<Self> {
        let file = config_dir.join(SECRETS_FILE);
        match std::fs::read_to_string(&file) {
            Ok(content) => Self::parse(&content, file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = %file.display(), "No secrets file");
                Ok(Self {
                    file,
                    values: IndexMap::new(),
                })
            }
            Err(e) => Err(ConfigError::io(&file, e)),
        }
    }

    /// Parse secrets from YAML text; `file` is only used in messages
    pub fn parse(content: &str, file: impl Into<PathBuf>) -> ConfigResult<Self> {
        let file = file.into();
        let raw: Option<IndexMap<String, Value>> =
            serde_yaml::from_str(content).map_err(|e| ConfigError::yaml(&file, e))?;

        let mut values = IndexMap::new();
        for (key, value) in raw.unwrap_or_default() {
            match scalar_string(value) {
                Some(s) => {
                    values.insert(key, s);
                }
                None => warn!(key = %key, "Skipping secret that is not a scalar"),
            }
        }
        debug!(file = %file.display(), count = values.len(), "Secrets loaded");
        Ok(Self { file, values })
    }

    pub fn get(&self, key: &str) -> ConfigResult<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::UnknownSecret {
                key: key.to_string(),
                file: self.file.clone(),
            })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn scalar_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Sequence(_) | Value::Mapping(_) | Value::Tagged(_) => None,
    }
}

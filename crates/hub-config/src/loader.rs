//! YAML loading with the hub's custom tags resolved
//!
//! `!include` paths are relative to the file containing the tag.
//! `!env_var NAME fallback` parses the fallback as YAML, so
//! `!env_var POLL_MS 250` yields a number.

use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;

enum Tag {
    Include,
    Secret,
    EnvVar,
}

impl Tag {
    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "!include" => Some(Self::Include),
            "!secret" => Some(Self::Secret),
            "!env_var" => Some(Self::EnvVar),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Include => "!include",
            Self::Secret => "!secret",
            Self::EnvVar => "!env_var",
        }
    }
}

pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files being loaded, outermost first
    open_files: Vec<PathBuf>,
}

impl YamlLoader {
    /// Loader for `config_dir`, with secrets read from its `secrets.yaml`
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self::with_secrets(config_dir, secrets))
    }

    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            open_files: Vec::new(),
        }
    }

    pub fn load_file(&mut self, file: impl AsRef<Path>) -> ConfigResult<Value> {
        let file = self.config_dir.join(file.as_ref());
        if self.open_files.contains(&file) {
            let mut chain = self.open_files.clone();
            chain.push(file);
            return Err(ConfigError::IncludeCycle { chain });
        }

        debug!(file = %file.display(), "Loading YAML");
        let content = std::fs::read_to_string(&file).map_err(|e| ConfigError::io(&file, e))?;

        self.open_files.push(file.clone());
        let result = self.load_string(&content, &file);
        self.open_files.pop();
        result
    }

    /// Parse `content` as if it were read from `file`
    pub fn load_string(&mut self, content: &str, file: &Path) -> ConfigResult<Value> {
        let value = serde_yaml::from_str(content).map_err(|e| ConfigError::yaml(file, e))?;
        self.resolve(value, file)
    }

    fn resolve(&mut self, value: Value, file: &Path) -> ConfigResult<Value> {
        Ok(match value {
            Value::Tagged(tagged) => self.resolve_tag(*tagged, file)?,
            Value::Mapping(mapping) => {
                let mut resolved = Mapping::with_capacity(mapping.len());
                for (key, value) in mapping {
                    resolved.insert(self.resolve(key, file)?, self.resolve(value, file)?);
                }
                Value::Mapping(resolved)
            }
            Value::Sequence(items) => Value::Sequence(
                items
                    .into_iter()
                    .map(|item| self.resolve(item, file))
                    .collect::<ConfigResult<_>>()?,
            ),
            other => other,
        })
    }

    fn resolve_tag(&mut self, tagged: TaggedValue, file: &Path) -> ConfigResult<Value> {
        let tag_text = tagged.tag.to_string();
        let Some(tag) = Tag::parse(&tag_text) else {
            warn!(tag = %tag_text, file = %file.display(), "Unknown tag left in place");
            let value = self.resolve(tagged.value, file)?;
            return Ok(Value::Tagged(Box::new(TaggedValue {
                tag: tagged.tag,
                value,
            })));
        };

        let Value::String(argument) = tagged.value else {
            return Err(ConfigError::TagArgument {
                tag: tag.name(),
                expected: "a string argument",
            });
        };

        match tag {
            Tag::Include => {
                let base = file.parent().unwrap_or(&self.config_dir);
                let included = base.join(argument.trim());
                self.load_file(included)
            }
            Tag::Secret => Ok(Value::String(self.secrets.get(argument.trim())?.to_string())),
            Tag::EnvVar => env_var(&argument),
        }
    }

    pub fn secrets(&self) -> &Secrets {
        &self.secrets
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

fn env_var(argument: &str) -> ConfigResult<Value> {
    let argument = argument.trim();
    let (name, fallback) = match argument.split_once(char::is_whitespace) {
        Some((name, fallback)) => (name, Some(fallback.trim())),
        None => (argument, None),
    };

    if let Ok(value) = std::env::var(name) {
        return Ok(Value::String(value));
    }
    let Some(fallback) = fallback else {
        return Err(ConfigError::UnsetEnvVar {
            name: name.to_string(),
        });
    };
    debug!(var = %name, "Environment variable unset, using fallback");
    Ok(serde_yaml::from_str(fallback).unwrap_or_else(|_| Value::String(fallback.to_string())))
}

/// Load `file` (relative to `config_dir`) with tags resolved
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir)?.load_file(file)
}

/// Load YAML text with tags resolved; `source_name` stands in for its file
/// name inside `config_dir`
pub fn load_yaml_string(
    config_dir: impl Into<PathBuf>,
    content: &str,
    source_name: &str,
) -> ConfigResult<Value> {
    let mut loader = YamlLoader::new(config_dir)?;
    let file = loader.config_dir.join(source_name);
    loader.load_string(content, &file)
}

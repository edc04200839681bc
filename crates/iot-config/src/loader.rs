//! YAML loader with custom tag support
//!
//! Tags understood by the loader:
//! - `!include path` - Replace the node with the contents of another file
//! - `!include_dir_merge_list dir` - Concatenate the lists found in every
//!   YAML file of a directory (handy for one flow per file)
//! - `!env_var VAR` or `!env_var [VAR, default]` - Environment variable
//!
//! Relative paths resolve against the directory of the file that contains
//! the tag.

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// YAML loader resolving includes and environment variables
pub struct YamlLoader {
    config_dir: PathBuf,
    /// Files currently being loaded, outermost first
    stack: Vec<PathBuf>,
}

impl YamlLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            stack: Vec::new(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load and process a YAML file, relative paths resolving against the
    /// config directory
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.config_dir.join(path.as_ref());
        self.load_path(path)
    }

    fn load_path(&mut self, path: PathBuf) -> ConfigResult<Value> {
        debug!("Loading YAML file: {:?}", path);

        if self.stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;

        self.stack.push(path.clone());
        let result = self.load_str(&content, &path);
        self.stack.pop();
        result
    }

    /// Process YAML text as if it had been read from `source_path`
    pub fn load_str(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value =
            serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
                path: source_path.to_path_buf(),
                source,
            })?;
        self.resolve(value, source_path)
    }

    fn resolve(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.resolve_tag(*tagged, source_path),
            Value::Mapping(map) => {
                let mut out = Mapping::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key, self.resolve(value, source_path)?);
                }
                Ok(Value::Mapping(out))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.resolve(v, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn resolve_tag(&mut self, tagged: TaggedValue, source_path: &Path) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!("Resolving tag {}", tag);

        match tag.as_str() {
            "!include" => {
                let path = self.tag_path(&tagged.value, source_path)?;
                self.load_path(path)
            }
            "!include_dir_merge_list" => {
                let dir = self.tag_path(&tagged.value, source_path)?;
                self.merge_dir_lists(&dir)
            }
            "!env_var" => env_var(&tagged.value),
            _ => {
                // Unknown tags pass through with their content resolved
                let value = self.resolve(tagged.value, source_path)?;
                Ok(Value::Tagged(Box::new(TaggedValue {
                    tag: tagged.tag,
                    value,
                })))
            }
        }
    }

    fn merge_dir_lists(&mut self, dir: &Path) -> ConfigResult<Value> {
        if !dir.is_dir() {
            return Err(ConfigError::DirectoryNotFound {
                path: dir.to_path_buf(),
            });
        }

        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|source| ConfigError::ReadFile {
                path: dir.to_path_buf(),
                source,
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("yaml" | "yml")
                )
            })
            .collect();
        files.sort();

        let mut merged = Vec::new();
        for file in files {
            match self.load_path(file)? {
                Value::Sequence(items) => merged.extend(items),
                Value::Null => {}
                single => merged.push(single),
            }
        }
        debug!(directory = ?dir, items = merged.len(), "Merged directory lists");
        Ok(Value::Sequence(merged))
    }

    fn tag_path(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let Value::String(raw) = value else {
            return Err(ConfigError::InvalidIncludePath {
                path: format!("{:?}", value),
                reason: "path must be a string".to_string(),
            });
        };

        let base = source_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(&self.config_dir);
        Ok(base.join(raw))
    }
}

fn env_var(value: &Value) -> ConfigResult<Value> {
    let (name, default) = match value {
        Value::String(name) => (name.as_str(), None),
        Value::Sequence(items) => match items.as_slice() {
            [Value::String(name), default] => (name.as_str(), Some(default)),
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "!env_var".to_string(),
                    reason: "expected [NAME, default]".to_string(),
                })
            }
        },
        _ => {
            return Err(ConfigError::InvalidValue {
                key: "!env_var".to_string(),
                reason: "environment variable name must be a string".to_string(),
            })
        }
    };

    match std::env::var(name) {
        // Parse so numbers and booleans keep their type
        Ok(raw) => Ok(serde_yaml::from_str(&raw).unwrap_or(Value::String(raw))),
        Err(_) => default.cloned().ok_or_else(|| ConfigError::EnvVarNotFound {
            var: name.to_string(),
        }),
    }
}

/// Load a YAML file relative to `config_dir`
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir).load_file(file)
}

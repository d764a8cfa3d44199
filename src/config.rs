use crate::ci_gate::RefPattern;
use crate::error::{Error, Result};
use crate::scm::FileLocation;
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "gitops-replacer.json";
pub const CONFIG_SECTION: &str = "gitops-replacer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    /// `.json` files are JSON, everything else is read as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// One configured unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub repository: String,
    pub branch: String,
    pub file: String,
    pub dep_name: String,
    pub when: Option<RefPattern>,
    pub except: Option<RefPattern>,
}

impl TargetDescriptor {
    pub fn location(&self) -> FileLocation {
        FileLocation::new(&self.repository, &self.branch, &self.file)
    }
}

/// An entry as written in the file, before validation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    repository: Option<String>,
    branch: Option<String>,
    file: Option<String>,
    dep_name: Option<String>,
    when: Option<String>,
    except: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub targets: Vec<TargetDescriptor>,
}

impl Config {
    /// Loads `path`. `Ok(None)` means the file has no `gitops-replacer`
    /// section, which is not an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(Error::Config {
                message: format!("config file {} does not exist", path.display()),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read config file {}: {}", path.display(), e),
        })?;

        Self::parse(&content, ConfigFormat::from_path(path))
    }

    pub fn parse(content: &str, format: ConfigFormat) -> Result<Option<Self>> {
        if content.trim().is_empty() {
            return Ok(None);
        }

        let document: serde_json::Value = match format {
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| Error::Config {
                message: format!("failed to parse JSON config: {}", e),
            })?,
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| Error::Config {
                message: format!("failed to parse YAML config: {}", e),
            })?,
        };

        let section = match document {
            serde_json::Value::Null => return Ok(None),
            serde_json::Value::Object(mut map) => match map.remove(CONFIG_SECTION) {
                Some(section) => section,
                None => return Ok(None),
            },
            _ => {
                return Err(Error::Config {
                    message: "the top level of the config must be a mapping".to_string(),
                })
            }
        };

        let entries = match section {
            serde_json::Value::Null => Vec::new(),
            serde_json::Value::Array(entries) => entries,
            _ => {
                return Err(Error::Config {
                    message: format!("`{}` must be a list of targets", CONFIG_SECTION),
                })
            }
        };

        let targets = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| validate_entry(index, entry))
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Self { targets }))
    }
}

fn validate_entry(index: usize, entry: serde_json::Value) -> Result<TargetDescriptor> {
    let raw: RawDescriptor = serde_json::from_value(entry).map_err(|e| Error::InvalidConfig {
        index,
        message: e.to_string(),
    })?;

    let required = |value: Option<String>, field: &str| -> Result<String> {
        match value {
            Some(value) if !value.trim().is_empty() => Ok(value),
            Some(_) => Err(Error::InvalidConfig {
                index,
                message: format!("field `{}` must not be empty", field),
            }),
            None => Err(Error::InvalidConfig {
                index,
                message: format!("missing required field `{}`", field),
            }),
        }
    };

    let repository = required(raw.repository, "repository")?;
    let branch = required(raw.branch, "branch")?;
    let file = required(raw.file, "file")?;
    let dep_name = required(raw.dep_name, "depName")?;

    match repository.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {}
        _ => {
            return Err(Error::InvalidConfig {
                index,
                message: format!("repository '{}' must have the form ORG/REPO", repository),
            })
        }
    }

    let compile = |pattern: Option<String>, field: &'static str| -> Result<Option<RefPattern>> {
        pattern
            .map(|pattern| {
                RefPattern::new(&pattern).map_err(|source| Error::InvalidPattern {
                    index,
                    field,
                    pattern,
                    source,
                })
            })
            .transpose()
    };

    Ok(TargetDescriptor {
        repository,
        branch,
        file,
        dep_name,
        when: compile(raw.when, "when")?,
        except: compile(raw.except, "except")?,
    })
}

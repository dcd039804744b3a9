//! Filter registry: descriptor loading, step validation, and the process-wide
//! active registry.
//!
//! A filter descriptor is a small JSON document describing one reusable
//! external filter program. Descriptors live in a directory scanned at
//! startup; files that fail to parse are skipped with a warning so one broken
//! descriptor cannot take the whole registry down.

pub mod command;
pub mod params;

use ahash::AHashMap;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use params::ParameterSchema;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

static PARAM_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z_0-9]*$").unwrap());

/// Configuration-level failures: bad descriptors, bad pipeline documents,
/// bad CLI usage. The CLI maps these to exit code 2.
#[derive(Debug)]
pub enum ConfigError {
    UnknownFilter(String),
    InvalidParameterName { filter: String, parameter: String },
    InvalidParameterValue { filter: String, parameter: String, reason: String },
    LanguageNotAllowed { filter: String },
    LanguageMissing { filter: String },
    UnknownLanguage { language: String },
    UnsupportedVersion(u64),
    NoInputFiles,
    Usage(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnknownFilter(name) => write!(f, "unknown filter: `{name}`"),
            ConfigError::InvalidParameterName { filter, parameter } => write!(
                f,
                "filter `{filter}`: parameter name is not a valid shell variable: {parameter}"
            ),
            ConfigError::InvalidParameterValue {
                filter,
                parameter,
                reason,
            } => write!(f, "filter `{filter}`, parameter `{parameter}`: {reason}"),
            ConfigError::LanguageNotAllowed { filter } => {
                write!(f, "bilingual filter `{filter}` cannot take a `language`")
            }
            ConfigError::LanguageMissing { filter } => {
                write!(f, "monolingual filter `{filter}` requires a `language`")
            }
            ConfigError::UnknownLanguage { language } => {
                write!(f, "language `{language}` does not match any input column")
            }
            ConfigError::UnsupportedVersion(version) => {
                write!(f, "unsupported pipeline version: {version}")
            }
            ConfigError::NoInputFiles => write!(f, "pipeline lists no input files"),
            ConfigError::Usage(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// What a filter consumes: the whole row, or a single column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Bilingual,
    Monolingual,
}

/// One reusable filter program, as described by its descriptor file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDefinition {
    #[serde(rename = "type")]
    pub kind: FilterType,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub command: String,
    #[serde(default)]
    pub basedir: PathBuf,
    #[serde(default)]
    pub parameters: IndexMap<String, ParameterSchema>,
}

/// A reference to a filter plus its bound parameters, as stored in a
/// pipeline document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterStep {
    pub filter: String,
    #[serde(default)]
    pub parameters: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FilterRegistry {
    filters: AHashMap<String, Arc<FilterDefinition>>,
}

impl FilterRegistry {
    pub fn insert(&mut self, definition: FilterDefinition) {
        self.filters
            .insert(definition.name.clone(), Arc::new(definition));
    }

    pub fn get(&self, name: &str) -> Result<Arc<FilterDefinition>, ConfigError> {
        self.filters
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownFilter(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.filters.keys().map(String::as_str)
    }
}

/// Load filter definitions from one or more glob patterns.
///
/// Parse errors are non-fatal: the offending file is skipped and reported in
/// the returned warning list.
pub fn load_filters(patterns: &[String]) -> (FilterRegistry, Vec<String>) {
    let mut registry = FilterRegistry::default();
    let mut warnings = Vec::new();

    for pattern in patterns {
        let paths = match glob::glob(pattern) {
            Ok(paths) => paths,
            Err(e) => {
                warnings.push(format!("invalid filter glob {pattern}: {e}"));
                continue;
            }
        };
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warnings.push(format!("could not scan filter path: {e}"));
                    continue;
                }
            };
            match load_definition(&path) {
                Ok(definition) => registry.insert(definition),
                Err(e) => warnings.push(format!("could not parse {}: {e:#}", path.display())),
            }
        }
    }

    (registry, warnings)
}

/// Parse a single descriptor file, filling `name` from the file stem and
/// `basedir` from the file's directory when absent.
pub fn load_definition(path: &Path) -> anyhow::Result<FilterDefinition> {
    let text = std::fs::read_to_string(path)?;
    let mut definition: FilterDefinition = serde_json::from_str(&text)?;

    if definition.name.is_empty() {
        definition.name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    if definition.basedir.as_os_str().is_empty() {
        definition.basedir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    }

    for parameter in definition.parameters.keys() {
        if !PARAM_NAME.is_match(parameter) {
            return Err(ConfigError::InvalidParameterName {
                filter: definition.name.clone(),
                parameter: parameter.clone(),
            }
            .into());
        }
    }

    Ok(definition)
}

/// Validate a step against its definition, filling defaults for missing
/// parameters. Unknown parameters are kept (a descriptor may simply be older
/// than the document). Returns non-fatal warnings.
pub fn validate_step(
    definition: &FilterDefinition,
    step: &mut FilterStep,
) -> Result<Vec<String>, ConfigError> {
    match definition.kind {
        FilterType::Bilingual if step.language.is_some() => {
            return Err(ConfigError::LanguageNotAllowed {
                filter: definition.name.clone(),
            });
        }
        FilterType::Monolingual if step.language.as_deref().unwrap_or("").is_empty() => {
            return Err(ConfigError::LanguageMissing {
                filter: definition.name.clone(),
            });
        }
        _ => {}
    }

    let mut warnings = Vec::new();

    for (name, schema) in &definition.parameters {
        match step.parameters.get(name) {
            Some(value) => {
                let normalized =
                    schema
                        .check(value)
                        .map_err(|reason| ConfigError::InvalidParameterValue {
                            filter: definition.name.clone(),
                            parameter: name.clone(),
                            reason,
                        })?;
                step.parameters.insert(name.clone(), normalized);
            }
            None => {
                warnings.push(format!(
                    "filter `{}`: missing parameter `{name}`, using its default",
                    definition.name
                ));
                step.parameters.insert(name.clone(), schema.default_value());
            }
        }
    }

    for name in step.parameters.keys() {
        if !definition.parameters.contains_key(name) {
            warnings.push(format!(
                "filter `{}`: parameter `{name}` is not supported, keeping it anyway",
                definition.name
            ));
        }
    }

    Ok(warnings)
}

static ACTIVE: Lazy<RwLock<Arc<FilterRegistry>>> =
    Lazy::new(|| RwLock::new(Arc::new(FilterRegistry::default())));

/// Install the process-wide registry (atomic swap).
pub fn set_active(registry: FilterRegistry) {
    *ACTIVE.write().unwrap() = Arc::new(registry);
}

/// The process-wide registry installed by [`set_active`].
pub fn active() -> Arc<FilterRegistry> {
    ACTIVE.read().unwrap().clone()
}

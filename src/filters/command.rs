//! Shell command synthesis for a filter step.
//!
//! The synthesized command is a single `sh -c` line: parameter bindings
//! first (`name=value; …`), then the filter's own command. Monolingual
//! filters get the column splicer prepended so they only ever see their own
//! column.

use super::params::shell_value;
use super::{ConfigError, FilterDefinition, FilterStep, FilterType};
use indexmap::IndexMap;
use serde_json::Value;

/// Placeholder a command template uses to request all parameters as one
/// YAML-encoded environment variable (the only way to pass lists/tuples).
pub const PARAMETERS_AS_YAML: &str = "PARAMETERS_AS_YAML";

/// Quote a string for POSIX `sh`.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"@%+=:,./-_".contains(&b));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// Build the shell command realising `step`.
///
/// `languages` is the ordered list of column language codes; `col_argv` is
/// the invocation of the column splicer (absolute, since filters run from
/// their own basedir).
pub fn synthesize(
    definition: &FilterDefinition,
    step: &FilterStep,
    languages: &[String],
    col_argv: &[String],
) -> Result<String, ConfigError> {
    let base = match definition.kind {
        FilterType::Bilingual => definition.command.clone(),
        FilterType::Monolingual => {
            let language = step
                .language
                .as_deref()
                .filter(|l| !l.is_empty())
                .ok_or_else(|| ConfigError::LanguageMissing {
                    filter: definition.name.clone(),
                })?;
            let columns = language
                .split(',')
                .map(|token| {
                    languages
                        .iter()
                        .position(|lang| lang == token)
                        .map(|index| index.to_string())
                        .ok_or_else(|| ConfigError::UnknownLanguage {
                            language: token.to_string(),
                        })
                })
                .collect::<Result<Vec<String>, ConfigError>>()?;
            let col = col_argv
                .iter()
                .map(|arg| shell_quote(arg))
                .collect::<Vec<String>>()
                .join(" ");
            format!("{} {} {}", col, columns.join(","), definition.command)
        }
    };

    if definition.parameters.is_empty() {
        return Ok(base);
    }

    // Export every defined parameter: the step's bound value, or the default.
    let mut exported: IndexMap<String, Value> = IndexMap::new();
    for (name, schema) in &definition.parameters {
        let value = step
            .parameters
            .get(name)
            .cloned()
            .unwrap_or_else(|| schema.default_value());
        let value = schema
            .check(&value)
            .map_err(|reason| ConfigError::InvalidParameterValue {
                filter: definition.name.clone(),
                parameter: name.clone(),
                reason,
            })?;
        exported.insert(name.clone(), value);
    }

    if base.contains(PARAMETERS_AS_YAML) {
        let yaml =
            serde_yaml::to_string(&exported).map_err(|e| ConfigError::InvalidParameterValue {
                filter: definition.name.clone(),
                parameter: PARAMETERS_AS_YAML.to_string(),
                reason: e.to_string(),
            })?;
        return Ok(format!(
            "{}={}; {}",
            PARAMETERS_AS_YAML,
            shell_quote(&yaml),
            base
        ));
    }

    let mut bindings = Vec::with_capacity(exported.len() + 1);
    for (name, value) in &exported {
        let value = shell_value(value).map_err(|reason| ConfigError::InvalidParameterValue {
            filter: definition.name.clone(),
            parameter: name.clone(),
            reason,
        })?;
        bindings.push(format!("{}={}", name, shell_quote(&value)));
    }
    bindings.push(base);
    Ok(bindings.join("; "))
}

//! Pipeline documents and their execution as a chain of child processes.
//!
//! A pipeline document (`DATASET.filters.json`) lists the per-language input
//! files and an ordered list of filter steps. Validation resolves every step
//! against the filter registry; execution wires one child per step,
//! stdout→stdin, inside a [`scope::PipelineScope`].

pub mod scope;

pub use scope::{CommandSpec, PipelineFailed, PipelineScope};

use crate::dataset::lang_code;
use crate::filters::{command::synthesize, validate_step, ConfigError, FilterRegistry, FilterStep};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// The versioned pipeline document stored next to a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFile {
    pub version: u64,
    pub files: Vec<String>,
    pub filters: Vec<FilterStep>,
}

impl PipelineFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("cannot open pipeline document: {}", path.display()))?;
        let document = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("cannot parse pipeline document: {}", path.display()))?;
        Ok(document)
    }

    /// Column language codes, in file order.
    pub fn languages(&self) -> anyhow::Result<Vec<String>> {
        self.files
            .iter()
            .map(|file| {
                let name = Path::new(file)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.clone());
                lang_code(&name)
            })
            .collect()
    }

    /// Validate the document against a registry: version, files, and every
    /// step's filter reference, parameters and language invariant. Missing
    /// parameters are filled with their defaults; the returned warnings are
    /// non-fatal.
    pub fn validate(&mut self, registry: &FilterRegistry) -> Result<Vec<String>, ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::UnsupportedVersion(self.version));
        }
        if self.files.is_empty() {
            return Err(ConfigError::NoInputFiles);
        }

        let mut warnings = Vec::new();
        for step in &mut self.filters {
            let definition = registry.get(&step.filter)?;
            warnings.extend(validate_step(&definition, step)?);
        }
        Ok(warnings)
    }
}

/// One executable step: a synthesized shell command and where to run it.
#[derive(Debug, Clone)]
pub struct PipelineStep {
    pub name: String,
    pub command: String,
    pub basedir: PathBuf,
}

/// A fully resolved pipeline, ready to be wired into a scope.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
}

impl Pipeline {
    /// Resolve every step of `document` into a concrete shell command.
    ///
    /// `col_argv` is the column-splicer invocation prepended to monolingual
    /// filters; it must be absolute since steps run from their own basedir.
    pub fn build(
        registry: &FilterRegistry,
        languages: &[String],
        steps: &[FilterStep],
        col_argv: &[String],
    ) -> Result<Self, ConfigError> {
        let steps = steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let definition = registry.get(&step.filter)?;
                let command = synthesize(&definition, step, languages, col_argv)?;
                Ok(PipelineStep {
                    name: format!("step {i}"),
                    command,
                    basedir: definition.basedir.clone(),
                })
            })
            .collect::<Result<Vec<PipelineStep>, ConfigError>>()?;
        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Start one child per step inside `scope`, chained stdout→stdin, the
    /// first reading `input` and the last writing `output`.
    ///
    /// With `tee`, every step's output additionally goes through a `tee`
    /// child writing `BASENAME.step-N.tsv`.
    ///
    /// The chain runs concurrently with the caller; exit status handling
    /// happens when the scope is finished.
    pub fn run(
        &self,
        pool: &mut PipelineScope,
        input: Stdio,
        output: Stdio,
        tee: Option<&str>,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(!self.steps.is_empty(), "pipeline has no steps");

        let mut stdin = input;
        let mut output = Some(output);
        let last = self.steps.len() - 1;

        for (i, step) in self.steps.iter().enumerate() {
            let is_last = i == last;

            let stdout = if is_last && tee.is_none() {
                output.take().unwrap()
            } else {
                Stdio::piped()
            };

            let child = pool.start(
                &step.name,
                &CommandSpec::Shell(step.command.clone()),
                stdin,
                stdout,
                Some(&step.basedir),
            )?;
            pool.log()
                .line(format!("[parclean] step {i}: Started {}", step.command));

            if is_last && tee.is_none() {
                return Ok(());
            }

            stdin = match child.stdout {
                Some(stdout) => Stdio::from(stdout),
                None => anyhow::bail!("step {i} has no stdout pipe"),
            };

            if let Some(basename) = tee {
                let path = format!("{basename}.step-{i}.tsv");
                let stdout = if is_last {
                    output.take().unwrap()
                } else {
                    Stdio::piped()
                };
                let tee_child = pool.start(
                    &format!("tee {i}"),
                    &CommandSpec::Argv(vec!["tee".to_string(), path]),
                    stdin,
                    stdout,
                    None,
                )?;
                if is_last {
                    return Ok(());
                }
                stdin = match tee_child.stdout {
                    Some(stdout) => Stdio::from(stdout),
                    None => anyhow::bail!("tee {i} has no stdout pipe"),
                };
            }
        }

        Ok(())
    }
}

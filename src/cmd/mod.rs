mod clean;

use clap::{CommandFactory, Parser, ValueHint};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;

const AFTER_HELP: &str = "\x1b[1mCommon workflows:\x1b[0m
  Clean a dataset with its stored pipeline:
    parclean data/train-parts/dataset.filters.json | gzip > clean.tsv.gz

  Clean a ready-made TSV stream from stdin:
    zcat corpus.tsv.gz | parclean --input - pipeline.filters.json en de

  Use four parallel pipelines for a large corpus:
    parclean --parallel 4 --batch-size 500000 dataset.filters.json

  Inspect intermediate output of every step:
    parclean --tee --first 1000 dataset.filters.json

\x1b[1mMore info:\x1b[0m
  Filter descriptors are read from ./filters (see --filters).
  Enable completions: parclean --completions <shell>";

// Help heading constants for consistency
const INPUT_OUTPUT: &str = "Input/Output";
const MODE: &str = "Mode";
const BEHAVIOR: &str = "Behavior";
const LIMITS: &str = "Limits";
const OUTPUT_FORMAT: &str = "Output";

#[derive(Parser)]
#[command(name = "parclean")]
#[command(version)]
#[command(
    about = "Run a filter pipeline over a parallel-text corpus, one child process per filter step"
)]
#[command(after_help = AFTER_HELP)]
#[command(arg_required_else_help = true)]
#[command(max_term_width = 100)]
pub struct Cli {
    /// Pipeline document, e.g. DATASET.filters.json
    #[arg(value_hint = ValueHint::FilePath, required_unless_present = "completions")]
    pub pipeline: Option<PathBuf>,

    /// Language codes of the input columns (required with --input)
    pub languages: Vec<String>,

    /// Directory or glob with filter descriptors
    #[arg(short, long, default_value = "./filters", value_hint = ValueHint::AnyPath, help_heading = INPUT_OUTPUT)]
    pub filters: String,

    /// TSV input file, - for stdin. If absent, files are read from the pipeline document
    #[arg(short, long, help_heading = INPUT_OUTPUT)]
    pub input: Option<String>,

    /// Output file (default: stdout)
    #[arg(short, long, value_hint = ValueHint::FilePath, help_heading = INPUT_OUTPUT)]
    pub output: Option<PathBuf>,

    /// Directory dataset files resolve against (default: the pipeline document's directory)
    #[arg(short, long, value_hint = ValueHint::DirPath, help_heading = INPUT_OUTPUT)]
    pub basedir: Option<PathBuf>,

    /// Run N parallel copies of the pipeline over line batches
    #[arg(long, default_value_t = 1, help_heading = MODE)]
    pub parallel: usize,

    /// Lines per batch (only with --parallel > 1)
    #[arg(long, default_value_t = 1_000_000, help_heading = MODE)]
    pub batch_size: usize,

    /// Only process the first N lines of the input
    #[arg(long, help_heading = LIMITS)]
    pub first: Option<u64>,

    /// Write the output of each step to BASENAME.step-N.tsv
    #[arg(long, help_heading = BEHAVIOR)]
    pub tee: bool,

    /// Show a byte progress bar over the input files
    #[arg(short, long, help_heading = OUTPUT_FORMAT)]
    pub progress: bool,

    /// Generate shell completion scripts and exit
    #[arg(long, value_enum, help_heading = BEHAVIOR)]
    pub completions: Option<Shell>,
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(shell) = cli.completions {
        generate(shell, &mut Cli::command(), "parclean", &mut io::stdout());
        return Ok(());
    }
    clean::run(cli)
}

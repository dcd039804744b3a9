//! `parclean-col` — splice columns of a TSV stream through a single-column
//! filter program.

use clap::Parser;
use parclean::col::Splicer;

#[derive(Parser)]
#[command(name = "parclean-col")]
#[command(version)]
#[command(about = "Run a subcommand over selected columns of a TSV stream")]
#[command(after_help = "\x1b[1mExamples:\x1b[0m
  parclean-col 0 tr A-Z a-z < corpus.tsv
  parclean-col 0,1 ./normalize.sh < corpus.tsv")]
struct Cli {
    /// Comma-separated list of 0-based column indexes to splice out
    columns: String,

    /// Subcommand (and arguments) fed one line per spliced-out record
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    let result = cli
        .columns
        .parse::<Splicer>()
        .and_then(|splicer| splicer.run(&cli.command, std::io::stdin(), std::io::stdout()));

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("parclean-col: {e:#}");
            std::process::exit(1);
        }
    }
}

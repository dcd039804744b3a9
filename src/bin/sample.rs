//! `parclean-sample` — take a file's head, tail and a random sample of the
//! middle. Multiple files become multiple columns.

use clap::{Parser, ValueHint};
use parclean::dataset::open_reader_or_stdin;
use parclean::sample::sample;
use parclean::tsv::{join_fields, read_record};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::{BufReader, BufWriter, Read, Write};

#[derive(Parser)]
#[command(name = "parclean-sample")]
#[command(version)]
#[command(about = "Take a file's head, tail and a random sample from the rest")]
#[command(after_help = "\x1b[1mExamples:\x1b[0m
  parclean-sample -n 100 corpus.en.gz corpus.de.gz
  zcat corpus.tsv.gz | parclean-sample -n 50")]
struct Cli {
    /// Number of lines for each section of the sample
    #[arg(short = 'n', long = "lines", default_value_t = 10)]
    lines: usize,

    /// Column delimiter (\t and \n escapes are expanded)
    #[arg(short = 'd', long = "delimiter", default_value = "\\t")]
    delimiter: String,

    /// Print line numbers as an extra first column
    #[arg(short = 'N', long)]
    line_numbers: bool,

    /// Random seed for a reproducible middle section
    #[arg(long)]
    seed: Option<u64>,

    /// Files to sample; one file per column, - for stdin
    #[arg(value_hint = ValueHint::FilePath)]
    files: Vec<String>,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let files = if cli.files.is_empty() {
        vec!["-".to_string()]
    } else {
        cli.files.clone()
    };

    let mut columns: Vec<BufReader<Box<dyn Read + Send>>> = files
        .iter()
        .map(|file| open_reader_or_stdin(file).map(BufReader::new))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let delimiter = cli
        .delimiter
        .replace("\\t", "\t")
        .replace("\\n", "\n")
        .into_bytes();

    let rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => rand::make_rng(),
    };

    // Zip the columns row-wise, stopping at the shortest file. Read errors
    // stop the stream and are re-raised after sampling.
    let mut read_error: Option<std::io::Error> = None;
    let mut row_number = 0u64;
    let line_numbers = cli.line_numbers;
    let rows = std::iter::from_fn(|| {
        let mut row: Vec<Vec<u8>> = Vec::with_capacity(columns.len() + 1);
        if line_numbers {
            row.push(row_number.to_string().into_bytes());
        }
        row_number += 1;
        let mut field = Vec::new();
        for column in &mut columns {
            match read_record(column, &mut field) {
                Ok(true) => row.push(field.clone()),
                Ok(false) => return None,
                Err(e) => {
                    read_error = Some(e);
                    return None;
                }
            }
        }
        Some(row)
    });

    let sections = sample(cli.lines, rows, rng);

    if let Some(e) = read_error {
        return Err(e.into());
    }

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut line = Vec::new();
    for section in [sections.head, sections.middle, sections.tail] {
        for row in section {
            line.clear();
            join_fields(&row, &delimiter, &mut line);
            line.push(b'\n');
            out.write_all(&line)?;
        }
        out.flush()?;
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("parclean-sample: {e:#}");
        std::process::exit(1);
    }
}

// Allow dead code for items that are part of the public API but only used in tests
#![allow(dead_code)]

mod cache;
mod cmd;
mod col;
mod dataset;
mod filters;
mod parallel;
mod pipeline;
mod progress;
mod sample;
mod stderr;
mod tsv;

use clap::Parser;
use cmd::Cli;
use filters::ConfigError;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = cmd::run(cli) {
        eprintln!("parclean: {e:#}");
        let config_error = e
            .chain()
            .any(|cause| cause.downcast_ref::<ConfigError>().is_some());
        std::process::exit(if config_error { 2 } else { 1 });
    }
}

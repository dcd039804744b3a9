// Allow dead code for items that are part of the public API but only used in tests
#![allow(dead_code)]

pub mod cache;
pub mod cmd;
pub mod col;
pub mod dataset;
pub mod filters;
pub mod parallel;
pub mod pipeline;
pub mod progress;
pub mod sample;
pub mod stderr;
pub mod tsv;

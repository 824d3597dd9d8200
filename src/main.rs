//! homework-gen · printable homework packets from a language model
//!
//! - Prompt templates (built-in or `templates/prompts/*.md`)
//! - OpenAI-compatible chat backend, offline sample content without a key
//! - Validated assignments rendered to HTML, Markdown or PDF
//!
//! Important env variables:
//!   OPENAI_API_KEY          : enables the OpenAI backend if present
//!   OPENAI_BASE_URL         : default "https://api.openai.com/v1"
//!   HOMEWORK_GEN_MODEL      : default "gpt-4o-mini"
//!   HOMEWORK_GEN_CACHE_DIR  : default "llm_cache"
//!   HOMEWORK_GEN_PDF_THEME  : "classroom" (default) or "plain"
//!   LOG_LEVEL               : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT              : "pretty" (default) or "json"

mod cache;
mod cli;
mod config;
mod content;
mod domain;
mod error;
mod formatter;
mod llm;
mod openai;
mod prompt;
mod render;
mod schema;
mod seeds;
mod telemetry;
mod util;

use std::error::Error as _;
use std::process::ExitCode;

use clap::Parser;

use crate::cli::Args;

#[tokio::main]
async fn main() -> ExitCode {
  let args = Args::parse();
  let verbose = args.verbose;
  telemetry::init_tracing(verbose);

  match cli::run(args).await {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      eprintln!("Error: {e}");
      if verbose {
        let mut source = e.source();
        while let Some(cause) = source {
          eprintln!("  caused by: {cause}");
          source = cause.source();
        }
        eprintln!("{e:#?}");
      }
      ExitCode::FAILURE
    }
  }
}

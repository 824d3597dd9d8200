//! Command surface: argument parsing and the end-to-end run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use clap::{Parser, ValueEnum};
use tracing::{debug, info, warn};

use crate::cache::DiskCache;
use crate::config::AppConfig;
use crate::content::ContentGenerator;
use crate::domain::{AssignmentRequest, Difficulty, HomeworkPacket};
use crate::error::AppError;
use crate::formatter::{format_packet_markdown, Formatter};
use crate::llm::{ChatBackend, GenerationOptions, LlmClient, OfflineBackend, RetryPolicy};
use crate::openai::OpenAiBackend;
use crate::prompt::{PromptTemplates, FALLBACK_TEMPLATE};
use crate::render::PdfRenderer;
use crate::util::safe_file_stem;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
  Pdf,
  Html,
  Markdown,
}

impl OutputFormat {
  pub fn extension(&self) -> &'static str {
    match self {
      OutputFormat::Pdf => "pdf",
      OutputFormat::Html => "html",
      OutputFormat::Markdown => "md",
    }
  }
}

/// Generate printable homework packets with a language model.
#[derive(Parser, Debug)]
#[command(name = "homework-gen", author, version, about, long_about = None)]
pub struct Args {
  /// Topic for the homework, e.g. "fractions" or "the water cycle"
  #[arg(required_unless_present = "list_templates")]
  pub topic: Option<String>,

  /// Number of assignments to generate [default: 5, or generation.default_count]
  #[arg(short, long)]
  pub count: Option<u32>,

  /// Difficulty level: easy, medium or hard [default: medium]
  #[arg(short, long)]
  pub difficulty: Option<Difficulty>,

  /// Target grade level [default: "5th Grade"]
  #[arg(short, long)]
  pub grade_level: Option<String>,

  /// Questions per assignment
  #[arg(short = 'q', long = "questions", default_value_t = 10)]
  pub questions: u32,

  /// Extra instructions appended to the prompt
  #[arg(long)]
  pub instructions: Option<String>,

  /// Output file path [default: homework_packet_<topic>_<timestamp>.<ext>]
  #[arg(short, long)]
  pub output: Option<PathBuf>,

  /// Model to use (overrides llm.default_model)
  #[arg(short, long)]
  pub model: Option<String>,

  /// Prompt template name
  #[arg(short, long, default_value = FALLBACK_TEMPLATE)]
  pub template: String,

  /// Configuration file (YAML or TOML)
  #[arg(long)]
  pub config: Option<PathBuf>,

  /// Output format
  #[arg(long, value_enum, default_value_t = OutputFormat::Pdf)]
  pub format: OutputFormat,

  /// Bypass the response cache for this run
  #[arg(long, default_value_t = false)]
  pub no_cache: bool,

  /// Empty the response cache before generating
  #[arg(long, default_value_t = false)]
  pub clear_cache: bool,

  /// List available prompt templates and exit
  #[arg(long, default_value_t = false)]
  pub list_templates: bool,

  /// Verbose output
  #[arg(short, long, default_value_t = false)]
  pub verbose: bool,
}

pub async fn run(args: Args) -> Result<(), AppError> {
  let cfg = AppConfig::load(args.config.as_deref())?;
  run_with(args, cfg).await
}

pub async fn run_with(args: Args, cfg: AppConfig) -> Result<(), AppError> {
  let templates = PromptTemplates::with_dir(&cfg.generation.templates_dir);
  if args.list_templates {
    println!("Available templates:");
    for name in templates.available() {
      println!("  - {name}");
    }
    return Ok(());
  }

  let request = build_request(&args, &cfg)?;
  let llm = build_client(&args, &cfg).await?;
  if args.clear_cache {
    let removed = llm.clear_cache().await?;
    println!("Cleared {removed} cached response(s)");
  }

  println!("Generating {} assignment(s) about '{}'...", request.count, request.topic);
  let options = GenerationOptions::new()
    .set("temperature", f64::from(cfg.llm.temperature))
    .set("max_tokens", cfg.llm.max_tokens);
  let generator = ContentGenerator::new(llm, templates, cfg.prompts.clone()).with_options(options);
  let outcome = generator.generate_packet(&request).await;
  if let Err(e) = generator.into_llm().close().await {
    warn!(target: "homework_gen", error = %e, "Closing the response cache failed");
  }
  let packet = outcome?;
  if packet.assignments.is_empty() {
    return Err(AppError::Usage("no assignments were generated".into()));
  }

  let destination = args
    .output
    .clone()
    .unwrap_or_else(|| default_output_path(&request.topic, args.format, &Local::now().format("%Y%m%d_%H%M%S").to_string()));
  let written = write_packet(&packet, args.format, &cfg, &destination).await?;

  println!("Generated {} assignment(s) using {}", packet.assignment_count(), packet.model_used);
  println!("Saved to: {}", written.display());
  if args.verbose {
    println!("Topic: {} (generated {})", packet.topic, packet.generated_at);
    for (i, a) in packet.assignments.iter().enumerate() {
      println!("  {}. {} ({} questions)", i + 1, a.title, a.questions.len());
    }
  }
  Ok(())
}

fn build_request(args: &Args, cfg: &AppConfig) -> Result<AssignmentRequest, AppError> {
  let topic = args
    .topic
    .as_deref()
    .map(str::trim)
    .filter(|t| !t.is_empty())
    .ok_or_else(|| AppError::Usage("a topic is required".into()))?;

  let difficulty = match args.difficulty {
    Some(d) => d,
    None => cfg
      .generation
      .default_difficulty
      .parse()
      .map_err(|e| AppError::Usage(format!("generation.default_difficulty: {e}")))?,
  };
  let count = args.count.unwrap_or(cfg.generation.default_count);
  if count == 0 {
    return Err(AppError::Usage("--count must be at least 1".into()));
  }
  if args.questions == 0 {
    return Err(AppError::Usage("--questions must be at least 1".into()));
  }

  Ok(AssignmentRequest {
    topic: topic.to_string(),
    subject: args.template.clone(),
    difficulty,
    grade_level: args.grade_level.clone().unwrap_or_else(|| cfg.generation.default_grade_level.clone()),
    count,
    num_questions: args.questions,
    special_instructions: args.instructions.clone(),
  })
}

async fn build_client(args: &Args, cfg: &AppConfig) -> Result<LlmClient, AppError> {
  let backend: Box<dyn ChatBackend> = match cfg.llm.api_key.as_deref().filter(|k| !k.is_empty()) {
    Some(key) => {
      let backend = OpenAiBackend::new(key, &cfg.llm.base_url, Duration::from_secs(cfg.llm.timeout_secs))
        .map_err(|source| AppError::Usage(format!("could not build HTTP client: {source}")))?
        .with_json_mode(cfg.llm.json_mode);
      info!(target: "homework_gen", base_url = %backend.base_url(), "OpenAI backend enabled");
      Box::new(backend)
    }
    None => {
      warn!(target: "homework_gen", "OPENAI_API_KEY not set; using offline sample content");
      Box::new(OfflineBackend)
    }
  };

  let model = args.model.clone().unwrap_or_else(|| cfg.llm.default_model.clone());
  let mut client = LlmClient::new(backend, model).with_retry(RetryPolicy::default().with_max_attempts(cfg.llm.max_attempts));
  if cfg.llm.cache_enabled && !args.no_cache {
    let cache = DiskCache::open(&cfg.llm.cache_dir).await?;
    debug!(target: "homework_gen", dir = %cache.dir().display(), "Response cache enabled");
    client = client.with_cache(Box::new(cache));
  }
  info!(target: "homework_gen", backend = %client.backend_name(), model = %client.model(), "Generation client ready");
  Ok(client)
}

/// `homework_packet_<safe_topic>_<timestamp>.<ext>` in the working directory.
pub fn default_output_path(topic: &str, format: OutputFormat, timestamp: &str) -> PathBuf {
  PathBuf::from(format!("homework_packet_{}_{}.{}", safe_file_stem(topic), timestamp, format.extension()))
}

/// Write `packet` in `format`; returns the path actually written, which is the
/// `.html` fallback when PDF rendering fails.
async fn write_packet(packet: &HomeworkPacket, format: OutputFormat, cfg: &AppConfig, destination: &Path) -> Result<PathBuf, AppError> {
  match format {
    OutputFormat::Markdown => {
      write_text(destination, &format_packet_markdown(&packet.assignments)).await?;
      Ok(destination.to_path_buf())
    }
    OutputFormat::Html => {
      let html = Formatter::from_config(&cfg.pdf).format_packet(&packet.assignments);
      write_text(destination, &html).await?;
      Ok(destination.to_path_buf())
    }
    OutputFormat::Pdf => {
      let html = Formatter::from_config(&cfg.pdf).format_packet(&packet.assignments);
      match PdfRenderer::new(&cfg.pdf).render(&html, destination).await {
        Ok(()) => Ok(destination.to_path_buf()),
        Err(e) => {
          let fallback = destination.with_extension("html");
          warn!(target: "homework_gen", error = %e, fallback = %fallback.display(), "PDF rendering failed; writing HTML instead");
          eprintln!("Warning: PDF rendering failed ({e}); saving HTML instead");
          write_text(&fallback, &html).await?;
          Ok(fallback)
        }
      }
    }
  }
}

async fn write_text(path: &Path, text: &str) -> Result<(), AppError> {
  if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
    tokio::fs::create_dir_all(parent).await?;
  }
  tokio::fs::write(path, text).await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn offline_config(dir: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.llm.api_key = None;
    cfg.llm.cache_enabled = false;
    cfg.llm.cache_dir = dir.join("cache");
    cfg.pdf.stylesheet = dir.join("missing.css");
    cfg.pdf.engine = Some("definitely-not-a-pdf-engine-xyz".into());
    cfg.generation.templates_dir = dir.join("prompts");
    cfg
  }

  fn parse(argv: &[&str]) -> Args {
    Args::try_parse_from(std::iter::once("homework-gen").chain(argv.iter().copied())).unwrap()
  }

  #[test]
  fn flags_parse_with_defaults() {
    let args = parse(&["fractions"]);
    assert_eq!(args.topic.as_deref(), Some("fractions"));
    assert_eq!(args.count, None);
    assert_eq!(args.questions, 10);
    assert_eq!(args.template, "generic");
    assert_eq!(args.format, OutputFormat::Pdf);
    assert!(!args.verbose && !args.no_cache && !args.list_templates);

    let args = parse(&["volcanoes", "-c", "3", "-d", "HARD", "-g", "7th Grade", "-t", "science", "--format", "markdown", "-v"]);
    assert_eq!(args.count, Some(3));
    assert_eq!(args.difficulty, Some(Difficulty::Hard));
    assert_eq!(args.grade_level.as_deref(), Some("7th Grade"));
    assert_eq!(args.template, "science");
    assert_eq!(args.format, OutputFormat::Markdown);
    assert!(args.verbose);
  }

  #[test]
  fn topic_is_required_unless_listing() {
    assert!(Args::try_parse_from(["homework-gen"]).is_err());
    assert!(Args::try_parse_from(["homework-gen", "--list-templates"]).is_ok());
    assert!(Args::try_parse_from(["homework-gen", "x", "-d", "impossible"]).is_err());
  }

  #[test]
  fn request_falls_back_to_config_defaults() {
    let mut cfg = AppConfig::default();
    cfg.generation.default_count = 2;
    cfg.generation.default_difficulty = "easy".into();
    cfg.generation.default_grade_level = "3rd Grade".into();
    let req = build_request(&parse(&["  fractions  "]), &cfg).unwrap();
    assert_eq!(req.topic, "fractions");
    assert_eq!(req.count, 2);
    assert_eq!(req.difficulty, Difficulty::Easy);
    assert_eq!(req.grade_level, "3rd Grade");

    assert!(matches!(build_request(&parse(&["x", "-c", "0"]), &cfg), Err(AppError::Usage(_))));
    assert!(matches!(build_request(&parse(&["   "]), &cfg), Err(AppError::Usage(_))));
  }

  #[test]
  fn default_output_name() {
    let path = default_output_path("World War 2: timeline!", OutputFormat::Pdf, "20240102_030405");
    assert_eq!(path, PathBuf::from("homework_packet_World_War_2_timeline_20240102_030405.pdf"));
    let path = default_output_path("ratios", OutputFormat::Markdown, "20240102_030405");
    assert_eq!(path.extension().unwrap(), "md");
  }

  #[tokio::test]
  async fn offline_run_writes_html() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out").join("packet.html");
    let args = parse(&["fractions", "--format", "html", "-o", out.to_str().unwrap()]);
    run_with(args, offline_config(dir.path())).await.unwrap();

    let html = std::fs::read_to_string(&out).unwrap();
    assert!(html.starts_with("<!DOCTYPE html>"));
    assert!(html.contains("Practice Set 1: Basic Problems"));
  }

  #[tokio::test]
  async fn pdf_failure_falls_back_to_html() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("packet.pdf");
    let args = parse(&["fractions", "-o", out.to_str().unwrap()]);
    run_with(args, offline_config(dir.path())).await.unwrap();

    assert!(!out.exists());
    let fallback = std::fs::read_to_string(dir.path().join("packet.html")).unwrap();
    assert!(fallback.contains("Practice Set 1: Basic Problems"));
  }

  #[tokio::test]
  async fn offline_responses_are_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = offline_config(dir.path());
    cfg.llm.cache_enabled = true;
    let out = dir.path().join("packet.md");
    let args = parse(&["fractions", "--format", "markdown", "--clear-cache", "-o", out.to_str().unwrap()]);
    run_with(args, cfg).await.unwrap();

    assert!(std::fs::read_to_string(&out).unwrap().starts_with("# Practice Set 1"));
    // The offline backend is never cached.
    let cached = std::fs::read_dir(dir.path().join("cache")).unwrap().count();
    assert_eq!(cached, 0);
  }
}

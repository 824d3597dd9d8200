//! Application configuration: defaults, a YAML/TOML file, `.env`, and environment overrides.
//!
//! See `AppConfig` for the expected schema. Every section is optional in the file.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("config file {path} could not be read: {source}")]
  Read { path: PathBuf, #[source] source: std::io::Error },
  #[error("config file {path} is not valid YAML: {source}")]
  Yaml { path: PathBuf, #[source] source: serde_yaml::Error },
  #[error("config file {path} is not valid TOML: {source}")]
  Toml { path: PathBuf, #[source] source: toml::de::Error },
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
  pub llm: LlmConfig,
  pub pdf: PdfConfig,
  pub generation: GenerationConfig,
  pub prompts: Prompts,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
  pub default_model: String,
  pub api_key: Option<String>,
  pub base_url: String,
  pub cache_enabled: bool,
  pub cache_dir: PathBuf,
  pub temperature: f32,
  pub max_tokens: u32,
  pub timeout_secs: u64,
  pub max_attempts: u32,
  /// Ask the backend for `response_format: json_object`.
  pub json_mode: bool,
}

impl Default for LlmConfig {
  fn default() -> Self {
    Self {
      default_model: "gpt-4o-mini".into(),
      api_key: None,
      base_url: "https://api.openai.com/v1".into(),
      cache_enabled: true,
      cache_dir: PathBuf::from("llm_cache"),
      temperature: 0.1,
      max_tokens: 4000,
      timeout_secs: 60,
      max_attempts: 3,
      json_mode: true,
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
  /// Built-in stylesheet used when no stylesheet file exists: "classroom" or "plain".
  pub theme: String,
  pub font_family: String,
  /// CSS `@page` size, e.g. "letter" or "A4".
  pub page_size: String,
  /// Renderer program name or path. Auto-detected on PATH when unset.
  pub engine: Option<String>,
  pub stylesheet: PathBuf,
}

impl Default for PdfConfig {
  fn default() -> Self {
    Self {
      theme: "classroom".into(),
      font_family: "Arial".into(),
      page_size: "letter".into(),
      engine: None,
      stylesheet: PathBuf::from("templates/styles.css"),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
  pub default_count: u32,
  pub default_difficulty: String,
  pub default_grade_level: String,
  pub templates_dir: PathBuf,
}

impl Default for GenerationConfig {
  fn default() -> Self {
    Self {
      default_count: 5,
      default_difficulty: "medium".into(),
      default_grade_level: "5th Grade".into(),
      templates_dir: PathBuf::from("templates/prompts"),
    }
  }
}

/// Fixed parts of the prompt envelope. Defaults suit general homework; override
/// them in the config file to tune tone.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub system: String,
  pub output_directive: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      system: "You are an expert educator creating homework assignments.".into(),
      output_directive: "Remember: Respond ONLY with valid JSON. No additional text or explanations.".into(),
    }
  }
}

impl AppConfig {
  /// Load configuration.
  ///
  /// An explicit path must exist and parse. Without one, the usual locations are
  /// probed and a broken file there is logged and skipped. Environment variables
  /// (including a local `.env`) are applied last.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    if !cfg!(test) {
      dotenvy::dotenv().ok();
    }

    let mut cfg = match explicit {
      Some(path) => Self::from_file(path)?,
      None => Self::from_default_locations(),
    };
    cfg.apply_env(|key| std::env::var(key).ok());
    Ok(cfg)
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path)
      .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    let cfg = Self::parse(path, &text)?;
    info!(target: "homework_gen", path = %path.display(), "Loaded config file");
    Ok(cfg)
  }

  fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
    let is_toml = path.extension().map(|e| e == "toml").unwrap_or(false);
    if is_toml {
      toml::from_str(text).map_err(|source| ConfigError::Toml { path: path.to_path_buf(), source })
    } else if text.trim().is_empty() {
      Ok(Self::default())
    } else {
      serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml { path: path.to_path_buf(), source })
    }
  }

  fn from_default_locations() -> Self {
    for path in default_locations() {
      if !path.exists() {
        continue;
      }
      match Self::from_file(&path) {
        Ok(cfg) => return cfg,
        Err(e) => warn!(target: "homework_gen", path = %path.display(), error = %e, "Ignoring unreadable config file"),
      }
    }
    debug!(target: "homework_gen", "No config file found; using defaults");
    Self::default()
  }

  /// Apply environment overrides through `lookup` (normally `std::env::var`).
  pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if self.llm.api_key.as_deref().map(str::is_empty).unwrap_or(true) {
      self.llm.api_key = non_empty("OPENAI_API_KEY");
    }
    if let Some(v) = non_empty("OPENAI_BASE_URL") {
      self.llm.base_url = v;
    }
    if let Some(v) = non_empty("HOMEWORK_GEN_MODEL") {
      self.llm.default_model = v;
    }
    if let Some(v) = non_empty("HOMEWORK_GEN_CACHE_DIR") {
      self.llm.cache_dir = PathBuf::from(v);
    }
    if let Some(v) = non_empty("HOMEWORK_GEN_PDF_THEME") {
      self.pdf.theme = v;
    }
  }
}

fn default_locations() -> Vec<PathBuf> {
  let mut paths = vec![
    PathBuf::from("config.yaml"),
    PathBuf::from("config.yml"),
    PathBuf::from("config.toml"),
  ];
  if let Some(home) = dirs::home_dir() {
    paths.push(home.join(".homework-gen").join("config.yaml"));
  }
  paths
}

//! Top-level error for a generation run.

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::llm::GenerationError;
use crate::render::RenderError;
use crate::schema::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
  #[error("configuration error: {0}")]
  Config(#[from] ConfigError),

  #[error("model response was not usable: {0}")]
  Validation(#[from] ValidationError),

  #[error(transparent)]
  Generation(#[from] GenerationError),

  #[error("rendering failed: {0}")]
  Render(#[from] RenderError),

  #[error("cache error: {0}")]
  Cache(#[from] CacheError),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("{0}")]
  Usage(String),
}

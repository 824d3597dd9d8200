//! Content generation: prompt → model → validated assignments.
//!
//! `assemble` is pure: it parses the raw model text (with one recovery pass for
//! replies that wrap the JSON in prose), validates it against `schema`, and
//! builds `Assignment` records in their original order.

use chrono::Local;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::config::Prompts;
use crate::domain::{Assignment, AssignmentRequest, Difficulty, HomeworkPacket};
use crate::error::AppError;
use crate::llm::{GenerationOptions, LlmClient};
use crate::prompt::{build_prompt, PromptTemplates};
use crate::schema::{self, ValidationError};
use crate::util::trunc_for_log;

/// Parse, validate and materialize the assignments in `raw`.
pub fn assemble(raw: &str) -> Result<Vec<Assignment>, ValidationError> {
  let data = parse_lenient(raw)?;
  let items = schema::validate(&data)?;

  items
    .iter()
    .enumerate()
    .map(|(index, item)| to_assignment(index, item))
    .collect()
}

fn parse_lenient(raw: &str) -> Result<Value, ValidationError> {
  match serde_json::from_str::<Value>(raw) {
    Ok(v) => Ok(v),
    Err(strict) => extract_json_object(raw).ok_or_else(|| ValidationError::InvalidJson(strict.to_string())),
  }
}

/// Recovery for replies like "Sure! {...} Hope this helps".
///
/// Takes the first `{`, finds its balanced closing `}` (ignoring braces inside
/// JSON strings) and parses only that span. A truncated or malformed span is
/// not recovered, even when a later `{` would parse.
pub fn extract_json_object(text: &str) -> Option<Value> {
  let start = text.find('{')?;
  let end = balanced_end(text.as_bytes(), start)?;
  match serde_json::from_str::<Value>(&text[start..=end]) {
    Ok(value @ Value::Object(_)) => Some(value),
    _ => None,
  }
}

fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
  let mut depth = 0usize;
  let mut in_string = false;
  let mut escaped = false;
  for (i, &b) in bytes.iter().enumerate().skip(start) {
    if in_string {
      match b {
        _ if escaped => escaped = false,
        b'\\' => escaped = true,
        b'"' => in_string = false,
        _ => {}
      }
      continue;
    }
    match b {
      b'"' => in_string = true,
      b'{' => depth += 1,
      b'}' => {
        depth = depth.checked_sub(1)?;
        if depth == 0 {
          return Some(i);
        }
      }
      _ => {}
    }
  }
  None
}

/// Wire shape of one validated assignment object.
#[derive(Deserialize)]
struct RawAssignment {
  title: String,
  subject: String,
  difficulty: Difficulty,
  questions: Vec<String>,
  #[serde(default)]
  instructions: Option<String>,
  #[serde(default)]
  grade_level: Option<String>,
  #[serde(default)]
  estimated_time: Option<String>,
  #[serde(default)]
  materials_needed: Option<Vec<String>>,
  #[serde(default)]
  learning_objectives: Option<Vec<String>>,
}

fn to_assignment(index: usize, item: &Value) -> Result<Assignment, ValidationError> {
  let invalid = |reason: String| ValidationError::InvalidAssignment { index, reason };

  let raw: RawAssignment = serde_json::from_value(item.clone()).map_err(|e| invalid(e.to_string()))?;
  let mut assignment = Assignment::new(raw.title, raw.subject, raw.difficulty, raw.questions).map_err(invalid)?;
  assignment.instructions = raw.instructions;
  assignment.grade_level = raw.grade_level;
  assignment.estimated_time = raw.estimated_time;
  assignment.materials_needed = raw.materials_needed;
  assignment.learning_objectives = raw.learning_objectives;
  Ok(assignment)
}

/// Drives one generation run end to end.
pub struct ContentGenerator {
  llm: LlmClient,
  templates: PromptTemplates,
  prompts: Prompts,
  options: GenerationOptions,
}

impl ContentGenerator {
  pub fn new(llm: LlmClient, templates: PromptTemplates, prompts: Prompts) -> Self {
    Self { llm, templates, prompts, options: GenerationOptions::new() }
  }

  pub fn with_options(mut self, options: GenerationOptions) -> Self {
    self.options = options;
    self
  }

  pub fn into_llm(self) -> LlmClient {
    self.llm
  }

  pub fn build_prompt(&self, request: &AssignmentRequest) -> String {
    build_prompt(&self.templates, &self.prompts, request)
  }

  #[instrument(level = "info", skip(self, request), fields(topic = %request.topic, template = %request.subject, count = request.count))]
  pub async fn generate_assignments(&self, request: &AssignmentRequest) -> Result<Vec<Assignment>, AppError> {
    let prompt = self.build_prompt(request);
    let raw = self.llm.generate(&prompt, &self.options).await?;

    let assignments = assemble(&raw).map_err(|e| {
      warn!(target: "homework_gen", error = %e, response = %trunc_for_log(&raw, 200), "Model response rejected");
      e
    })?;

    if assignments.len() != request.count as usize {
      warn!(target: "homework_gen", requested = request.count, received = assignments.len(), "Model returned a different number of assignments");
    }
    info!(target: "homework_gen", assignments = assignments.len(), "Assignments validated");
    Ok(assignments)
  }

  pub async fn generate_packet(&self, request: &AssignmentRequest) -> Result<HomeworkPacket, AppError> {
    let assignments = self.generate_assignments(request).await?;
    Ok(HomeworkPacket {
      assignments,
      topic: request.topic.clone(),
      generated_at: Local::now().to_rfc3339(),
      model_used: self.llm.model().to_string(),
    })
  }
}

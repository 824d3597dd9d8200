//! Prompt templates and prompt assembly.
//!
//! Templates are plain text with `{topic}`, `{count}`, `{difficulty}`,
//! `{grade_level}` and `{num_questions}` placeholders. A small set ships in the
//! binary; `<templates_dir>/<name>.md` files override or extend them. Unknown
//! names fall back to `generic`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::Prompts;
use crate::domain::AssignmentRequest;
use crate::schema;
use crate::seeds::prompt_example;
use crate::util::{fill_template, Escape};

pub const FALLBACK_TEMPLATE: &str = "generic";

const TEMPLATE_EXT: &str = "md";

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
  (
    "generic",
    "Create {count} homework assignments about \"{topic}\" for {grade_level} students.
Difficulty: {difficulty}.
Each assignment should contain about {num_questions} questions that build from recall to application.
Use age-appropriate vocabulary and give every assignment a clear, specific title.",
  ),
  (
    "math",
    "Create {count} mathematics homework assignments on \"{topic}\" for {grade_level} students.
Difficulty: {difficulty}.
Each assignment should contain about {num_questions} problems. Mix computation, word problems and at least one problem that asks students to explain their reasoning.
Make every number in a problem explicit; do not rely on diagrams.",
  ),
  (
    "science",
    "Create {count} science homework assignments on \"{topic}\" for {grade_level} students.
Difficulty: {difficulty}.
Each assignment should contain about {num_questions} questions covering key vocabulary, cause and effect, and one prediction or simple experiment students can reason about on paper.",
  ),
  (
    "english",
    "Create {count} English language arts homework assignments on \"{topic}\" for {grade_level} students.
Difficulty: {difficulty}.
Each assignment should contain about {num_questions} prompts mixing grammar, vocabulary in context, and short written responses.",
  ),
  (
    "social_studies",
    "Create {count} social studies homework assignments on \"{topic}\" for {grade_level} students.
Difficulty: {difficulty}.
Each assignment should contain about {num_questions} questions on people, places, dates and the reasons behind events. Include one question that compares two perspectives.",
  ),
  (
    "computer_science",
    "Create {count} computer science homework assignments on \"{topic}\" for {grade_level} students.
Difficulty: {difficulty}.
Each assignment should contain about {num_questions} questions. Prefer pseudocode and tracing exercises that can be solved without a computer.",
  ),
];

/// Lookup for prompt templates, built-in first, overridable from a directory.
#[derive(Clone, Debug, Default)]
pub struct PromptTemplates {
  dir: Option<PathBuf>,
}

impl PromptTemplates {
  #[cfg(test)]
  pub fn builtin() -> Self {
    Self { dir: None }
  }

  pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
    Self { dir: Some(dir.into()) }
  }

  /// Every template name that `render` would resolve without falling back.
  pub fn available(&self) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = BUILTIN_TEMPLATES.iter().map(|(n, _)| n.to_string()).collect();
    if let Some(dir) = &self.dir {
      match std::fs::read_dir(dir) {
        Ok(entries) => {
          for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
            let is_template = path.extension().map(|e| e == TEMPLATE_EXT).unwrap_or(false);
            if let (true, Some(stem)) = (is_template, path.file_stem().and_then(|s| s.to_str())) {
              names.insert(stem.to_string());
            }
          }
        }
        Err(e) => debug!(target: "homework_gen", dir = %dir.display(), error = %e, "Template directory not readable"),
      }
    }
    names
  }

  fn load(&self, name: &str) -> Option<String> {
    if let Some(dir) = &self.dir {
      if let Some(text) = read_template(dir, name) {
        return Some(text);
      }
    }
    BUILTIN_TEMPLATES.iter().find(|(n, _)| *n == name).map(|(_, t)| t.to_string())
  }

  /// Render `name`, falling back to the generic template when it does not exist.
  pub fn render(&self, name: &str, pairs: &[(&str, &str)]) -> String {
    let text = match self.load(name) {
      Some(text) => text,
      None => {
        warn!(target: "homework_gen", template = %name, "Unknown prompt template; using '{FALLBACK_TEMPLATE}'");
        self.load(FALLBACK_TEMPLATE).unwrap_or_default()
      }
    };
    fill_template(&text, pairs, Escape::None)
  }
}

fn read_template(dir: &Path, name: &str) -> Option<String> {
  // Names are file stems, never paths.
  if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
    return None;
  }
  let path = dir.join(format!("{name}.{TEMPLATE_EXT}"));
  match std::fs::read_to_string(&path) {
    Ok(text) => Some(text),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
    Err(e) => {
      warn!(target: "homework_gen", path = %path.display(), error = %e, "Could not read prompt template");
      None
    }
  }
}

/// Build the complete prompt for one request: rendered template plus the fixed
/// envelope (role sentence, schema, example, request line, JSON-only directive).
pub fn build_prompt(templates: &PromptTemplates, prompts: &Prompts, request: &AssignmentRequest) -> String {
  let count = request.count.to_string();
  let num_questions = request.num_questions.to_string();
  let difficulty = request.difficulty.to_string();
  let body = templates.render(
    &request.subject,
    &[
      ("topic", request.topic.as_str()),
      ("count", count.as_str()),
      ("difficulty", difficulty.as_str()),
      ("grade_level", request.grade_level.as_str()),
      ("num_questions", num_questions.as_str()),
    ],
  );

  let schema = serde_json::to_string_pretty(&schema::json_schema()).unwrap_or_default();
  let example = serde_json::to_string_pretty(&prompt_example()).unwrap_or_default();

  let mut prompt = format!(
    "{system}

{body}

OUTPUT FORMAT:
You must respond with valid JSON containing an array of assignments.
Each assignment must follow this exact structure:

{schema}

EXAMPLES:
{example}

USER REQUEST: {topic}
",
    system = prompts.system.trim(),
    body = body.trim(),
    topic = request.topic,
  );

  if let Some(extra) = request.special_instructions.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
    prompt.push_str(&format!("SPECIAL INSTRUCTIONS: {extra}\n"));
  }
  prompt.push('\n');
  prompt.push_str(prompts.output_directive.trim());
  prompt
}

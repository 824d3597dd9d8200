//! Domain models: difficulty, assignments, packets, and generation requests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How demanding the generated work should be.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
  Easy,
  Medium,
  Hard,
}

impl Difficulty {
  #[cfg(test)]
  pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

  pub fn as_str(&self) -> &'static str {
    match self {
      Difficulty::Easy => "Easy",
      Difficulty::Medium => "Medium",
      Difficulty::Hard => "Hard",
    }
  }
}

impl Default for Difficulty {
  fn default() -> Self { Difficulty::Medium }
}

impl fmt::Display for Difficulty {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Difficulty {
  type Err = String;

  /// Case-insensitive: "easy", "Easy" and "EASY" all parse.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "easy" => Ok(Difficulty::Easy),
      "medium" => Ok(Difficulty::Medium),
      "hard" => Ok(Difficulty::Hard),
      other => Err(format!("unknown difficulty '{other}' (expected easy, medium or hard)")),
    }
  }
}

/// One homework unit.
///
/// Built once (from validated model output or by hand through [`Assignment::new`])
/// and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
  pub title: String,
  pub subject: String,
  pub difficulty: Difficulty,
  pub questions: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub instructions: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub grade_level: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub estimated_time: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub materials_needed: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub learning_objectives: Option<Vec<String>>,
}

impl Assignment {
  /// Checked constructor for the required fields. Optional fields are filled
  /// in afterwards with the `with_*` builders.
  pub fn new(
    title: impl Into<String>,
    subject: impl Into<String>,
    difficulty: Difficulty,
    questions: Vec<String>,
  ) -> Result<Self, String> {
    if questions.is_empty() {
      return Err("questions must contain at least one entry".into());
    }
    Ok(Self {
      title: title.into(),
      subject: subject.into(),
      difficulty,
      questions,
      instructions: None,
      grade_level: None,
      estimated_time: None,
      materials_needed: None,
      learning_objectives: None,
    })
  }

  #[cfg(test)]
  pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
    self.instructions = Some(instructions.into());
    self
  }

  #[cfg(test)]
  pub fn with_grade_level(mut self, grade_level: impl Into<String>) -> Self {
    self.grade_level = Some(grade_level.into());
    self
  }

  #[cfg(test)]
  pub fn with_estimated_time(mut self, estimated_time: impl Into<String>) -> Self {
    self.estimated_time = Some(estimated_time.into());
    self
  }

  #[cfg(test)]
  pub fn with_materials(mut self, materials: Vec<String>) -> Self {
    self.materials_needed = Some(materials);
    self
  }

  #[cfg(test)]
  pub fn with_objectives(mut self, objectives: Vec<String>) -> Self {
    self.learning_objectives = Some(objectives);
    self
  }
}

/// Assignments produced by one generation run, in generation order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HomeworkPacket {
  pub assignments: Vec<Assignment>,
  pub topic: String,
  /// ISO-8601 timestamp.
  pub generated_at: String,
  pub model_used: String,
}

impl HomeworkPacket {
  pub fn assignment_count(&self) -> usize {
    self.assignments.len()
  }
}

/// Parameters for a single generation call.
#[derive(Clone, Debug)]
pub struct AssignmentRequest {
  pub topic: String,
  /// Prompt template name, e.g. "math" or "science".
  pub subject: String,
  pub difficulty: Difficulty,
  pub grade_level: String,
  /// Number of assignments to ask for.
  pub count: u32,
  /// Questions per assignment.
  pub num_questions: u32,
  pub special_instructions: Option<String>,
}

impl AssignmentRequest {
  #[cfg(test)]
  pub fn new(topic: impl Into<String>) -> Self {
    Self {
      topic: topic.into(),
      subject: "generic".into(),
      difficulty: Difficulty::Medium,
      grade_level: "5th Grade".into(),
      count: 5,
      num_questions: 10,
      special_instructions: None,
    }
  }
}

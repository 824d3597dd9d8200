//! Built-in content that keeps the tool useful without a model or template files.

use serde_json::{json, Value};

/// Canned reply served by the offline backend (no API key configured).
pub fn offline_response() -> String {
  json!({
    "assignments": [
      {
        "title": "Practice Set 1: Basic Problems",
        "grade_level": "5th Grade",
        "subject": "Mathematics",
        "difficulty": "Medium",
        "estimated_time": "15 minutes",
        "instructions": "Complete these practice problems. Show your work.",
        "questions": [
          "What is 2 + 3?",
          "Calculate 10 - 4.",
          "Solve 6 × 2."
        ],
        "materials_needed": ["pencil", "paper"],
        "learning_objectives": ["Practice basic arithmetic"]
      }
    ]
  })
  .to_string()
}

/// The single example object shown to the model in every prompt.
pub fn prompt_example() -> Value {
  json!({
    "assignments": [
      {
        "title": "Example Assignment",
        "grade_level": "5th Grade",
        "subject": "Mathematics",
        "difficulty": "Medium",
        "estimated_time": "15 minutes",
        "instructions": "Complete the following problems.",
        "questions": ["Example problem 1", "Example problem 2"],
        "materials_needed": ["pencil"],
        "learning_objectives": ["Example objective"]
      }
    ]
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema;

  #[test]
  fn seeds_satisfy_the_schema() {
    let offline: Value = serde_json::from_str(&offline_response()).unwrap();
    assert_eq!(schema::validate(&offline).unwrap().len(), 1);
    assert_eq!(schema::validate(&prompt_example()).unwrap().len(), 1);
  }
}

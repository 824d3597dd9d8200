//! The shape every model response must have.
//!
//! `ASSIGNMENT_FIELDS` is the single description of an assignment object. The
//! validator walks it, and the prompt embeds the JSON Schema generated from it,
//! so the model and the validator always agree on structure.

use serde_json::{json, Map, Value};

pub const ROOT_KEY: &str = "assignments";

/// Why a response could not be turned into assignments.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
  #[error("invalid JSON response: {0}")]
  InvalidJson(String),

  #[error("schema violation{}: field '{field}' {reason}", fmt_index(.index))]
  SchemaViolation { index: Option<usize>, field: String, reason: String },

  #[error("invalid assignment {index}: {reason}")]
  InvalidAssignment { index: usize, reason: String },
}

fn fmt_index(index: &Option<usize>) -> String {
  match index {
    Some(i) => format!(" in assignment {i}"),
    None => String::new(),
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
  String,
  StringArray,
}

#[derive(Clone, Copy, Debug)]
pub struct FieldSpec {
  pub name: &'static str,
  pub required: bool,
  pub kind: FieldKind,
  /// Closed set of accepted values for string fields.
  pub allowed: Option<&'static [&'static str]>,
}

const DIFFICULTIES: &[&str] = &["Easy", "Medium", "Hard"];

/// Required fields come first, in the order they are reported when missing.
pub const ASSIGNMENT_FIELDS: &[FieldSpec] = &[
  FieldSpec { name: "title", required: true, kind: FieldKind::String, allowed: None },
  FieldSpec { name: "grade_level", required: true, kind: FieldKind::String, allowed: None },
  FieldSpec { name: "subject", required: true, kind: FieldKind::String, allowed: None },
  FieldSpec { name: "difficulty", required: true, kind: FieldKind::String, allowed: Some(DIFFICULTIES) },
  FieldSpec { name: "instructions", required: true, kind: FieldKind::String, allowed: None },
  FieldSpec { name: "questions", required: true, kind: FieldKind::StringArray, allowed: None },
  FieldSpec { name: "estimated_time", required: false, kind: FieldKind::String, allowed: None },
  FieldSpec { name: "materials_needed", required: false, kind: FieldKind::StringArray, allowed: None },
  FieldSpec { name: "learning_objectives", required: false, kind: FieldKind::StringArray, allowed: None },
];

/// Check `data` against the schema. Returns the assignment objects on success.
pub fn validate(data: &Value) -> Result<&[Value], ValidationError> {
  let root = data.as_object().ok_or_else(|| ValidationError::SchemaViolation {
    index: None,
    field: ROOT_KEY.into(),
    reason: "is missing: response is not a JSON object".into(),
  })?;

  let items = match root.get(ROOT_KEY) {
    None | Some(Value::Null) => {
      return Err(ValidationError::SchemaViolation {
        index: None,
        field: ROOT_KEY.into(),
        reason: "is missing".into(),
      })
    }
    Some(Value::Array(items)) => items,
    Some(other) => {
      return Err(ValidationError::SchemaViolation {
        index: None,
        field: ROOT_KEY.into(),
        reason: format!("must be an array, got {}", type_name(other)),
      })
    }
  };

  for (index, item) in items.iter().enumerate() {
    let obj = item.as_object().ok_or_else(|| ValidationError::SchemaViolation {
      index: Some(index),
      field: "<item>".into(),
      reason: format!("must be an object, got {}", type_name(item)),
    })?;
    validate_item(index, obj)?;
  }

  Ok(items)
}

fn validate_item(index: usize, obj: &Map<String, Value>) -> Result<(), ValidationError> {
  let violation = |field: &str, reason: String| ValidationError::SchemaViolation {
    index: Some(index),
    field: field.into(),
    reason,
  };

  for field_spec in ASSIGNMENT_FIELDS {
    let value = match obj.get(field_spec.name) {
      None | Some(Value::Null) => {
        if field_spec.required {
          return Err(violation(field_spec.name, "is missing".into()));
        }
        continue;
      }
      Some(v) => v,
    };

    match field_spec.kind {
      FieldKind::String => {
        let s = value
          .as_str()
          .ok_or_else(|| violation(field_spec.name, format!("must be a string, got {}", type_name(value))))?;
        if let Some(allowed) = field_spec.allowed {
          if !allowed.contains(&s) {
            return Err(violation(field_spec.name, format!("must be one of {}, got '{s}'", allowed.join("/"))));
          }
        }
      }
      FieldKind::StringArray => {
        let arr = value
          .as_array()
          .ok_or_else(|| violation(field_spec.name, format!("must be an array, got {}", type_name(value))))?;
        if let Some(pos) = arr.iter().position(|v| !v.is_string()) {
          return Err(violation(field_spec.name, format!("entry {pos} must be a string")));
        }
      }
    }
  }
  Ok(())
}

fn type_name(v: &Value) -> &'static str {
  match v {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

/// JSON Schema (draft-07) rendition of `ASSIGNMENT_FIELDS`, embedded in prompts.
pub fn json_schema() -> Value {
  let mut properties = Map::new();
  for field_spec in ASSIGNMENT_FIELDS {
    let prop = match (field_spec.kind, field_spec.allowed) {
      (FieldKind::String, Some(allowed)) => json!({ "type": "string", "enum": allowed }),
      (FieldKind::String, None) => json!({ "type": "string" }),
      (FieldKind::StringArray, _) => json!({ "type": "array", "items": { "type": "string" } }),
    };
    properties.insert(field_spec.name.to_string(), prop);
  }
  let required: Vec<&str> = ASSIGNMENT_FIELDS.iter().filter(|f| f.required).map(|f| f.name).collect();

  json!({
    "$schema": "http://json-schema.org/draft-07/schema#",
    "type": "object",
    "properties": {
      ROOT_KEY: {
        "type": "array",
        "items": {
          "type": "object",
          "properties": properties,
          "required": required,
        }
      }
    },
    "required": [ROOT_KEY],
  })
}

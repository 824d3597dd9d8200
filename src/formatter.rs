//! HTML (and Markdown) rendering of assignments.
//!
//! Every value that came from the model is HTML-escaped. The stylesheet comes
//! from the configured file when it exists, otherwise from a built-in theme, so
//! the document always looks coherent with no assets on disk.

use std::path::Path;

use tracing::{debug, warn};

use crate::config::PdfConfig;
use crate::domain::Assignment;
use crate::util::{escape_html, fill_template, Escape};

/// Marker placed between consecutive assignments.
pub const PAGE_BREAK: &str = r#"<div class="page-break"></div>"#;

const DOCUMENT_TPL: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{title}</title>
<style>
{styles}
</style>
</head>
<body>
{body}
</body>
</html>
"#;

const META_ROW_TPL: &str = r#"    <p><strong>{label}:</strong> {value}</p>
"#;

const LIST_ITEM_TPL: &str = "    <li>{item}</li>\n";

const EMPTY_NOTICE: &str = r#"<p class="empty-notice">No assignments to display.</p>"#;

const CLASSROOM_STYLES: &str = r#"@page { size: {page_size}; margin: 2cm; }
body { font-family: {font_family}, sans-serif; line-height: 1.6; color: #333; }
.assignment h1 { color: #2c3e50; border-bottom: 3px solid #3498db; padding-bottom: 10px; }
.assignment h2 { color: #34495e; border-left: 4px solid #3498db; padding-left: 15px; }
.metadata { background-color: #f8f9fa; padding: 15px; border-radius: 5px; margin: 20px 0; }
.metadata p { margin: 2px 0; }
ol.questions li { margin-bottom: 1.5em; }
.page-break { page-break-after: always; break-after: page; }
.empty-notice { font-style: italic; color: #777; }"#;

const PLAIN_STYLES: &str = r#"@page { size: {page_size}; margin: 2cm; }
body { font-family: {font_family}, sans-serif; margin: 20px; }
.assignment h1 { color: #333; border-bottom: 2px solid #ccc; }
.metadata { background: #f5f5f5; padding: 10px; margin: 10px 0; }
ol, ul { margin: 10px 0; }
.page-break { page-break-after: always; break-after: page; }"#;

pub struct Formatter {
  styles: String,
}

impl Formatter {
  /// Use the configured stylesheet if it can be read, otherwise the theme's built-in one.
  pub fn from_config(pdf: &PdfConfig) -> Self {
    let styles = load_stylesheet(&pdf.stylesheet).unwrap_or_else(|| builtin_styles(&pdf.theme, &pdf.font_family, &pdf.page_size));
    Self { styles }
  }

  pub fn with_styles(styles: impl Into<String>) -> Self {
    Self { styles: styles.into() }
  }

  #[cfg(test)]
  pub fn styles(&self) -> &str {
    &self.styles
  }

  /// One self-contained `<section>` for `a`. Absent optional fields produce no markup.
  pub fn format_assignment(&self, a: &Assignment) -> String {
    let mut html = String::from("<section class=\"assignment\">\n");
    html.push_str(&format!("  <h1>{}</h1>\n", escape_html(&a.title)));

    let difficulty = a.difficulty.to_string();
    let meta = [
      ("Grade Level", a.grade_level.as_deref()),
      ("Subject", Some(a.subject.as_str())),
      ("Difficulty", Some(difficulty.as_str())),
      ("Estimated Time", a.estimated_time.as_deref()),
    ];
    let rows: String = meta
      .iter()
      .filter_map(|(label, value)| value.filter(|v| !v.trim().is_empty()).map(|v| (label, v)))
      .map(|(label, value)| fill_template(META_ROW_TPL, &[("label", *label), ("value", value)], Escape::Html))
      .collect();
    if !rows.is_empty() {
      html.push_str("  <div class=\"metadata\">\n");
      html.push_str(&rows);
      html.push_str("  </div>\n");
    }

    if let Some(instructions) = a.instructions.as_deref().filter(|s| !s.trim().is_empty()) {
      html.push_str("  <h2>Instructions</h2>\n");
      html.push_str(&format!("  <p class=\"instructions\">{}</p>\n", escape_html(instructions)));
    }

    html.push_str("  <h2>Problems</h2>\n");
    html.push_str(&list("ol", "questions", &a.questions));

    if let Some(materials) = a.materials_needed.as_deref().filter(|m| !m.is_empty()) {
      html.push_str("  <h2>Materials Needed</h2>\n");
      html.push_str(&list("ul", "materials", materials));
    }
    if let Some(objectives) = a.learning_objectives.as_deref().filter(|o| !o.is_empty()) {
      html.push_str("  <h2>Learning Objectives</h2>\n");
      html.push_str(&list("ul", "objectives", objectives));
    }

    html.push_str("</section>");
    html
  }

  /// A complete HTML document for every assignment, with page breaks between them.
  pub fn format_packet(&self, assignments: &[Assignment]) -> String {
    let body = if assignments.is_empty() {
      EMPTY_NOTICE.to_string()
    } else {
      assignments
        .iter()
        .map(|a| self.format_assignment(a))
        .collect::<Vec<_>>()
        .join(&*format!("\n{PAGE_BREAK}\n"))
    };
    debug!(target: "homework_gen", assignments = assignments.len(), body_len = body.len(), "Formatted packet");
    self.document("Homework Packet", &body)
  }

  fn document(&self, title: &str, body: &str) -> String {
    let title = escape_html(title);
    fill_template(DOCUMENT_TPL, &[("title", title.as_str()), ("styles", self.styles.as_str()), ("body", body)], Escape::None)
  }
}

fn list(tag: &str, class: &str, items: &[String]) -> String {
  let mut out = format!("  <{tag} class=\"{class}\">\n");
  for item in items {
    out.push_str(&fill_template(LIST_ITEM_TPL, &[("item", item.as_str())], Escape::Html));
  }
  out.push_str(&format!("  </{tag}>\n"));
  out
}

/// Markdown rendition of one assignment, handy for review and plain-text output.
pub fn format_markdown(a: &Assignment) -> String {
  let mut md = format!("# {}\n\n", a.title);
  if let Some(grade) = &a.grade_level {
    md.push_str(&format!("**Grade Level:** {grade}  \n"));
  }
  md.push_str(&format!("**Subject:** {}  \n", a.subject));
  md.push_str(&format!("**Difficulty:** {}  \n", a.difficulty));
  if let Some(time) = &a.estimated_time {
    md.push_str(&format!("**Estimated Time:** {time}  \n"));
  }
  md.push('\n');

  if let Some(objectives) = a.learning_objectives.as_deref().filter(|o| !o.is_empty()) {
    md.push_str("## Learning Objectives\n\n");
    for objective in objectives {
      md.push_str(&format!("- {objective}\n"));
    }
    md.push('\n');
  }
  if let Some(instructions) = &a.instructions {
    md.push_str(&format!("## Instructions\n\n{instructions}\n\n"));
  }
  if let Some(materials) = a.materials_needed.as_deref().filter(|m| !m.is_empty()) {
    md.push_str("## Materials Needed\n\n");
    for material in materials {
      md.push_str(&format!("- {material}\n"));
    }
    md.push('\n');
  }

  md.push_str("## Problems\n\n");
  for (i, q) in a.questions.iter().enumerate() {
    md.push_str(&format!("{}. {q}\n", i + 1));
  }
  md
}

pub fn format_packet_markdown(assignments: &[Assignment]) -> String {
  if assignments.is_empty() {
    return "_No assignments to display._\n".into();
  }
  assignments.iter().map(format_markdown).collect::<Vec<_>>().join("\n---\n\n")
}

fn load_stylesheet(path: &Path) -> Option<String> {
  match std::fs::read_to_string(path) {
    Ok(css) => {
      debug!(target: "homework_gen", path = %path.display(), "Using stylesheet file");
      Some(css)
    }
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
    Err(e) => {
      warn!(target: "homework_gen", path = %path.display(), error = %e, "Could not read stylesheet; using built-in styles");
      None
    }
  }
}

/// Built-in stylesheet for `theme` ("classroom" or "plain").
pub fn builtin_styles(theme: &str, font_family: &str, page_size: &str) -> String {
  let tpl = match theme {
    "plain" => PLAIN_STYLES,
    "classroom" => CLASSROOM_STYLES,
    other => {
      warn!(target: "homework_gen", theme = %other, "Unknown PDF theme; using 'classroom'");
      CLASSROOM_STYLES
    }
  };
  fill_template(tpl, &[("font_family", font_family), ("page_size", page_size)], Escape::None)
}

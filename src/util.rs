//! Small utility helpers used across modules.

/// How substituted values are treated before they land in the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Escape {
  /// Values are inserted verbatim (prompt text).
  None,
  /// Values are HTML-escaped (markup).
  Html,
}

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values in a
/// single pass, so text inside an inserted value is never substituted again.
/// Unknown `{...}` spans (e.g. JSON braces) are left alone.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)], escape: Escape) -> String {
  let mut out = String::with_capacity(tpl.len());
  let mut rest = tpl;
  while let Some(open) = rest.find('{') {
    out.push_str(&rest[..open]);
    let after = &rest[open + 1..];
    let hit = after
      .find('}')
      .map(|close| &after[..close])
      .and_then(|key| pairs.iter().find(|(k, _)| *k == key));
    match hit {
      Some((key, value)) => {
        match escape {
          Escape::None => out.push_str(value),
          Escape::Html => out.push_str(&escape_html(value)),
        }
        rest = &after[key.len() + 1..];
      }
      None => {
        out.push('{');
        rest = after;
      }
    }
  }
  out.push_str(rest);
  out
}

/// Escape the five HTML-significant characters.
pub fn escape_html(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for ch in s.chars() {
    match ch {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      _ => out.push(ch),
    }
  }
  out
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.chars().count() <= max {
    s.to_string()
  } else {
    let head: String = s.chars().take(max).collect();
    format!("{}… ({} bytes total)", head, s.len())
  }
}

/// Turn a free-form topic into something usable inside a file name:
/// keep alphanumerics, spaces, `-` and `_`, replace spaces with `_`,
/// and cap the length at 30 characters.
pub fn safe_file_stem(topic: &str) -> String {
  let kept: String = topic
    .chars()
    .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
    .collect();
  kept.trim().replace(' ', "_").chars().take(30).collect()
}

//! HTML → PDF through an external layout engine (`weasyprint` or `wkhtmltopdf`).
//!
//! The engine is resolved per render, so a missing program surfaces as a
//! `RenderError` the caller can fall back from.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::config::PdfConfig;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
  #[error("could not create output directory {path}: {source}")]
  CreateDir { path: PathBuf, #[source] source: std::io::Error },

  #[error("no PDF engine found on PATH (install weasyprint or wkhtmltopdf)")]
  EngineNotFound,

  #[error("PDF engine '{engine}' not found: {source}")]
  EngineMissing { engine: String, #[source] source: which::Error },

  #[error("I/O error while rendering: {0}")]
  Io(#[from] std::io::Error),

  #[error("{engine} failed ({status}): {stderr}")]
  EngineFailed { engine: String, status: String, stderr: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
  WeasyPrint,
  Wkhtmltopdf,
}

impl EngineKind {
  const SEARCH_ORDER: [EngineKind; 2] = [EngineKind::WeasyPrint, EngineKind::Wkhtmltopdf];

  pub fn program(&self) -> &'static str {
    match self {
      EngineKind::WeasyPrint => "weasyprint",
      EngineKind::Wkhtmltopdf => "wkhtmltopdf",
    }
  }

  fn from_program(path: &Path) -> Self {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if stem.contains("wkhtmltopdf") {
      EngineKind::Wkhtmltopdf
    } else {
      EngineKind::WeasyPrint
    }
  }
}

/// A located engine binary and the command-line dialect it speaks.
#[derive(Clone, Debug)]
pub struct Engine {
  pub kind: EngineKind,
  pub path: PathBuf,
}

impl Engine {
  /// `configured` is a program name or path; `None` searches PATH in order.
  pub fn resolve(configured: Option<&str>) -> Result<Self, RenderError> {
    if let Some(name) = configured {
      let path = which::which(name).map_err(|source| RenderError::EngineMissing { engine: name.to_string(), source })?;
      return Ok(Self { kind: EngineKind::from_program(&path), path });
    }
    EngineKind::SEARCH_ORDER
      .iter()
      .find_map(|kind| which::which(kind.program()).ok().map(|path| Self { kind: *kind, path }))
      .ok_or(RenderError::EngineNotFound)
  }

  pub fn args(&self, input: &Path, output: &Path, stylesheet: Option<&Path>) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    match self.kind {
      EngineKind::WeasyPrint => {
        if let Some(css) = stylesheet {
          args.push("-s".into());
          args.push(css.display().to_string());
        }
      }
      EngineKind::Wkhtmltopdf => {
        args.push("--quiet".into());
        args.push("--enable-local-file-access".into());
        if let Some(css) = stylesheet {
          args.push("--user-style-sheet".into());
          args.push(css.display().to_string());
        }
      }
    }
    args.push(input.display().to_string());
    args.push(output.display().to_string());
    args
  }
}

pub struct PdfRenderer {
  engine: Option<String>,
  stylesheet: Option<PathBuf>,
}

impl PdfRenderer {
  /// The configured stylesheet is passed to the engine only when the file exists.
  pub fn new(pdf: &PdfConfig) -> Self {
    let stylesheet = Some(pdf.stylesheet.clone()).filter(|p| p.is_file());
    Self { engine: pdf.engine.clone(), stylesheet }
  }

  /// Write `markup` as a PDF at `destination`, creating parent directories.
  #[instrument(level = "info", skip(self, markup), fields(destination = %destination.display(), markup_len = markup.len()))]
  pub async fn render(&self, markup: &str, destination: &Path) -> Result<(), RenderError> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|source| RenderError::CreateDir { path: parent.to_path_buf(), source })?;
    }

    let engine = Engine::resolve(self.engine.as_deref())?;
    debug!(target: "homework_gen", engine = %engine.path.display(), kind = ?engine.kind, "Using PDF engine");

    let staging = tempfile::tempdir()?;
    let input = staging.path().join("packet.html");
    tokio::fs::write(&input, markup).await?;

    remove_if_present(destination).await?;

    let start = Instant::now();
    let output = Command::new(&engine.path)
      .args(engine.args(&input, destination, self.stylesheet.as_deref()))
      .stdin(Stdio::null())
      .output()
      .await?;

    if !output.status.success() {
      // Partial output must not outlive a failed render.
      if let Err(e) = remove_if_present(destination).await {
        warn!(target: "homework_gen", error = %e, "Could not remove partial PDF");
      }
      return Err(RenderError::EngineFailed {
        engine: engine.kind.program().to_string(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }
    if !destination.is_file() {
      return Err(RenderError::EngineFailed {
        engine: engine.kind.program().to_string(),
        status: output.status.to_string(),
        stderr: "engine produced no output file".into(),
      });
    }
    info!(target: "homework_gen", elapsed = ?start.elapsed(), "PDF rendered");
    Ok(())
  }
}

async fn remove_if_present(path: &Path) -> Result<(), RenderError> {
  match tokio::fs::remove_file(path).await {
    Ok(()) => {
      debug!(target: "homework_gen", path = %path.display(), "Removed previous output");
      Ok(())
    }
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e.into()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn engine(kind: EngineKind) -> Engine {
    Engine { kind, path: PathBuf::from(kind.program()) }
  }

  #[test]
  fn engine_argument_dialects() {
    let (i, o, css) = (Path::new("in.html"), Path::new("out.pdf"), Path::new("s.css"));
    assert_eq!(engine(EngineKind::WeasyPrint).args(i, o, Some(css)), vec!["-s", "s.css", "in.html", "out.pdf"]);
    assert_eq!(engine(EngineKind::WeasyPrint).args(i, o, None), vec!["in.html", "out.pdf"]);
    assert_eq!(
      engine(EngineKind::Wkhtmltopdf).args(i, o, Some(css)),
      vec!["--quiet", "--enable-local-file-access", "--user-style-sheet", "s.css", "in.html", "out.pdf"]
    );
  }

  #[test]
  fn engine_kind_follows_program_name() {
    assert_eq!(EngineKind::from_program(Path::new("/usr/local/bin/wkhtmltopdf")), EngineKind::Wkhtmltopdf);
    assert_eq!(EngineKind::from_program(Path::new("/opt/weasyprint")), EngineKind::WeasyPrint);
  }

  #[test]
  fn missing_configured_engine_is_reported() {
    let err = Engine::resolve(Some("definitely-not-a-pdf-engine-xyz")).unwrap_err();
    assert!(matches!(err, RenderError::EngineMissing { ref engine, .. } if engine == "definitely-not-a-pdf-engine-xyz"));
  }

  #[tokio::test]
  async fn uncreatable_directory_is_render_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, "not a directory").unwrap();

    let renderer = PdfRenderer::new(&PdfConfig::default());
    let err = renderer.render("<html></html>", &blocker.join("sub").join("out.pdf")).await.unwrap_err();
    assert!(matches!(err, RenderError::CreateDir { .. }));
  }

  #[cfg(unix)]
  fn fake_engine(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn renders_through_engine_and_creates_directories() {
    let bin = tempfile::tempdir().unwrap();
    // Copies the second-to-last argument (input) to the last (output).
    let script = fake_engine(bin.path(), "weasyprint", r#"for a in "$@"; do prev="$last"; last="$a"; done; cp "$prev" "$last""#);
    let out = tempfile::tempdir().unwrap();
    let destination = out.path().join("nested").join("packet.pdf");

    let pdf = PdfConfig { engine: Some(script.display().to_string()), ..PdfConfig::default() };
    PdfRenderer::new(&pdf).render("<html>hello</html>", &destination).await.unwrap();
    assert_eq!(std::fs::read_to_string(&destination).unwrap(), "<html>hello</html>");
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn stale_output_does_not_count_as_rendered() {
    let bin = tempfile::tempdir().unwrap();
    let script = fake_engine(bin.path(), "weasyprint", "exit 0");
    let out = tempfile::tempdir().unwrap();
    let destination = out.path().join("packet.pdf");
    std::fs::write(&destination, "pdf from an earlier run").unwrap();

    let pdf = PdfConfig { engine: Some(script.display().to_string()), ..PdfConfig::default() };
    let err = PdfRenderer::new(&pdf).render("<html></html>", &destination).await.unwrap_err();
    assert!(matches!(err, RenderError::EngineFailed { ref stderr, .. } if stderr == "engine produced no output file"));
    assert!(!destination.exists());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn partial_output_is_removed_on_failure() {
    let bin = tempfile::tempdir().unwrap();
    let script = fake_engine(bin.path(), "weasyprint", r#"for a in "$@"; do last="$a"; done; echo partial > "$last"; exit 1"#);
    let out = tempfile::tempdir().unwrap();
    let destination = out.path().join("packet.pdf");

    let pdf = PdfConfig { engine: Some(script.display().to_string()), ..PdfConfig::default() };
    let err = PdfRenderer::new(&pdf).render("<html></html>", &destination).await.unwrap_err();
    assert!(matches!(err, RenderError::EngineFailed { .. }));
    assert!(!destination.exists());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn engine_failure_carries_stderr() {
    let bin = tempfile::tempdir().unwrap();
    let script = fake_engine(bin.path(), "wkhtmltopdf", "echo 'bad markup' >&2; exit 3");
    let out = tempfile::tempdir().unwrap();

    let pdf = PdfConfig { engine: Some(script.display().to_string()), ..PdfConfig::default() };
    let err = PdfRenderer::new(&pdf).render("<html></html>", &out.path().join("x.pdf")).await.unwrap_err();
    match err {
      RenderError::EngineFailed { engine, stderr, .. } => {
        assert_eq!(engine, "wkhtmltopdf");
        assert_eq!(stderr, "bad markup");
      }
      other => panic!("unexpected {other:?}"),
    }
  }
}

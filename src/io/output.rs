use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::{OutputFormat, RunOptions};
use crate::error::{PipelineError, PipelineResult};

/// Lines considered when building the summary
const SUMMARY_SCAN_LINES: usize = 20;

/// Timestamp used in every result file name
pub fn file_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%d_%H%M%S").to_string()
}

pub fn ensure_dir(path: &Path) -> PipelineResult<()> {
    std::fs::create_dir_all(path).map_err(|e| PipelineError::io(path, e))
}

pub fn write_text(path: &Path, text: &str) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    std::fs::write(path, text).map_err(|e| PipelineError::io(path, e))
}

/// Write a value as pretty JSON, creating parent directories
pub fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> PipelineResult<()> {
    let mut data = serde_json::to_string_pretty(value)?;
    data.push('\n');
    write_text(path, &data)
}

/// Render the final paper (markdown) into the requested format
pub fn render_output(markdown: &str, format: OutputFormat) -> String {
    match format {
        OutputFormat::Markdown => markdown.to_string(),
        OutputFormat::Html => to_html(markdown),
        OutputFormat::Latex => to_latex(markdown),
    }
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 {
        return None;
    }
    Some((level.min(6), trimmed[level..].trim()))
}

fn to_html(markdown: &str) -> String {
    let mut out = String::from(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n<style>\nbody { font-family: Arial, sans-serif; line-height: 1.6; max-width: 800px; margin: 0 auto; padding: 20px; }\nh1, h2, h3 { color: #333; }\n</style>\n</head>\n<body>\n",
    );
    for line in markdown.lines() {
        if let Some((level, title)) = heading(line) {
            out.push_str(&format!("<h{level}>{}</h{level}>\n", escape_html(title)));
        } else if !line.trim().is_empty() {
            out.push_str(&format!("<p>{}</p>\n", escape_html(line.trim())));
        }
    }
    out.push_str("</body>\n</html>\n");
    out
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn to_latex(markdown: &str) -> String {
    let mut out = String::from(
        "\\documentclass{article}\n\\usepackage[utf8]{inputenc}\n\\usepackage{amsmath}\n\\usepackage{graphicx}\n\\begin{document}\n\n",
    );
    for line in markdown.lines() {
        match heading(line) {
            Some((level, title)) => {
                let command = match level {
                    1 => "section",
                    2 => "subsection",
                    _ => "subsubsection",
                };
                out.push_str(&format!("\\{}{{{}}}\n", command, escape_latex(title)));
            }
            None => {
                out.push_str(&escape_latex(line));
                out.push('\n');
            }
        }
    }
    out.push_str("\n\\end{document}\n");
    out
}

fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

/// Extractive summary: body lines from the top of the paper, capped at
/// `max_words` words
pub fn generate_summary(text: &str, max_words: usize) -> String {
    text.lines()
        .take(SUMMARY_SCAN_LINES)
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .flat_map(str::split_whitespace)
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Files written for a finished paper
#[derive(Debug, Clone, Serialize)]
pub struct FinalArtifacts {
    pub paper: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<PathBuf>,
}

/// Write `final_paper_<ts>.<ext>` and, when enabled, `summary_<ts>.txt`
pub fn write_final_outputs(
    final_text: &str,
    options: &RunOptions,
    timestamp: &str,
) -> PipelineResult<FinalArtifacts> {
    let paper = options.result_dir.join(format!(
        "final_paper_{}.{}",
        timestamp,
        options.output_format.extension()
    ));
    write_text(&paper, &render_output(final_text, options.output_format))?;
    info!("Final paper written to {:?}", paper);

    let summary = if options.generate_summary {
        let path = options.result_dir.join(format!("summary_{timestamp}.txt"));
        write_text(&path, &generate_summary(final_text, options.summary_length))?;
        Some(path)
    } else {
        None
    };

    Ok(FinalArtifacts { paper, summary })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_html_rendering_escapes() {
        let html = render_output("# Intro\n\na < b & c\n## Method", OutputFormat::Html);
        assert!(html.contains("<h1>Intro</h1>"));
        assert!(html.contains("<p>a &lt; b &amp; c</p>"));
        assert!(html.contains("<h2>Method</h2>"));
        assert!(html.ends_with("</html>\n"));
    }

    #[test]
    fn test_latex_rendering() {
        let tex = render_output("# Results\n50% of cases_x\n## Setup", OutputFormat::Latex);
        assert!(tex.starts_with("\\documentclass{article}"));
        assert!(tex.contains("\\section{Results}"));
        assert!(tex.contains("50\\% of cases\\_x"));
        assert!(tex.contains("\\subsection{Setup}"));
        assert!(tex.trim_end().ends_with("\\end{document}"));
    }

    #[test]
    fn test_markdown_is_passthrough() {
        assert_eq!(render_output("# A\nb", OutputFormat::Markdown), "# A\nb");
    }

    #[test]
    fn test_summary_skips_headings_and_caps_words() {
        let text = "# Title\nOne two three.\n\n## Part\nFour five six seven.";
        assert_eq!(generate_summary(text, 5), "One two three. Four five");
        assert_eq!(generate_summary(text, 100), "One two three. Four five six seven.");
    }

    #[test]
    fn test_write_final_outputs() {
        let dir = TempDir::new().unwrap();
        let options = RunOptions {
            result_dir: dir.path().join("out"),
            output_format: OutputFormat::Html,
            ..RunOptions::default()
        };

        let artifacts = write_final_outputs("# A\nbody", &options, "20250101_000000").unwrap();
        assert_eq!(
            artifacts.paper.file_name().unwrap(),
            "final_paper_20250101_000000.html"
        );
        let summary = std::fs::read_to_string(artifacts.summary.unwrap()).unwrap();
        assert_eq!(summary, "body");
    }
}

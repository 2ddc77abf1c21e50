use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the final paper is rendered to disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Html,
    Latex,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Html => "html",
            OutputFormat::Latex => "tex",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md" | "markdown" => Ok(OutputFormat::Markdown),
            "html" => Ok(OutputFormat::Html),
            "tex" | "latex" => Ok(OutputFormat::Latex),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// What EditPass2 does when the global-check feedback is not valid JSON
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackPolicy {
    /// Fail the stage (and the run) with a parse error
    #[default]
    Strict,
    /// Use the raw feedback text as a single issue
    Lenient,
}

/// Split post-processing limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitLimits {
    /// Sections shorter than this are logged as suspicious
    pub min_section_length: usize,
    /// Sections longer than this are truncated; `None` keeps everything
    pub max_section_length: Option<usize>,
}

impl Default for SplitLimits {
    fn default() -> Self {
        Self {
            min_section_length: 50,
            max_section_length: None,
        }
    }
}

/// Per-run switches that are not model hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Directory for cache, intermediate files, final records and logs
    pub result_dir: PathBuf,
    pub enable_caching: bool,
    pub enable_metrics: bool,
    pub save_intermediate: bool,
    pub output_format: OutputFormat,
    pub generate_summary: bool,
    /// Word budget for the summary file
    pub summary_length: usize,
    /// Directory with prompt template overrides
    pub prompt_dir: Option<PathBuf>,
    pub feedback_policy: FeedbackPolicy,
    pub split: SplitLimits,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            result_dir: PathBuf::from("sample"),
            enable_caching: true,
            enable_metrics: true,
            save_intermediate: true,
            output_format: OutputFormat::Markdown,
            generate_summary: true,
            summary_length: 500,
            prompt_dir: None,
            feedback_policy: FeedbackPolicy::Strict,
            split: SplitLimits::default(),
        }
    }
}

impl RunOptions {
    pub fn cache_dir(&self) -> PathBuf {
        self.result_dir.join("cache")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("latex".parse::<OutputFormat>().unwrap(), OutputFormat::Latex);
        assert_eq!("MD".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert!("pdf".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_cache_dir_under_result_dir() {
        let options = RunOptions::default();
        assert_eq!(options.cache_dir(), PathBuf::from("sample/cache"));
    }
}

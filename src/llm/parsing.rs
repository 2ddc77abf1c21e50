use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::SectionName;

/// Drop markdown code-fence lines (```` ``` ```` or ```` ```json ````) and trim
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Cross-section feedback returned by the global check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalFeedback {
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl GlobalFeedback {
    /// Parse the JSON document, tolerating surrounding code fences
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(&strip_code_fences(text))
    }

    /// Treat unstructured feedback as a single issue
    pub fn from_raw(text: &str) -> Self {
        let text = text.trim();
        Self {
            issues: if text.is_empty() {
                Vec::new()
            } else {
                vec![text.to_string()]
            },
            suggestions: Vec::new(),
        }
    }
}

/// Split an audit report into per-section feedback.
///
/// A line `## <criterion> | <Section>` opens a block for that section; the
/// block runs until the next such line or the next `# <criterion>` heading.
/// Feedback for a section named by several criteria is concatenated.
pub fn parse_section_feedback(report: &str) -> BTreeMap<SectionName, String> {
    let mut feedback: BTreeMap<SectionName, String> = BTreeMap::new();
    let mut current: Option<SectionName> = None;

    for line in report.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("##") && !trimmed.starts_with("###") && trimmed.contains('|') {
            current = trimmed
                .rsplit('|')
                .next()
                .and_then(SectionName::from_title);
            continue;
        }
        if trimmed.starts_with("# ") {
            current = None;
            continue;
        }
        if let Some(section) = current {
            let entry = feedback.entry(section).or_default();
            entry.push_str(line);
            entry.push('\n');
        }
    }

    feedback
        .into_iter()
        .map(|(section, text)| (section, text.trim().to_string()))
        .filter(|(_, text)| !text.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_global_feedback_parse() {
        let fb = GlobalFeedback::parse(
            "```json\n{\"issues\": [\"terms drift\"], \"suggestions\": [\"pick one\"]}\n```",
        )
        .unwrap();
        assert_eq!(fb.issues, vec!["terms drift"]);
        assert_eq!(fb.suggestions, vec!["pick one"]);

        let partial = GlobalFeedback::parse("{\"issues\": []}").unwrap();
        assert!(partial.suggestions.is_empty());

        assert!(GlobalFeedback::parse("The paper looks fine.").is_err());
    }

    #[test]
    fn test_from_raw() {
        assert_eq!(GlobalFeedback::from_raw("  looks fine ").issues, vec!["looks fine"]);
        assert!(GlobalFeedback::from_raw("   ").issues.is_empty());
    }

    #[test]
    fn test_section_feedback_blocks() {
        let report = "\
# BackgroundClarity
## BackgroundClarity | Introduction
Motivation is unclear.

## BackgroundClarity | Related Work
Missing comparison with X.

# Robustness
Preamble line with no section.
## Robustness | Method
Threat model is weak.

# Contribution
## Contribution | Introduction
Contributions are not listed.";

        let feedback = parse_section_feedback(report);
        assert_eq!(feedback.len(), 3);
        assert_eq!(
            feedback[&SectionName::Introduction],
            "Motivation is unclear.\n\nContributions are not listed."
        );
        assert_eq!(feedback[&SectionName::RelatedWork], "Missing comparison with X.");
        assert_eq!(feedback[&SectionName::Method], "Threat model is weak.");
    }

    #[test]
    fn test_unknown_section_is_ignored() {
        let feedback = parse_section_feedback("## Robustness | Experiments\nToo few runs.");
        assert!(feedback.is_empty());
    }
}

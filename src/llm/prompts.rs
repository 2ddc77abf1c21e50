use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::models::SectionName;

/// Build-stage template; `{INPUT}` receives the full paper text
const BUILD_TEMPLATE: &str = r#"You are analysing an academic paper. Focus only on its {SECTION_NAME} section.

Extract the structure of that section as a JSON object with these keys:
- "summary": one or two sentences
- "claims": list of the main claims, each quoted as closely as possible
- "evidence": list of the evidence offered for those claims, with citations kept verbatim
- "open_questions": list of anything the section leaves unresolved

If the paper has no {SECTION_NAME} section, return an empty object.
Respond with a single ```json fenced block and nothing else.

PAPER:
{INPUT}"#;

const AUDIT_TEMPLATE: &str = r#"You are reviewing a paper against the criterion "{SECTION_NAME}".
{CRITERION}

Sections under review:
{SECTION_TEXT}

Structured notes extracted from those sections:
{TREE_INFO}

For every section listed above, write a heading of the form
## {SECTION_NAME} | <Section>
followed by concrete feedback on what is weak, unclear or missing and how to fix it."#;

const EDIT_PASS1_TEMPLATE: &str = r#"Revise the {SECTION_NAME} section of an academic paper.

Reviewer feedback:
{FEEDBACK}

Original text:
{SECTION_TEXT}

Return only the revised section text, without a heading. Keep every factual claim and citation; improve clarity, structure and the handling of the feedback."#;

const GLOBAL_CHECK_TEMPLATE: &str = r#"Read the full revised paper below and check it for cross-section consistency: terminology, claims that contradict each other, contributions promised but not delivered, and gaps in the argument between sections.

{FULL_TEXT}

Respond with a single ```json fenced block of the form
{"issues": ["..."], "suggestions": ["..."]}"#;

const EDIT_PASS2_TEMPLATE: &str = r##"Produce the final version of the paper below, fixing the global issues listed.

Issues:
{ISSUES}

Suggestions:
{SUGGESTIONS}

Paper:
{ALL_SECTIONS}

Return the whole paper in Markdown, one "# <Section>" heading per section, in the same section order."##;

/// One of the per-section extraction prompts run by the build stage
#[derive(Debug, Clone)]
pub struct BuildPrompt {
    /// Block id written as `### <id>` in the build output
    pub id: String,
    pub section: SectionName,
    pub template: String,
}

/// A review criterion and the sections it looks at
#[derive(Debug, Clone)]
pub struct AuditCriterion {
    pub name: &'static str,
    pub sections: &'static [SectionName],
    pub template: String,
}

const CRITERIA: [(&str, &[SectionName], &str); 5] = [
    (
        "BackgroundClarity",
        &[SectionName::Introduction, SectionName::RelatedWork],
        "Is the background explained clearly enough for a non-specialist reader of the venue?",
    ),
    (
        "Contribution",
        &[
            SectionName::Introduction,
            SectionName::RelatedWork,
            SectionName::Method,
        ],
        "Are the contributions stated explicitly, and are they new relative to prior work?",
    ),
    (
        "GapValidation",
        &[SectionName::Introduction, SectionName::RelatedWork],
        "Is the research gap real, and is it supported by the discussion of existing work?",
    ),
    (
        "Lesson",
        &[SectionName::Discussion, SectionName::Conclusion],
        "Does the paper draw lessons that generalise beyond the specific system studied?",
    ),
    (
        "Robustness",
        &[SectionName::Method],
        "Is the method robust to the threats and failure cases a careful reader would raise?",
    ),
];

/// Every template the pipeline renders, in run order
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub build: Vec<BuildPrompt>,
    pub audit: Vec<AuditCriterion>,
    pub edit_pass1: String,
    pub global_check: String,
    pub edit_pass2: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptSet {
    pub fn builtin() -> Self {
        let build = SectionName::ALL
            .into_iter()
            .map(|section| BuildPrompt {
                id: section.key().to_string(),
                section,
                template: BUILD_TEMPLATE.replace("{SECTION_NAME}", section.as_str()),
            })
            .collect();

        let audit = CRITERIA
            .iter()
            .map(|&(name, sections, question)| AuditCriterion {
                name,
                sections,
                template: AUDIT_TEMPLATE.replace("{CRITERION}", question),
            })
            .collect();

        Self {
            build,
            audit,
            edit_pass1: EDIT_PASS1_TEMPLATE.to_string(),
            global_check: GLOBAL_CHECK_TEMPLATE.to_string(),
            edit_pass2: EDIT_PASS2_TEMPLATE.to_string(),
        }
    }

    /// Built-in templates, replaced by any matching file found in `dir`:
    /// `<id>_fill_prompt.txt`, `audit_<Criterion>.txt`, `edit_pass1.txt`,
    /// `global_check.txt`, `edit_pass2.txt`.
    pub fn load(dir: &Path) -> PipelineResult<Self> {
        if !dir.is_dir() {
            return Err(PipelineError::io(
                dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "prompt directory not found"),
            ));
        }

        let mut set = Self::builtin();
        for prompt in &mut set.build {
            if let Some(text) = read_override(dir, &format!("{}_fill_prompt.txt", prompt.id))? {
                prompt.template = text;
            }
        }
        for criterion in &mut set.audit {
            if let Some(text) = read_override(dir, &format!("audit_{}.txt", criterion.name))? {
                criterion.template = text;
            }
        }
        if let Some(text) = read_override(dir, "edit_pass1.txt")? {
            set.edit_pass1 = text;
        }
        if let Some(text) = read_override(dir, "global_check.txt")? {
            set.global_check = text;
        }
        if let Some(text) = read_override(dir, "edit_pass2.txt")? {
            set.edit_pass2 = text;
        }
        Ok(set)
    }
}

fn read_override(dir: &Path, name: &str) -> PipelineResult<Option<String>> {
    let path = dir.join(name);
    if !path.is_file() {
        return Ok(None);
    }
    debug!("Using prompt override {:?}", path);
    std::fs::read_to_string(&path)
        .map(Some)
        .map_err(|e| PipelineError::io(path, e))
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("valid regex"));

/// Substitute `{KEY}` placeholders in a single scan of the template, so text
/// inserted for one key is never rewritten by another. Unknown placeholders
/// are left as is.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            match vars.iter().find(|(key, _)| *key == &caps[1]) {
                Some((_, value)) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_builtin_covers_every_section() {
        let set = PromptSet::builtin();
        let ids: Vec<&str> = set.build.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "abstract",
                "introduction",
                "related_work",
                "background",
                "method",
                "discussion",
                "conclusion"
            ]
        );
        assert!(set.build.iter().all(|p| p.template.contains("{INPUT}")));
        assert_eq!(set.audit.len(), 5);
    }

    #[test]
    fn test_criterion_section_map() {
        let set = PromptSet::builtin();
        let robustness = set.audit.iter().find(|c| c.name == "Robustness").unwrap();
        assert_eq!(robustness.sections, &[SectionName::Method]);
        let lesson = set.audit.iter().find(|c| c.name == "Lesson").unwrap();
        assert_eq!(
            lesson.sections,
            &[SectionName::Discussion, SectionName::Conclusion]
        );
    }

    #[test]
    fn test_render_replaces_every_occurrence() {
        let out = render("{A} and {A} but {B}", &[("A", "x")]);
        assert_eq!(out, "x and x but {B}");
    }

    #[test]
    fn test_render_does_not_rewrite_inserted_text() {
        let out = render(
            "{SECTION_TEXT}|{FEEDBACK}",
            &[
                ("SECTION_TEXT", "We use {FEEDBACK} loops."),
                ("FEEDBACK", "tighten"),
            ],
        );
        assert_eq!(out, "We use {FEEDBACK} loops.|tighten");
    }

    #[test]
    fn test_render_leaves_json_braces_alone() {
        let out = render(&PromptSet::builtin().global_check, &[("FULL_TEXT", "paper")]);
        assert!(out.contains("paper"));
        assert!(out.contains(r#"{"issues": ["..."], "suggestions": ["..."]}"#));
    }

    #[test]
    fn test_edit_pass2_template_is_complete() {
        assert!(EDIT_PASS2_TEMPLATE.contains("{ALL_SECTIONS}"));
        assert!(EDIT_PASS2_TEMPLATE.ends_with(
            r##"one "# <Section>" heading per section, in the same section order."##
        ));
    }

    #[test]
    fn test_load_applies_overrides() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("method_fill_prompt.txt"), "METHOD {INPUT}").unwrap();
        std::fs::write(dir.path().join("global_check.txt"), "CHECK {FULL_TEXT}").unwrap();

        let set = PromptSet::load(dir.path()).unwrap();
        let method = set.build.iter().find(|p| p.id == "method").unwrap();
        assert_eq!(method.template, "METHOD {INPUT}");
        assert_eq!(set.global_check, "CHECK {FULL_TEXT}");
        assert_eq!(set.edit_pass2, EDIT_PASS2_TEMPLATE);
    }

    #[test]
    fn test_load_missing_dir_is_io_error() {
        let err = PromptSet::load(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}

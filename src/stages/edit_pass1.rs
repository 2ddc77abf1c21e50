use tracing::info;

use crate::config::{ModelParams, Stage};
use crate::error::PipelineResult;
use crate::llm::{parse_section_feedback, render, ChatBackend, ChatRequest, LlmGateway};
use crate::models::{RevisedSections, Sections};

/// Feedback used for sections the audit said nothing about
pub const NO_FEEDBACK: &str = "No major issues found.";

/// Execute the first edit pass: revise each non-empty section against the
/// audit feedback addressed to it.
pub async fn edit_pass1<B: ChatBackend>(
    gateway: &LlmGateway<B>,
    template: &str,
    sections: &Sections,
    audit_report: &str,
    params: &ModelParams,
) -> PipelineResult<RevisedSections> {
    let feedback = parse_section_feedback(audit_report);
    let mut revised = RevisedSections::new();

    for (section, text) in sections.non_empty() {
        let section_feedback = feedback.get(&section).map(String::as_str).unwrap_or(NO_FEEDBACK);
        info!(
            "EditPass1: revising {} ({} feedback)",
            section,
            if feedback.contains_key(&section) {
                "with"
            } else {
                "no"
            }
        );

        let request = ChatRequest {
            stage: Stage::EditPass1,
            label: section.as_str().to_string(),
            prompt: render(
                template,
                &[
                    ("SECTION_NAME", section.as_str()),
                    ("SECTION_TEXT", text),
                    ("FEEDBACK", section_feedback),
                ],
            ),
            params: params.clone(),
        };
        revised.insert(section, gateway.call(&request).await?);
    }

    Ok(revised)
}

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::assemble;
use crate::config::{FeedbackPolicy, ModelParams, Stage};
use crate::error::{PipelineError, PipelineResult};
use crate::llm::{render, ChatBackend, ChatRequest, GlobalFeedback, LlmGateway};
use crate::models::RevisedSections;

/// Final paper plus the feedback it was produced from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditPass2Output {
    pub final_text: String,
    pub feedback: GlobalFeedback,
}

/// Interpret global-check output under the given policy
pub fn interpret_feedback(raw: &str, policy: FeedbackPolicy) -> PipelineResult<GlobalFeedback> {
    match GlobalFeedback::parse(raw) {
        Ok(feedback) => Ok(feedback),
        Err(e) => match policy {
            FeedbackPolicy::Strict => Err(PipelineError::Parse {
                stage: Stage::EditPass2,
                message: format!("global check feedback is not valid JSON: {e}"),
            }),
            FeedbackPolicy::Lenient => {
                warn!("Global check feedback is not JSON ({}); using it as a single issue", e);
                Ok(GlobalFeedback::from_raw(raw))
            }
        },
    }
}

/// Execute the second edit pass: rewrite the whole paper against the
/// global issues and suggestions.
///
/// The feedback is interpreted before any call is made, so a strict-policy
/// parse failure costs no API call.
pub async fn edit_pass2<B: ChatBackend>(
    gateway: &LlmGateway<B>,
    template: &str,
    revised: &RevisedSections,
    global_feedback: &str,
    policy: FeedbackPolicy,
    params: &ModelParams,
) -> PipelineResult<EditPass2Output> {
    let feedback = interpret_feedback(global_feedback, policy)?;
    info!(
        "EditPass2: {} issue(s), {} suggestion(s)",
        feedback.issues.len(),
        feedback.suggestions.len()
    );

    let all_sections = assemble(revised, "#");
    let issues = feedback.issues.join("\n");
    let suggestions = feedback.suggestions.join("\n");

    let request = ChatRequest {
        stage: Stage::EditPass2,
        label: "final".to_string(),
        prompt: render(
            template,
            &[
                ("ALL_SECTIONS", all_sections.as_str()),
                ("ISSUES", issues.as_str()),
                ("SUGGESTIONS", suggestions.as_str()),
            ],
        ),
        params: params.clone(),
    };
    let final_text = gateway.call(&request).await?;

    Ok(EditPass2Output {
        final_text,
        feedback,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::llm::{MockBackend, RetryPolicy};
    use crate::models::SectionName;

    fn revised() -> RevisedSections {
        let mut revised = RevisedSections::new();
        revised.insert(SectionName::Introduction, "i".into());
        revised
    }

    #[tokio::test]
    async fn test_strict_policy_rejects_prose_without_calling() {
        let gateway = LlmGateway::new(MockBackend::new(), RetryPolicy::fixed(1, Duration::ZERO));
        let err = edit_pass2(
            &gateway,
            "{ALL_SECTIONS}",
            &revised(),
            "Looks consistent overall.",
            FeedbackPolicy::Strict,
            &ModelParams::default(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Parse {
                stage: Stage::EditPass2,
                ..
            }
        ));
        assert_eq!(gateway.backend().total_calls(), 0);
    }

    #[tokio::test]
    async fn test_lenient_policy_uses_raw_text() {
        let gateway = LlmGateway::new(MockBackend::new(), RetryPolicy::fixed(1, Duration::ZERO));
        let out = edit_pass2(
            &gateway,
            "{ISSUES}||{SUGGESTIONS}||{ALL_SECTIONS}",
            &revised(),
            "Looks consistent overall.",
            FeedbackPolicy::Lenient,
            &ModelParams::default(),
        )
        .await
        .unwrap();

        assert_eq!(out.feedback.issues, vec!["Looks consistent overall."]);
        assert_eq!(
            gateway.backend().prompts_for(Stage::EditPass2),
            vec!["Looks consistent overall.||||# Introduction\ni".to_string()]
        );
    }

    #[tokio::test]
    async fn test_fenced_feedback_is_accepted() {
        let gateway = LlmGateway::new(MockBackend::new(), RetryPolicy::fixed(1, Duration::ZERO));
        let out = edit_pass2(
            &gateway,
            "{ISSUES}",
            &revised(),
            "```json\n{\"issues\": [\"a\", \"b\"], \"suggestions\": [\"c\"]}\n```",
            FeedbackPolicy::Strict,
            &ModelParams::default(),
        )
        .await
        .unwrap();

        assert_eq!(out.feedback.issues.len(), 2);
        assert!(out.final_text.starts_with("# Revised Paper"));
        assert_eq!(gateway.backend().prompts_for(Stage::EditPass2), vec!["a\nb".to_string()]);
    }
}

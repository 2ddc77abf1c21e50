use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use super::{ChatBackend, ChatRequest, LlmError};
use crate::config::Stage;
use crate::models::SectionName;

/// Offline backend with deterministic, stage-shaped responses.
///
/// Used by `--mock` runs and by tests; it records every request it sees and
/// can be told to fail or stall for particular stages or prompt labels.
#[derive(Default)]
pub struct MockBackend {
    failing: HashSet<Stage>,
    responses: HashMap<Stage, String>,
    latency: HashMap<String, Duration>,
    calls: Mutex<Vec<ChatRequest>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call for `stage` fails with a transport error
    pub fn failing_on(mut self, stage: Stage) -> Self {
        self.failing.insert(stage);
        self
    }

    /// Fixed response for every call of `stage`
    pub fn responding(mut self, stage: Stage, response: impl Into<String>) -> Self {
        self.responses.insert(stage, response.into());
        self
    }

    /// Delay answers for prompts with this label
    pub fn with_latency(mut self, label: impl Into<String>, latency: Duration) -> Self {
        self.latency.insert(label.into(), latency);
        self
    }

    /// Requests seen so far, in arrival order
    pub fn calls(&self) -> Vec<(Stage, String)> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|r| (r.stage, r.label.clone()))
            .collect()
    }

    /// Rendered prompts sent for `stage`, in arrival order
    pub fn prompts_for(&self, stage: Stage) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|r| r.stage == stage)
            .map(|r| r.prompt.clone())
            .collect()
    }

    pub fn calls_for(&self, stage: Stage) -> usize {
        self.calls().iter().filter(|(s, _)| *s == stage).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls().len()
    }

    fn record(&self, request: &ChatRequest) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
    }

    fn answer(&self, request: &ChatRequest) -> Result<String, LlmError> {
        if self.failing.contains(&request.stage) {
            return Err(LlmError::Transport(format!(
                "mock failure for {} stage",
                request.stage
            )));
        }
        if let Some(response) = self.responses.get(&request.stage) {
            return Ok(response.clone());
        }

        match request.stage {
            Stage::Build => Ok(format!(
                "```json\n{{\"section\": \"{}\", \"summary\": \"Mock structured analysis\", \"key_points\": [\"point one\", \"point two\"]}}\n```",
                request.label
            )),
            Stage::Audit => Ok(mock_audit(&request.label, &request.prompt)),
            Stage::EditPass1 => Ok(format!(
                "Revised {} section with clearer structure and stronger evidence.",
                request.label
            )),
            Stage::GlobalCheck => Ok(
                "```json\n{\"issues\": [\"Terminology drifts between Introduction and Method\"], \"suggestions\": [\"Use one term for the core technique throughout\"]}\n```"
                    .to_string(),
            ),
            Stage::EditPass2 => Ok(
                "# Revised Paper\n\nThe paper has been revised for global consistency.".to_string(),
            ),
            Stage::Split | Stage::Fuse => Err(LlmError::Decode(format!(
                "{} stage does not call the model",
                request.stage
            ))),
        }
    }
}

/// One feedback block per `## <Section>` heading present in the prompt
fn mock_audit(criterion: &str, prompt: &str) -> String {
    let mut out = String::new();
    for line in prompt.lines() {
        let Some(section) = line.strip_prefix("## ").and_then(SectionName::from_title) else {
            continue;
        };
        out.push_str(&format!(
            "## {} | {}\nThe argument is clear but some evidence is missing.\n",
            criterion, section
        ));
    }
    if out.is_empty() {
        out.push_str("No major issues found.");
    }
    out
}

impl ChatBackend for MockBackend {
    fn complete(
        &self,
        request: &ChatRequest,
    ) -> impl Future<Output = Result<String, LlmError>> + Send {
        async move {
            self.record(request);
            if let Some(latency) = self.latency.get(&request.label) {
                tokio::time::sleep(*latency).await;
            }
            self.answer(request)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelParams;

    fn request(stage: Stage, label: &str, prompt: &str) -> ChatRequest {
        ChatRequest {
            stage,
            label: label.to_string(),
            prompt: prompt.to_string(),
            params: ModelParams::default(),
        }
    }

    #[tokio::test]
    async fn test_records_calls() {
        let mock = MockBackend::new();
        mock.complete(&request(Stage::Build, "method", "p")).await.unwrap();
        mock.complete(&request(Stage::GlobalCheck, "global", "p")).await.unwrap();

        assert_eq!(mock.total_calls(), 2);
        assert_eq!(mock.calls_for(Stage::Build), 1);
        assert_eq!(mock.calls()[1], (Stage::GlobalCheck, "global".to_string()));
    }

    #[tokio::test]
    async fn test_audit_echoes_section_headings() {
        let mock = MockBackend::new();
        let out = mock
            .complete(&request(
                Stage::Audit,
                "Lesson",
                "## Discussion\ntext\n\n## Conclusion\ntext",
            ))
            .await
            .unwrap();

        assert!(out.contains("## Lesson | Discussion"));
        assert!(out.contains("## Lesson | Conclusion"));
    }

    #[tokio::test]
    async fn test_failing_stage() {
        let mock = MockBackend::new().failing_on(Stage::Audit);
        let err = mock.complete(&request(Stage::Audit, "x", "")).await.unwrap_err();
        assert!(err.is_retryable());
    }
}

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::info;

use crate::config::{ModelParams, Stage};
use crate::error::PipelineResult;
use crate::llm::{render, BuildPrompt, ChatBackend, ChatRequest, LlmGateway};

/// How the build prompts are dispatched
#[derive(Debug, Clone, Copy)]
pub struct BuildConfig {
    pub parallel: bool,
    pub max_workers: usize,
}

/// Execute the build stage: one call per prompt, each fed the whole paper.
///
/// With `parallel` set, up to `max_workers` calls are in flight at once.
/// Responses are always joined in prompt order as `### <id>` blocks.
pub async fn build<B: ChatBackend>(
    gateway: &LlmGateway<B>,
    prompts: &[BuildPrompt],
    raw_text: &str,
    params: &ModelParams,
    config: BuildConfig,
) -> PipelineResult<String> {
    let requests: Vec<ChatRequest> = prompts
        .iter()
        .map(|prompt| ChatRequest {
            stage: Stage::Build,
            label: prompt.id.clone(),
            prompt: render(&prompt.template, &[("INPUT", raw_text)]),
            params: params.clone(),
        })
        .collect();

    let workers = config.max_workers.max(1);
    let responses: Vec<String> = if config.parallel && workers > 1 {
        info!(
            "Build: {} prompts across {} workers",
            requests.len(),
            workers
        );
        let calls: Vec<_> = requests.iter().map(|request| gateway.call(request)).collect();
        stream::iter(calls)
            .buffered(workers)
            .try_collect()
            .await?
    } else {
        info!("Build: {} prompts, sequential", requests.len());
        let mut responses = Vec::with_capacity(requests.len());
        for request in &requests {
            responses.push(gateway.call(request).await?);
        }
        responses
    };

    Ok(prompts
        .iter()
        .zip(responses)
        .map(|(prompt, response)| format!("### {}\n{}", prompt.id, response))
        .collect::<Vec<_>>()
        .join("\n\n"))
}

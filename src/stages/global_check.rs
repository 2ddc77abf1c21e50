use tracing::info;

use crate::config::{ModelParams, Stage};
use crate::error::PipelineResult;
use crate::llm::{render, ChatBackend, ChatRequest, LlmGateway};
use crate::models::{RevisedSections, SectionName};

/// Join revised sections in review order as `<marker> <Section>` blocks.
/// Sections missing from `revised` are left out.
pub fn assemble(revised: &RevisedSections, marker: &str) -> String {
    SectionName::REVIEW_ORDER
        .iter()
        .filter_map(|section| {
            revised
                .get(section)
                .map(|text| format!("{} {}\n{}", marker, section, text.trim()))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Execute the global check: a single consistency review over the whole
/// revised paper. Returns the raw feedback text.
pub async fn global_check<B: ChatBackend>(
    gateway: &LlmGateway<B>,
    template: &str,
    revised: &RevisedSections,
    params: &ModelParams,
) -> PipelineResult<String> {
    let full_text = assemble(revised, "##");
    info!("GlobalCheck: reviewing {} section(s)", revised.len());

    let request = ChatRequest {
        stage: Stage::GlobalCheck,
        label: "global".to_string(),
        prompt: render(template, &[("FULL_TEXT", full_text.as_str())]),
        params: params.clone(),
    };
    gateway.call(&request).await
}

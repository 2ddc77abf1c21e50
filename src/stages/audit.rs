use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::{ModelParams, Stage};
use crate::error::PipelineResult;
use crate::llm::{render, AuditCriterion, ChatBackend, ChatRequest, LlmGateway};
use crate::models::{FusedTree, Sections};

/// Execute the audit stage: one review call per criterion.
///
/// Each criterion sees only its mapped sections (as `## <Section>` blocks)
/// and the matching part of the fused tree. Criteria whose sections are all
/// empty are skipped. The report is the `# <criterion>` blocks joined in
/// criterion order.
pub async fn audit<B: ChatBackend>(
    gateway: &LlmGateway<B>,
    criteria: &[AuditCriterion],
    sections: &Sections,
    tree: &FusedTree,
    params: &ModelParams,
) -> PipelineResult<String> {
    let mut blocks = Vec::new();

    for criterion in criteria {
        let present: Vec<_> = criterion
            .sections
            .iter()
            .copied()
            .filter(|s| !sections.get(*s).is_empty())
            .collect();
        if present.is_empty() {
            info!("Audit: skipping {} (no content)", criterion.name);
            continue;
        }

        let section_text = present
            .iter()
            .map(|s| format!("## {}\n{}", s, sections.get(*s)))
            .collect::<Vec<_>>()
            .join("\n\n");

        let tree_info: Map<String, Value> = present
            .iter()
            .map(|s| {
                let node = tree
                    .get(s.key())
                    .map(|v| v.to_json())
                    .unwrap_or_else(|| Value::Object(Map::new()));
                (s.as_str().to_string(), node)
            })
            .collect();
        let tree_info = serde_json::to_string_pretty(&Value::Object(tree_info))?;

        let names: Vec<&str> = present.iter().map(|s| s.as_str()).collect();
        info!("Audit: {} ({})", criterion.name, names.join(", "));

        let request = ChatRequest {
            stage: Stage::Audit,
            label: criterion.name.to_string(),
            prompt: render(
                &criterion.template,
                &[
                    ("SECTION_TEXT", section_text.as_str()),
                    ("TREE_INFO", tree_info.as_str()),
                    ("SECTION_NAME", criterion.name),
                ],
            ),
            params: params.clone(),
        };
        let response = gateway.call(&request).await?;
        blocks.push(format!("# {}\n{}", criterion.name, response));
    }

    if blocks.is_empty() {
        warn!("Audit: no criterion had any section content");
    }
    Ok(blocks.join("\n\n"))
}

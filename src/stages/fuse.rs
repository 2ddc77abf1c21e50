use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::llm::strip_code_fences;
use crate::models::{FusedTree, TreeValue};

/// Block marker emitted by the build stage: a line `### <id>`
static MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^###\s+([A-Za-z_]+)\s*$").expect("valid regex"));

/// Parse the build output's `### <id>` blocks into a tree.
///
/// Each block runs to the next marker or end of text. Blocks whose body is
/// not valid JSON (after removing code fences) are skipped and logged; the
/// tree may end up with fewer keys than blocks.
pub fn fuse(build_output: &str) -> FusedTree {
    let markers: Vec<_> = MARKER.captures_iter(build_output).collect();
    let mut tree = FusedTree::default();

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(build_output.len());
        let block = strip_code_fences(&build_output[whole.end()..end]);
        let key = name.as_str().to_lowercase();

        match serde_json::from_str::<serde_json::Value>(&block) {
            Ok(value) => {
                debug!("Fused block {}", key);
                tree.insert(key, TreeValue::from(value));
            }
            Err(e) => {
                warn!("Skipping block {}: not valid JSON ({})", key, e);
            }
        }
    }

    tree
}

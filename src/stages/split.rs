use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::config::SplitLimits;
use crate::models::{SectionName, Sections};

/// Optional markdown hashes, optional numeric prefix (`2`, `2.3`, `2.3.`), title
static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:#{1,6}\s*)?(?:\d+(?:\.\d+)*\.?\s+)?(\S.*?)\s*$").expect("valid regex")
});

/// Section a line switches to, if the line is a recognized heading
pub fn heading_of(line: &str) -> Option<SectionName> {
    let title = HEADING.captures(line)?.get(1)?.as_str();
    SectionName::from_title(title)
}

/// Partition raw paper text into the allowed sections.
///
/// Non-blank, non-heading lines are trimmed and appended (space-joined) to the
/// current section. Lines before the first recognized heading go to
/// `preamble`, never into a section. Headings for sections outside the
/// allow-list are not headings and stay in the current section's text,
/// numbered or not:
///
/// ```
/// use treellm::models::SectionName;
/// use treellm::stages::split;
///
/// let sections = split("# 3 Method\nSetup.\n4 Experiments\nRuns.");
/// assert_eq!(sections.get(SectionName::Method), "Setup. 4 Experiments Runs.");
/// ```
pub fn split(raw_text: &str) -> Sections {
    let mut sections = Sections::default();
    let mut current: Option<SectionName> = None;
    let mut preamble: Vec<&str> = Vec::new();

    for line in raw_text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(section) = heading_of(trimmed) {
            debug!("Heading {:?} -> {}", trimmed, section);
            current = Some(section);
            continue;
        }
        match current {
            Some(section) => sections.append(section, trimmed),
            None => preamble.push(trimmed),
        }
    }

    if !preamble.is_empty() {
        debug!("Kept {} pre-heading line(s) as preamble", preamble.len());
    }
    sections.preamble = preamble.join(" ");
    sections
}

/// Warn about short sections and truncate long ones. Returns the sections
/// that fell under the minimum length.
pub fn apply_limits(sections: &mut Sections, limits: &SplitLimits) -> Vec<SectionName> {
    let mut short = Vec::new();

    for name in SectionName::ALL {
        let text = sections.get(name);
        if text.is_empty() {
            continue;
        }

        let len = text.chars().count();
        if len < limits.min_section_length {
            warn!(
                "Section {} is only {} characters (minimum {})",
                name, len, limits.min_section_length
            );
            short.push(name);
        }

        if let Some(max) = limits.max_section_length {
            if len > max {
                warn!("Section {} truncated from {} to {} characters", name, len, max);
                let truncated: String = text.chars().take(max).collect();
                sections.set(name, truncated);
            }
        }
    }

    short
}

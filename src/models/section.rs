use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Allowed section labels, in canonical paper order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SectionName {
    Abstract,
    Introduction,
    #[serde(rename = "Related Work")]
    RelatedWork,
    Background,
    Method,
    Discussion,
    Conclusion,
}

impl SectionName {
    pub const ALL: [SectionName; 7] = [
        SectionName::Abstract,
        SectionName::Introduction,
        SectionName::RelatedWork,
        SectionName::Background,
        SectionName::Method,
        SectionName::Discussion,
        SectionName::Conclusion,
    ];

    /// Order used when the whole paper is reassembled for review
    pub const REVIEW_ORDER: [SectionName; 7] = [
        SectionName::Abstract,
        SectionName::Introduction,
        SectionName::Background,
        SectionName::RelatedWork,
        SectionName::Method,
        SectionName::Discussion,
        SectionName::Conclusion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SectionName::Abstract => "Abstract",
            SectionName::Introduction => "Introduction",
            SectionName::RelatedWork => "Related Work",
            SectionName::Background => "Background",
            SectionName::Method => "Method",
            SectionName::Discussion => "Discussion",
            SectionName::Conclusion => "Conclusion",
        }
    }

    /// Key used for this section in the fused tree and build prompt ids
    pub fn key(self) -> &'static str {
        match self {
            SectionName::Abstract => "abstract",
            SectionName::Introduction => "introduction",
            SectionName::RelatedWork => "related_work",
            SectionName::Background => "background",
            SectionName::Method => "method",
            SectionName::Discussion => "discussion",
            SectionName::Conclusion => "conclusion",
        }
    }

    /// Match a heading title (case-insensitive, plural and alias forms accepted)
    pub fn from_title(title: &str) -> Option<SectionName> {
        let normalized = title
            .trim()
            .trim_end_matches([':', '.'])
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        match normalized.as_str() {
            "abstract" => Some(SectionName::Abstract),
            "introduction" => Some(SectionName::Introduction),
            "related work" | "related works" | "related_work" => Some(SectionName::RelatedWork),
            "background" => Some(SectionName::Background),
            "method" | "methods" | "methodology" => Some(SectionName::Method),
            "discussion" => Some(SectionName::Discussion),
            "conclusion" | "conclusions" => Some(SectionName::Conclusion),
            _ => None,
        }
    }
}

impl fmt::Display for SectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of splitting a paper: one entry per allowed section (possibly
/// empty) plus whatever text preceded the first recognized heading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sections {
    entries: BTreeMap<SectionName, String>,
    /// Content before the first heading. Never routed into a section.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub preamble: String,
}

impl Default for Sections {
    fn default() -> Self {
        Self {
            entries: SectionName::ALL
                .into_iter()
                .map(|name| (name, String::new()))
                .collect(),
            preamble: String::new(),
        }
    }
}

impl Sections {
    pub fn get(&self, name: SectionName) -> &str {
        self.entries.get(&name).map(String::as_str).unwrap_or("")
    }

    /// Append space-joined text to a section
    pub fn append(&mut self, name: SectionName, text: &str) {
        let entry = self.entries.entry(name).or_default();
        if !entry.is_empty() {
            entry.push(' ');
        }
        entry.push_str(text);
    }

    pub fn set(&mut self, name: SectionName, text: String) {
        self.entries.insert(name, text);
    }

    /// All sections in canonical order, including empty ones
    pub fn iter(&self) -> impl Iterator<Item = (SectionName, &str)> {
        SectionName::ALL.into_iter().map(|name| (name, self.get(name)))
    }

    /// Sections with content, in canonical order
    pub fn non_empty(&self) -> impl Iterator<Item = (SectionName, &str)> {
        self.iter().filter(|(_, text)| !text.is_empty())
    }

    pub fn non_empty_count(&self) -> usize {
        self.non_empty().count()
    }

    pub fn is_empty(&self) -> bool {
        self.non_empty_count() == 0
    }
}

/// Section-level text produced by the first edit pass
pub type RevisedSections = BTreeMap<SectionName, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_aliases() {
        assert_eq!(SectionName::from_title("METHODS"), Some(SectionName::Method));
        assert_eq!(SectionName::from_title("Related  Work:"), Some(SectionName::RelatedWork));
        assert_eq!(SectionName::from_title("Conclusions."), Some(SectionName::Conclusion));
        assert_eq!(SectionName::from_title("Experiments"), None);
    }

    #[test]
    fn test_default_has_every_section() {
        let sections = Sections::default();
        assert_eq!(sections.iter().count(), 7);
        assert!(sections.is_empty());
    }

    #[test]
    fn test_serializes_with_display_names() {
        let mut sections = Sections::default();
        sections.append(SectionName::RelatedWork, "prior art");
        let value = serde_json::to_value(&sections).unwrap();
        assert_eq!(value["entries"]["Related Work"], "prior art");
        assert!(value.get("preamble").is_none());

        let back: Sections = serde_json::from_value(value).unwrap();
        assert_eq!(back, sections);
    }
}

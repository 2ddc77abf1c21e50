//! Heuristic quality scores.
//!
//! Every score here is an approximation computed from keyword counts and
//! simple structure checks over stage outputs. They are advisory: nothing in
//! the pipeline branches on them beyond logging a warning.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::models::{FusedTree, SectionName, Sections};

const ACCURACY_WEIGHT: f64 = 0.4;
const COMPLETENESS_WEIGHT: f64 = 0.35;
const CONSISTENCY_WEIGHT: f64 = 0.25;

const POSITIVE_AUDIT: &[&str] = &["good", "strong", "clear", "valid", "sound"];
const NEGATIVE_AUDIT: &[&str] = &["weak", "unclear", "missing", "insufficient", "poor"];
const COHERENT: &[&str] = &["consistent", "aligned", "coherent", "unified", "integrated"];
const INCOHERENT: &[&str] = &["inconsistent", "contradictory", "misaligned", "fragmented"];

/// Score returned by `audit_score` when no keyword is present
pub const NEUTRAL_AUDIT_SCORE: f64 = 0.5;
/// Score returned by `coherence_score` when no keyword is present
pub const NEUTRAL_COHERENCE_SCORE: f64 = 0.7;

static CITATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\d+(?:\s*[,-]\s*\d+)*\]|\([A-Z][A-Za-z-]+(?: et al\.)?,? \d{4}\)")
        .expect("valid regex")
});

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccuracyScores {
    pub factual_correctness: f64,
    pub quote_accuracy: f64,
    pub structure_preservation: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompletenessScores {
    pub section_coverage: f64,
    pub detail_depth: f64,
    pub citation_capture: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsistencyScores {
    pub cross_section_alignment: f64,
    pub terminology_consistency: f64,
    pub format_adherence: f64,
}

/// Quality scores accumulated as stages complete; all values in [0, 1]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub accuracy: AccuracyScores,
    pub completeness: CompletenessScores,
    pub consistency: ConsistencyScores,
    pub overall_score: f64,
}

impl QualityMetrics {
    pub fn observe_split(&mut self, sections: &Sections) {
        self.completeness.section_coverage =
            ratio(sections.non_empty_count(), SectionName::ALL.len());
        self.refresh();
    }

    pub fn observe_build(&mut self, build_output: &str) {
        self.accuracy.quote_accuracy = ratio(build_output.matches('"').count(), 20);
        self.completeness.citation_capture = ratio(CITATION.find_iter(build_output).count(), 10);
        self.refresh();
    }

    /// `expected` is the number of blocks the build stage produced
    pub fn observe_fuse(&mut self, tree: &FusedTree, expected: usize) {
        self.accuracy.structure_preservation = ratio(tree.len(), expected);
        let leaves: usize = tree.sections.values().map(|v| v.leaf_count()).sum();
        let per_section = if tree.is_empty() {
            0
        } else {
            leaves / tree.len()
        };
        self.completeness.detail_depth = ratio(per_section, 10);
        self.refresh();
    }

    pub fn observe_audit(&mut self, report: &str) {
        self.accuracy.factual_correctness = audit_score(report);
        self.refresh();
    }

    pub fn observe_global_check(&mut self, feedback: &str) {
        self.consistency.cross_section_alignment = coherence_score(feedback);
        self.refresh();
    }

    /// `issues` is the number of global issues EditPass2 was asked to fix;
    /// `sections` the sections that went into it
    pub fn observe_final(&mut self, final_output: &str, issues: usize, sections: &[SectionName]) {
        self.consistency.terminology_consistency = 1.0 / (1.0 + issues as f64);

        let headings: HashSet<SectionName> = final_output
            .lines()
            .filter_map(|line| {
                let title = line.trim_start().strip_prefix('#')?;
                SectionName::from_title(title.trim_start_matches('#'))
            })
            .collect();
        self.consistency.format_adherence = if sections.is_empty() {
            1.0
        } else {
            ratio(
                sections.iter().filter(|s| headings.contains(s)).count(),
                sections.len(),
            )
        };
        self.refresh();
    }

    /// Weighted mean: accuracy 0.4, completeness 0.35, consistency 0.25
    pub fn overall(&self) -> f64 {
        let a = &self.accuracy;
        let c = &self.completeness;
        let k = &self.consistency;
        let accuracy = (a.factual_correctness + a.quote_accuracy + a.structure_preservation) / 3.0;
        let completeness = (c.section_coverage + c.detail_depth + c.citation_capture) / 3.0;
        let consistency =
            (k.cross_section_alignment + k.terminology_consistency + k.format_adherence) / 3.0;
        accuracy * ACCURACY_WEIGHT + completeness * COMPLETENESS_WEIGHT + consistency * CONSISTENCY_WEIGHT
    }

    fn refresh(&mut self) {
        self.overall_score = self.overall();
    }
}

/// Share of positive review keywords among all review keywords present
pub fn audit_score(report: &str) -> f64 {
    keyword_balance(report, POSITIVE_AUDIT, NEGATIVE_AUDIT).unwrap_or(NEUTRAL_AUDIT_SCORE)
}

/// Share of coherence keywords among coherence and incoherence keywords present
pub fn coherence_score(feedback: &str) -> f64 {
    keyword_balance(feedback, COHERENT, INCOHERENT).unwrap_or(NEUTRAL_COHERENCE_SCORE)
}

fn keyword_balance(text: &str, positive: &[&str], negative: &[&str]) -> Option<f64> {
    let lower = text.to_lowercase();
    let words: HashSet<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let pos = positive.iter().filter(|k| words.contains(*k)).count();
    let neg = negative.iter().filter(|k| words.contains(*k)).count();
    if pos + neg == 0 {
        None
    } else {
        Some(pos as f64 / (pos + neg) as f64)
    }
}

fn ratio(count: usize, of: usize) -> f64 {
    if of == 0 {
        return 0.0;
    }
    (count as f64 / of as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::TreeValue;

    #[test]
    fn test_audit_score_counts_whole_words() {
        assert_eq!(audit_score("nothing to report"), NEUTRAL_AUDIT_SCORE);
        // "unclear" must not also count as "clear"
        assert_eq!(audit_score("The motivation is unclear."), 0.0);
        assert_eq!(audit_score("Clear and strong, but evidence is missing."), 2.0 / 3.0);
    }

    #[test]
    fn test_coherence_score() {
        assert_eq!(coherence_score(""), NEUTRAL_COHERENCE_SCORE);
        assert_eq!(coherence_score("Terminology is inconsistent."), 0.0);
        assert_eq!(coherence_score("Sections are consistent and aligned."), 1.0);
    }

    #[test]
    fn test_split_and_fuse_observations() {
        let mut sections = Sections::default();
        sections.append(SectionName::Introduction, "a");
        sections.append(SectionName::Method, "b");

        let mut tree = FusedTree::default();
        tree.insert("introduction".into(), TreeValue::from(json!({"claim": "x"})));

        let mut metrics = QualityMetrics::default();
        metrics.observe_split(&sections);
        metrics.observe_fuse(&tree, 2);

        assert!((metrics.completeness.section_coverage - 2.0 / 7.0).abs() < 1e-9);
        assert_eq!(metrics.accuracy.structure_preservation, 0.5);
        assert_eq!(metrics.completeness.detail_depth, 0.1);
        assert!(metrics.overall_score > 0.0 && metrics.overall_score <= 1.0);
    }

    #[test]
    fn test_final_format_adherence() {
        let mut metrics = QualityMetrics::default();
        metrics.observe_final(
            "# Introduction\ntext\n\n## Method\ntext",
            1,
            &[SectionName::Introduction, SectionName::Method, SectionName::Conclusion],
        );
        assert!((metrics.consistency.format_adherence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(metrics.consistency.terminology_consistency, 0.5);
    }

    #[test]
    fn test_scores_stay_in_unit_interval() {
        let mut metrics = QualityMetrics::default();
        metrics.observe_build(&"\"[1]\" ".repeat(100));
        metrics.observe_audit("good strong clear valid sound");
        metrics.observe_global_check("consistent");
        assert_eq!(metrics.accuracy.quote_accuracy, 1.0);
        assert_eq!(metrics.completeness.citation_capture, 1.0);
        assert!(metrics.overall() <= 1.0);
    }
}

/*!
 * Cohort fingerprints
 *
 * A cohort is a named group of roots sharing a linguistic or cultural
 * fingerprint, expressed as an ordered list of regular expressions. The
 * main registry labels roots; a second, lower-confidence discovery
 * table runs only over roots the main registry left unlabeled and
 * proposes new cohorts once enough distinct roots match.
 */

use std::collections::BTreeMap;

use regex::Regex;
use tracing::warn;

use crate::config::CohortFingerprint;
use crate::error::{Result, SluiceError};

/// Default matched-root threshold for discovery fingerprints that do
/// not configure their own
const DEFAULT_DISCOVERY_THRESHOLD: usize = 10;

/// One compiled fingerprint
#[derive(Debug)]
struct CompiledFingerprint {
    label: String,
    patterns: Vec<Regex>,
    min_match: Option<usize>,
}

impl CompiledFingerprint {
    fn matches(&self, root: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(root))
    }
}

/// Compiled, ordered fingerprint table
#[derive(Debug, Default)]
pub struct CohortRegistry {
    fingerprints: Vec<CompiledFingerprint>,
}

impl CohortRegistry {
    /// Compile a fingerprint table from configuration. Invalid
    /// patterns are configuration errors.
    pub fn compile(fingerprints: &[CohortFingerprint]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(fingerprints.len());
        for fp in fingerprints {
            let mut patterns = Vec::with_capacity(fp.patterns.len());
            for pattern in &fp.patterns {
                let regex = Regex::new(pattern).map_err(|e| {
                    SluiceError::Config(format!(
                        "cohort '{}' pattern '{}' does not compile: {}",
                        fp.label, pattern, e
                    ))
                })?;
                patterns.push(regex);
            }
            if patterns.is_empty() {
                warn!(cohort = %fp.label, "fingerprint has no patterns; it will never match");
            }
            compiled.push(CompiledFingerprint {
                label: fp.label.clone(),
                patterns,
                min_match: fp.min_match,
            });
        }
        Ok(Self {
            fingerprints: compiled,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Every cohort label matching a root, in registry order
    pub fn classify(&self, root: &str) -> Vec<String> {
        self.fingerprints
            .iter()
            .filter(|fp| fp.matches(root))
            .map(|fp| fp.label.clone())
            .collect()
    }
}

/// A proposed new cohort from the discovery table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryCandidate {
    pub label: String,
    /// Distinct unclassified roots that matched
    pub matched_roots: usize,
    /// Up to five sample roots
    pub samples: Vec<String>,
}

/// Run the discovery table over roots the main registry left
/// unclassified. A candidate fires when its matched-root count exceeds
/// the fingerprint's threshold. Candidates are reported, never
/// auto-applied.
pub fn discover_cohorts(
    registry: &CohortRegistry,
    unclassified_roots: &[String],
) -> Vec<DiscoveryCandidate> {
    let mut matches: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for root in unclassified_roots {
        for fp in &registry.fingerprints {
            if fp.matches(root) {
                matches.entry(fp.label.clone()).or_default().push(root.clone());
            }
        }
    }

    let mut candidates = Vec::new();
    for fp in &registry.fingerprints {
        let Some(matched) = matches.get(&fp.label) else {
            continue;
        };
        let threshold = fp.min_match.unwrap_or(DEFAULT_DISCOVERY_THRESHOLD);
        if matched.len() > threshold {
            candidates.push(DiscoveryCandidate {
                label: fp.label.clone(),
                matched_roots: matched.len(),
                samples: matched.iter().take(5).cloned().collect(),
            });
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(label: &str, patterns: &[&str], min_match: Option<usize>) -> CohortFingerprint {
        CohortFingerprint {
            label: label.to_string(),
            description: String::new(),
            patterns: patterns.iter().map(|s| s.to_string()).collect(),
            min_match,
        }
    }

    #[test]
    fn test_classify_labels_all_matches() {
        let registry = CohortRegistry::compile(&[
            fingerprint("turkish", &["^furkan$", "^elif$"], None),
            fingerprint("compound-word", &["^(dragon|fire|master)\\w{4,}$"], None),
        ])
        .unwrap();

        assert_eq!(registry.classify("furkan"), vec!["turkish"]);
        assert_eq!(registry.classify("minecraft"), Vec::<String>::new());
        assert_eq!(registry.classify("dragonmaster"), vec!["compound-word"]);
    }

    #[test]
    fn test_classify_multiple_cohorts() {
        let registry = CohortRegistry::compile(&[
            fingerprint("short", &["^\\w{3,5}$"], None),
            fingerprint("vowel-heavy", &["^[aeiou]+\\w*$"], None),
        ])
        .unwrap();

        let labels = registry.classify("aysel");
        assert_eq!(labels, vec!["short", "vowel-heavy"]);
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let err = CohortRegistry::compile(&[fingerprint("broken", &["["], None)]).unwrap_err();
        assert!(matches!(err, SluiceError::Config(_)));
    }

    #[test]
    fn test_discovery_fires_above_threshold() {
        let registry = CohortRegistry::compile(&[fingerprint(
            "ends-in-dottir",
            &["dottir$"],
            Some(2),
        )])
        .unwrap();

        let roots: Vec<String> = ["annadottir", "svanadottir", "gunnarsdottir", "larsson"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let candidates = discover_cohorts(&registry, &roots);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].label, "ends-in-dottir");
        assert_eq!(candidates[0].matched_roots, 3);

        // Below threshold nothing fires
        let few: Vec<String> = vec!["annadottir".to_string()];
        assert!(discover_cohorts(&registry, &few).is_empty());
    }
}

/*!
 * Plaintext analyzer
 *
 * Turns recovered plaintexts into knowledge: separates structured
 * passwords from high-entropy noise, extracts and screens roots, tags
 * transformation patterns, and labels roots with cohort fingerprints.
 * Everything here feeds the feedback emitter, which turns the output
 * into new attack assets.
 */

pub mod cohorts;
pub mod entropy;
pub mod patterns;
pub mod roots;

pub use cohorts::{discover_cohorts, CohortRegistry, DiscoveryCandidate};
pub use patterns::PatternCounts;

use std::collections::BTreeMap;

use tracing::info;

use crate::config::AnalyzerConfig;
use crate::distribute::CrackedRecord;
use crate::error::Result;

/// Cap on stored example passwords per root
const MAX_EXAMPLES: usize = 5;

/// Accumulated knowledge about one root
#[derive(Debug, Clone)]
pub struct RootInfo {
    pub root: String,
    /// Passwords that reduced to this root
    pub count: usize,
    /// Up to five example passwords
    pub examples: Vec<String>,
    /// Labels from the main cohort registry
    pub cohorts: Vec<String>,
}

/// Full analysis of one plaintext corpus
#[derive(Debug, Default)]
pub struct AnalysisReport {
    /// Passwords below the entropy threshold
    pub structured: usize,
    /// Passwords treated as random (entropy above threshold)
    pub random: usize,
    /// Accepted roots keyed by root string
    pub roots: BTreeMap<String, RootInfo>,
    /// Corpus-wide transformation pattern counts
    pub patterns: PatternCounts,
    /// Proposed new cohorts from the discovery table
    pub discovery_candidates: Vec<DiscoveryCandidate>,
}

impl AnalysisReport {
    /// Roots carrying a given cohort label
    pub fn roots_in_cohort(&self, label: &str) -> Vec<&RootInfo> {
        self.roots
            .values()
            .filter(|info| info.cohorts.iter().any(|c| c == label))
            .collect()
    }
}

/// Classifier over recovered plaintexts
pub struct Analyzer {
    config: AnalyzerConfig,
    cohorts: CohortRegistry,
    discovery: CohortRegistry,
}

impl Analyzer {
    pub fn from_config(config: &AnalyzerConfig) -> Result<Self> {
        Ok(Self {
            cohorts: CohortRegistry::compile(&config.cohorts)?,
            discovery: CohortRegistry::compile(&config.discovery)?,
            config: config.clone(),
        })
    }

    /// Analyze a corpus of recovered pairs
    pub fn analyze(&self, records: &[CrackedRecord]) -> AnalysisReport {
        let mut report = AnalysisReport::default();

        for record in records {
            let plain = record.plain.as_str();
            if plain.is_empty() {
                continue;
            }

            let whole_entropy = entropy::shannon_entropy(plain);
            if whole_entropy > self.config.entropy_threshold {
                report.random += 1;
            } else {
                report.structured += 1;
            }

            report.patterns.observe(plain);

            // Random-looking passwords still get a root attempt; the
            // acceptance screens re-test the root on its own merits
            let affixes = roots::split_affixes(plain);
            if roots::accept_root(&affixes.core, &self.config).is_err() {
                continue;
            }
            let root = affixes.core;

            let entry = report
                .roots
                .entry(root.clone())
                .or_insert_with(|| RootInfo {
                    cohorts: self.cohorts.classify(&root),
                    root: root.clone(),
                    count: 0,
                    examples: Vec::new(),
                });
            entry.count += 1;
            if entry.examples.len() < MAX_EXAMPLES && !entry.examples.iter().any(|e| e == plain)
            {
                entry.examples.push(plain.to_string());
            }
        }

        if !self.discovery.is_empty() {
            let unclassified: Vec<String> = report
                .roots
                .values()
                .filter(|info| info.cohorts.is_empty())
                .map(|info| info.root.clone())
                .collect();
            report.discovery_candidates = discover_cohorts(&self.discovery, &unclassified);
        }

        info!(
            structured = report.structured,
            random = report.random,
            roots = report.roots.len(),
            discovery_candidates = report.discovery_candidates.len(),
            "analyzed plaintext corpus"
        );
        report
    }
}

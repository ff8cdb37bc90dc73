/*!
 * Feedback emitter
 *
 * Persists what the analyzer learned and turns it into attack assets
 * for the next iteration: the monotonically-growing accumulated-roots
 * file, the composite wordlist, per-cohort wordlist growth, and a
 * derived rules file filtered against a baseline ruleset. A
 * hand-authored rule block below the marker comment survives every
 * rewrite verbatim.
 */

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::analyze::AnalysisReport;
use crate::config::FeedbackConfig;
use crate::error::{Result, SluiceError};
use crate::state::AttackResult;

/// Marker introducing the preserved hand-authored rule block
pub const HAND_AUTHORED_MARKER: &str = "# === hand-authored rules (kept verbatim) ===";

/// Fixed year-append rules always offered to the next iteration
const RECENT_YEARS: std::ops::RangeInclusive<u32> = 2019..=2026;

/// Per-cohort growth result
#[derive(Debug, Clone, Default)]
pub struct CohortGrowth {
    pub added: usize,
    pub total: usize,
}

/// What one emitter run produced
#[derive(Debug, Default)]
pub struct EmitterReport {
    /// Roots first seen this run
    pub new_roots: usize,
    /// Accumulated-roots size after the merge
    pub total_roots: usize,
    /// Lines in the freshly written composite wordlist
    pub composite_size: usize,
    /// Growth per cohort wordlist
    pub cohort_growth: BTreeMap<String, CohortGrowth>,
    /// Rules written (excluding the hand-authored block)
    pub rules_emitted: usize,
}

/// Writer of all persistent feedback artifacts
pub struct FeedbackEmitter {
    config: FeedbackConfig,
    accumulated_path: PathBuf,
    composite_path: PathBuf,
    rules_path: PathBuf,
}

impl FeedbackEmitter {
    pub fn new(
        config: FeedbackConfig,
        accumulated_path: impl Into<PathBuf>,
        composite_path: impl Into<PathBuf>,
        rules_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            accumulated_path: accumulated_path.into(),
            composite_path: composite_path.into(),
            rules_path: rules_path.into(),
        }
    }

    /// Emit every artifact for one analysis. Running twice on the same
    /// input produces identical files modulo the timestamped header.
    pub fn emit(&self, analysis: &AnalysisReport) -> Result<EmitterReport> {
        let mut report = EmitterReport::default();

        let roots: BTreeSet<String> = analysis.roots.keys().cloned().collect();
        let (new_roots, total_roots) = self.merge_accumulated(&roots)?;
        report.new_roots = new_roots;
        report.total_roots = total_roots;

        report.cohort_growth = self.grow_cohorts(analysis)?;
        report.composite_size = self.write_composite()?;
        report.rules_emitted = self.write_rules(analysis)?;

        info!(
            new_roots = report.new_roots,
            total_roots = report.total_roots,
            composite = report.composite_size,
            rules = report.rules_emitted,
            "feedback artifacts emitted"
        );
        Ok(report)
    }

    /// Merge this run's roots into the accumulated file. The set never
    /// shrinks; the rewrite is atomic.
    fn merge_accumulated(&self, roots: &BTreeSet<String>) -> Result<(usize, usize)> {
        let mut accumulated = read_word_set(&self.accumulated_path)?;
        let before = accumulated.len();
        accumulated.extend(roots.iter().cloned());
        let added = accumulated.len() - before;

        write_word_set_atomic(&self.accumulated_path, &accumulated)?;
        debug!(added, total = accumulated.len(), "accumulated roots merged");
        Ok((added, accumulated.len()))
    }

    /// Append newly classified roots to each cohort's configured
    /// wordlist, deduplicated, persisting before reporting growth
    fn grow_cohorts(&self, analysis: &AnalysisReport) -> Result<BTreeMap<String, CohortGrowth>> {
        let mut growth = BTreeMap::new();
        for (label, path) in &self.config.cohort_wordlists {
            let mut words = read_word_set(path)?;
            let before = words.len();
            for info in analysis.roots_in_cohort(label) {
                words.insert(info.root.clone());
            }
            let added = words.len() - before;
            if added > 0 {
                write_word_set_atomic(path, &words)?;
            }
            growth.insert(
                label.clone(),
                CohortGrowth {
                    added,
                    total: words.len(),
                },
            );
        }
        Ok(growth)
    }

    /// Union of accumulated roots and every cohort wordlist, written
    /// fresh each run
    fn write_composite(&self) -> Result<usize> {
        let mut words = read_word_set(&self.accumulated_path)?;
        for path in self.config.cohort_wordlists.values() {
            words.extend(read_word_set(path)?);
        }
        write_word_set_atomic(&self.composite_path, &words)?;
        Ok(words.len())
    }

    /// Synthesize the derived rules file.
    ///
    /// Sources, in order: pattern flags above the frequency floor,
    /// top-K observed suffixes as literal appends, and the fixed
    /// recent-year appends. Rules already present in the baseline
    /// ruleset are filtered out; the hand-authored block from the
    /// previous file is carried over verbatim.
    fn write_rules(&self, analysis: &AnalysisReport) -> Result<usize> {
        let baseline = match self.config.baseline_rules {
            Some(ref path) => read_rule_set(path)?,
            None => BTreeSet::new(),
        };
        let hand_block = self.read_hand_authored_block()?;

        let mut rules: Vec<String> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut push = |rule: String, rules: &mut Vec<String>| {
            if !baseline.contains(&rule) && seen.insert(rule.clone()) {
                rules.push(rule);
            }
        };

        let mut flags: Vec<(&String, &usize)> = analysis.patterns.flags.iter().collect();
        flags.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (flag, &count) in flags {
            if count < self.config.min_pattern_frequency {
                continue;
            }
            if let Some(rule) = rule_for_flag(flag) {
                push(rule, &mut rules);
            }
        }

        for (suffix, _) in analysis.patterns.top_suffixes(self.config.top_suffix_count) {
            push(append_rule(&suffix), &mut rules);
        }

        for year in RECENT_YEARS {
            push(append_rule(&year.to_string()), &mut rules);
        }

        let emitted = rules.len();
        let mut content = String::new();
        content.push_str(&format!(
            "# derived rules - generated {}\n# do not edit above the marker; this section is rewritten every run\n",
            Utc::now().to_rfc3339()
        ));
        for rule in &rules {
            content.push_str(rule);
            content.push('\n');
        }
        content.push_str(HAND_AUTHORED_MARKER);
        content.push('\n');
        content.push_str(&hand_block);

        write_atomic(&self.rules_path, content.as_bytes())?;
        Ok(emitted)
    }

    /// Everything below the marker in the existing rules file
    fn read_hand_authored_block(&self) -> Result<String> {
        if !self.rules_path.exists() {
            return Ok(String::new());
        }
        let content =
            std::fs::read_to_string(&self.rules_path).map_err(|e| SluiceError::SourceIo {
                path: self.rules_path.clone(),
                source: e,
            })?;
        match content.split_once(HAND_AUTHORED_MARKER) {
            Some((_, block)) => Ok(block.trim_start_matches('\n').to_string()),
            None => Ok(String::new()),
        }
    }
}

/// Sum of cracks from attacks whose names carry a feedback prefix
pub fn feedback_cracks(results: &[AttackResult], prefixes: &[String]) -> u64 {
    results
        .iter()
        .filter(|r| prefixes.iter().any(|p| r.attack.starts_with(p.as_str())))
        .map(|r| r.new_cracks)
        .sum()
}

/// Translate a pattern flag into a hashcat-style rule
fn rule_for_flag(flag: &str) -> Option<String> {
    let rule = match flag {
        "suffix:!" => "$!",
        "suffix:@" => "$@",
        "suffix:!@" => "$!$@",
        "suffix:123" => "$1$2$3",
        "suffix:d1" => "$1",
        "suffix:d2" => "$1$2",
        "suffix:d3" => "$1$2$3",
        "suffix:d4+" => "$1$2$3$4",
        "case:capitalized" => "c",
        "case:upper" => "u",
        "prefix:digit" => "^1",
        "leet:a@" => "sa@",
        "leet:e3" => "se3",
        "leet:i1" => "si1",
        "leet:o0" => "so0",
        "leet:s$" => "ss$",
        _ => return None,
    };
    Some(rule.to_string())
}

/// Literal-append rule for an observed suffix
fn append_rule(suffix: &str) -> String {
    suffix.chars().map(|c| format!("${}", c)).collect()
}

fn read_word_set(path: &Path) -> Result<BTreeSet<String>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| SluiceError::SourceIo {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect())
}

/// Rules files may carry comments; those are not rules
fn read_rule_set(path: &Path) -> Result<BTreeSet<String>> {
    Ok(read_word_set(path)?
        .into_iter()
        .filter(|l| !l.starts_with('#'))
        .collect())
}

fn write_word_set_atomic(path: &Path, words: &BTreeSet<String>) -> Result<()> {
    let mut content = String::new();
    for word in words {
        content.push_str(word);
        content.push('\n');
    }
    write_atomic(path, content.as_bytes())
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| SluiceError::WriteIo {
        path: parent.to_path_buf(),
        source: e,
    })?;
    let mut temp = NamedTempFile::new_in(parent).map_err(|e| SluiceError::WriteIo {
        path: path.to_path_buf(),
        source: e,
    })?;
    temp.write_all(content)
        .and_then(|_| temp.flush())
        .map_err(|e| SluiceError::WriteIo {
            path: path.to_path_buf(),
            source: e,
        })?;
    temp.persist(path).map_err(|e| SluiceError::WriteIo {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/*!
 * Configuration structures and defaults for Sluice
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, SluiceError};

/// Log verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Attack phase ordering tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttackPhase {
    /// Assets derived from recovered plaintexts (newest knowledge first)
    Feedback,
    /// Freshly downloaded or generated wordlists
    NewWordlists,
    /// Exhaustive short keyspace
    Brute,
    /// Wordlist + mask combination
    Hybrid,
    /// Pure mask
    Mask,
}

/// One attack recipe: a named, parameterized template describing one
/// cracking run. `#HL#` in the template stands for the hashlist path;
/// asset tokens are bare filenames rewritten to absolute remote paths
/// through the asset map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackRecipe {
    /// Stable name, used in state records and feedback attribution
    pub name: String,

    /// Phase tag controlling the default ordering
    pub phase: AttackPhase,

    /// Token-templated worker command
    pub command_template: String,

    /// Logical asset filenames the command references
    #[serde(default)]
    pub assets: Vec<String>,

    /// Hint for the worker's parallelism (informational)
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: u32,

    /// Smaller sorts earlier within a phase
    #[serde(default)]
    pub priority: i32,

    /// Expected fraction of the batch this attack recovers (0.0-1.0)
    #[serde(default)]
    pub expected_yield_rate: f64,

    #[serde(default)]
    pub description: String,
}

fn default_max_parallelism() -> u32 {
    1
}

/// A cohort fingerprint: a named, ordered list of root patterns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortFingerprint {
    /// Cohort label applied to matching roots
    pub label: String,

    #[serde(default)]
    pub description: String,

    /// Regular expressions matched against the root
    pub patterns: Vec<String>,

    /// For discovery fingerprints: minimum matched-root count before
    /// the cohort is proposed
    #[serde(default)]
    pub min_match: Option<usize>,
}

/// Local filesystem layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root directory for all pipeline artifacts
    pub work_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("sluice-work"),
        }
    }
}

impl PathsConfig {
    pub fn gravel_dir(&self) -> PathBuf {
        self.work_dir.join("gravel")
    }

    pub fn candidates_dir(&self) -> PathBuf {
        self.work_dir.join("candidates")
    }

    pub fn sand_dir(&self) -> PathBuf {
        self.work_dir.join("sand")
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.work_dir.join("chunks")
    }

    pub fn cracked_log(&self) -> PathBuf {
        self.work_dir.join("cracked.jsonl")
    }

    pub fn state_file(&self) -> PathBuf {
        self.work_dir.join("state.json")
    }

    pub fn filter_bitmap(&self) -> PathBuf {
        self.work_dir.join("filter-progress.bitmap")
    }

    pub fn accumulated_roots(&self) -> PathBuf {
        self.work_dir.join("feedback").join("accumulated-roots.txt")
    }

    pub fn composite_wordlist(&self) -> PathBuf {
        self.work_dir.join("feedback").join("composite.txt")
    }

    pub fn rules_file(&self) -> PathBuf {
        self.work_dir.join("feedback").join("derived.rule")
    }

    pub fn feedback_dir(&self) -> PathBuf {
        self.work_dir.join("feedback")
    }
}

/// Remote worker connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Hostname or IP address of the GPU worker
    pub host: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// SSH username
    pub username: String,

    /// Private key file for public-key authentication; when unset the
    /// SSH agent is used
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// Optional passphrase for the key file; never serialized back out
    #[serde(default, skip_serializing)]
    pub key_passphrase: Option<secrecy::SecretString>,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Remote working directory for hashlists, logs and potfiles
    #[serde(default = "default_remote_work_dir")]
    pub work_dir: String,

    /// Directory on the worker where attack assets live
    #[serde(default = "default_remote_asset_dir")]
    pub asset_dir: String,

    /// Process name pattern identifying the cracking binary
    #[serde(default = "default_worker_process")]
    pub worker_process: String,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_remote_work_dir() -> String {
    "/srv/sluice".to_string()
}

fn default_remote_asset_dir() -> String {
    "/srv/sluice/assets".to_string()
}

fn default_worker_process() -> String {
    "hashcat".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: default_ssh_port(),
            username: "sluice".to_string(),
            key_file: None,
            key_passphrase: None,
            connect_timeout_secs: default_connect_timeout(),
            work_dir: default_remote_work_dir(),
            asset_dir: default_remote_asset_dir(),
            worker_process: default_worker_process(),
        }
    }
}

/// Remote execution supervisor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Seconds between completion polls
    pub poll_interval_secs: u64,

    /// Wall-clock ceiling for one attack run, in seconds
    pub max_wait_secs: u64,

    /// Settle time after launch before the first startup check
    pub settle_secs: u64,

    /// Initial reconnect delay after a transport failure
    pub reconnect_base_secs: u64,

    /// Per-attempt cap on the reconnect delay
    pub reconnect_cap_secs: u64,

    /// Total reconnect budget before declaring the connection lost
    pub reconnect_ceiling_secs: u64,

    /// Assets smaller than this are treated as corrupt downloads
    pub min_asset_bytes: u64,

    /// Required free bytes on the remote work filesystem
    pub min_remote_disk_bytes: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            max_wait_secs: 12 * 60 * 60,
            settle_secs: 10,
            reconnect_base_secs: 5,
            reconnect_cap_secs: 300,
            reconnect_ceiling_secs: 1800,
            min_asset_bytes: 1024,
            min_remote_disk_bytes: 5 * 1024 * 1024 * 1024,
        }
    }
}

/// Hash universe partitioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Hashes per batch file
    pub batch_size: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            batch_size: 1_000_000,
        }
    }
}

/// Baseline filter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// On-disk sorted binary index of baseline digests
    pub index_path: PathBuf,

    /// Pages held by the index page cache
    #[serde(default = "default_cache_pages")]
    pub cache_pages: usize,
}

fn default_cache_pages() -> usize {
    256
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("baseline.idx"),
            cache_pages: default_cache_pages(),
        }
    }
}

/// Chunk builder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Candidate batches concatenated per chunk
    pub batches_per_chunk: usize,

    /// Ceiling on hashes per chunk, sized to the worker's hash-lookup
    /// fast path
    pub max_chunk_hashes: usize,

    /// Recipe run against each chunk in the first pass; defaults to the
    /// first recipe of the default order
    #[serde(default)]
    pub attack: Option<String>,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            batches_per_chunk: 4,
            max_chunk_hashes: 6_000_000,
            attack: None,
        }
    }
}

/// Plaintext analyzer tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Whole-string entropy above which a plaintext is treated as random
    pub entropy_threshold: f64,

    /// Minimum vowel ratio for accepting 3-4 character roots
    pub short_root_vowel_ratio: f64,

    /// Per-character entropy ceiling for accepting 3-4 character roots
    pub short_root_entropy: f64,

    /// Root prefixes rejected outright (keyboard walks, service words)
    pub reject_prefixes: Vec<String>,

    /// Main cohort fingerprint registry, matched in order
    #[serde(default)]
    pub cohorts: Vec<CohortFingerprint>,

    /// Lower-confidence fingerprints applied only to unclassified roots
    #[serde(default)]
    pub discovery: Vec<CohortFingerprint>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            entropy_threshold: 3.8,
            short_root_vowel_ratio: 0.25,
            short_root_entropy: 2.5,
            reject_prefixes: [
                "qwer", "asdf", "zxcv", "abcd", "pass", "word", "test", "admin", "user",
                "login", "1234",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            cohorts: Vec::new(),
            discovery: Vec::new(),
        }
    }
}

/// Feedback emitter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Minimum corpus-wide count before a pattern becomes a rule
    pub min_pattern_frequency: usize,

    /// Top-K observed suffixes translated to literal-append rules
    pub top_suffix_count: usize,

    /// Ruleset whose members are filtered out of the emitted file
    #[serde(default)]
    pub baseline_rules: Option<PathBuf>,

    /// Attack-name prefixes that identify feedback-derived attacks
    pub feedback_attack_prefixes: Vec<String>,

    /// Destination wordlist per cohort label; matched roots grow these
    #[serde(default)]
    pub cohort_wordlists: BTreeMap<String, PathBuf>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            min_pattern_frequency: 5,
            top_suffix_count: 10,
            baseline_rules: None,
            feedback_attack_prefixes: vec!["feedback-".to_string()],
            cohort_wordlists: BTreeMap::new(),
        }
    }
}

/// Attack registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttacksConfig {
    /// Default execution order (recipe names); recipes not listed are
    /// appended in phase/priority order
    #[serde(default)]
    pub default_order: Vec<String>,

    /// Logical asset filename -> absolute remote path
    #[serde(default)]
    pub asset_map: BTreeMap<String, String>,

    /// Recipe definitions
    pub recipes: Vec<AttackRecipe>,
}

impl Default for AttacksConfig {
    fn default() -> Self {
        Self {
            default_order: Vec::new(),
            asset_map: BTreeMap::new(),
            recipes: default_recipes(),
        }
    }
}

/// Built-in recipe registry. Command shapes follow hashcat's CLI; the
/// exact schedule is expected to be overridden in the config file as
/// observed yields evolve.
pub fn default_recipes() -> Vec<AttackRecipe> {
    let recipe = |name: &str,
                  phase: AttackPhase,
                  template: &str,
                  assets: &[&str],
                  priority: i32,
                  yield_rate: f64,
                  description: &str| AttackRecipe {
        name: name.to_string(),
        phase,
        command_template: template.to_string(),
        assets: assets.iter().map(|s| s.to_string()).collect(),
        max_parallelism: 1,
        priority,
        expected_yield_rate: yield_rate,
        description: description.to_string(),
    };

    vec![
        recipe(
            "feedback-roots",
            AttackPhase::Feedback,
            "hashcat -m 100 -a 0 -w 3 #HL# composite.txt -r derived.rule",
            &["composite.txt", "derived.rule"],
            0,
            0.08,
            "Accumulated roots with rules mined from prior passes",
        ),
        recipe(
            "new-wordlists",
            AttackPhase::NewWordlists,
            "hashcat -m 100 -a 0 -w 3 #HL# fresh-words.txt -r best64.rule",
            &["fresh-words.txt", "best64.rule"],
            0,
            0.05,
            "Latest external wordlists under a small rule set",
        ),
        recipe(
            "brute-1",
            AttackPhase::Brute,
            "hashcat -m 100 -a 3 -w 3 #HL# ?a",
            &[],
            1,
            0.001,
            "All one-character candidates",
        ),
        recipe(
            "brute-2",
            AttackPhase::Brute,
            "hashcat -m 100 -a 3 -w 3 #HL# ?a?a",
            &[],
            2,
            0.002,
            "All two-character candidates",
        ),
        recipe(
            "brute-3",
            AttackPhase::Brute,
            "hashcat -m 100 -a 3 -w 3 #HL# ?a?a?a",
            &[],
            3,
            0.004,
            "All three-character candidates",
        ),
        recipe(
            "brute-4",
            AttackPhase::Brute,
            "hashcat -m 100 -a 3 -w 3 #HL# ?a?a?a?a",
            &[],
            4,
            0.006,
            "All four-character candidates",
        ),
        recipe(
            "brute-5",
            AttackPhase::Brute,
            "hashcat -m 100 -a 3 -w 3 #HL# ?a?a?a?a?a",
            &[],
            5,
            0.008,
            "All five-character candidates",
        ),
        recipe(
            "hybrid-words-digits",
            AttackPhase::Hybrid,
            "hashcat -m 100 -a 6 -w 3 #HL# base-words.txt ?d?d?d?d",
            &["base-words.txt"],
            0,
            0.03,
            "Dictionary words with four appended digits",
        ),
        recipe(
            "mask-common",
            AttackPhase::Mask,
            "hashcat -m 100 -a 3 -w 3 #HL# ?u?l?l?l?l?l?d?d",
            &[],
            0,
            0.02,
            "Capitalized six-letter word plus two digits",
        ),
    ]
}

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub log_file: Option<PathBuf>,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default = "default_show_progress")]
    pub show_progress: bool,

    /// State checkpoint interval during distributor passes (batches)
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub partition: PartitionConfig,

    #[serde(default)]
    pub baseline: BaselineConfig,

    #[serde(default)]
    pub chunk: ChunkConfig,

    #[serde(default)]
    pub attacks: AttacksConfig,

    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    #[serde(default)]
    pub feedback: FeedbackConfig,
}

fn default_show_progress() -> bool {
    true
}

fn default_checkpoint_every() -> usize {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_file: None,
            verbose: false,
            show_progress: default_show_progress(),
            checkpoint_every: default_checkpoint_every(),
            paths: PathsConfig::default(),
            remote: RemoteConfig::default(),
            executor: ExecutorConfig::default(),
            partition: PartitionConfig::default(),
            baseline: BaselineConfig::default(),
            chunk: ChunkConfig::default(),
            attacks: AttacksConfig::default(),
            analyzer: AnalyzerConfig::default(),
            feedback: FeedbackConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SluiceError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| SluiceError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback priority:
    /// 1. explicit path, 2. ./sluice.toml, 3. built-in defaults
    pub fn load_with_fallback(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let local = Path::new("sluice.toml");
        if local.exists() {
            return Self::load(local);
        }
        Ok(Self::default())
    }

    /// Reject configurations that cannot produce a correct run
    pub fn validate(&self) -> Result<()> {
        if self.partition.batch_size == 0 {
            return Err(SluiceError::Config(
                "partition.batch_size must be positive".to_string(),
            ));
        }
        if self.chunk.batches_per_chunk == 0 {
            return Err(SluiceError::Config(
                "chunk.batches_per_chunk must be positive".to_string(),
            ));
        }
        if self.executor.poll_interval_secs == 0 {
            return Err(SluiceError::Config(
                "executor.poll_interval_secs must be positive".to_string(),
            ));
        }
        if !(0.0..=8.0).contains(&self.analyzer.entropy_threshold) {
            return Err(SluiceError::Config(format!(
                "analyzer.entropy_threshold {} is outside the meaningful range 0-8",
                self.analyzer.entropy_threshold
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for recipe in &self.attacks.recipes {
            if !seen.insert(recipe.name.as_str()) {
                return Err(SluiceError::Config(format!(
                    "duplicate attack recipe name '{}'",
                    recipe.name
                )));
            }
        }
        for name in &self.attacks.default_order {
            if !seen.contains(name.as_str()) {
                return Err(SluiceError::Config(format!(
                    "default_order names unknown recipe '{}'",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert!(!config.attacks.recipes.is_empty());
        assert_eq!(config.analyzer.entropy_threshold, 3.8);
        assert_eq!(config.feedback.min_pattern_frequency, 5);
    }

    #[test]
    fn test_default_recipes_have_unique_names() {
        let recipes = default_recipes();
        let mut names = std::collections::HashSet::new();
        for r in &recipes {
            assert!(names.insert(r.name.clone()), "duplicate recipe {}", r.name);
        }
    }

    #[test]
    fn test_brute_recipes_escalate() {
        let recipes = default_recipes();
        let brutes: Vec<_> = recipes
            .iter()
            .filter(|r| r.phase == AttackPhase::Brute)
            .collect();
        assert_eq!(brutes.len(), 5);
        for pair in brutes.windows(2) {
            assert!(pair[0].priority < pair[1].priority);
        }
    }

    #[test]
    fn test_validate_rejects_duplicate_recipe() {
        let mut config = PipelineConfig::default();
        let first = config.attacks.recipes[0].clone();
        config.attacks.recipes.push(first);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_order_entry() {
        let mut config = PipelineConfig::default();
        config.attacks.default_order = vec!["no-such-attack".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = PipelineConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(
            parsed.partition.batch_size,
            config.partition.batch_size
        );
        assert_eq!(parsed.attacks.recipes.len(), config.attacks.recipes.len());
    }

    #[test]
    fn test_paths_derivation() {
        let paths = PathsConfig {
            work_dir: PathBuf::from("/data/run"),
        };
        assert_eq!(paths.gravel_dir(), PathBuf::from("/data/run/gravel"));
        assert_eq!(
            paths.cracked_log(),
            PathBuf::from("/data/run/cracked.jsonl")
        );
    }
}

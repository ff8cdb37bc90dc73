/*!
 * Pipeline orchestrator
 *
 * Single-threaded driver tying the stages together: partition the hash
 * universe, filter it against the baseline, dispatch chunks to the
 * worker, split results, walk the attack schedule per batch, and close
 * the loop by turning recovered plaintexts into next-iteration assets.
 * The only concurrent actor is the remote worker process; locally,
 * everything runs in order and an abort flag is honored between
 * batches.
 */

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sysinfo::Disks;
use tracing::{info, warn};

use crate::analyze::Analyzer;
use crate::baseline::{self, DigestIndex};
use crate::chunk::{self, ChunkInput};
use crate::config::PipelineConfig;
use crate::distribute::{CrackedLog, CrackedRecord, Distributor, PotfileMap};
use crate::error::{Result, SluiceError};
use crate::feedback::{feedback_cracks, FeedbackEmitter};
use crate::hashline::{self, PotfileEntry};
use crate::partition::{self, BatchRef, PartitionReport};
use crate::remote::{preflight, RemoteExecutor, RunSpec, Transport};
use crate::sequencer::{AttackRegistry, BatchRunSummary, Sequencer};
use crate::state::{FeedbackMetrics, StateStore};

/// Free-space safety margin for large local writes
const LOCAL_DISK_MARGIN: f64 = 0.10;

/// Outcome of the first (chunk-level) worker pass
#[derive(Debug, Default)]
pub struct ChunkPassReport {
    pub chunks_run: usize,
    pub chunks_skipped: usize,
    pub pearls: usize,
    pub sand: usize,
    pub orphans: usize,
}

/// The orchestrator
pub struct Pipeline {
    config: PipelineConfig,
    abort: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            abort: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Shared flag checked between batches; set it from a signal
    /// handler to stop at the next safe point
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// Stage 1: split the raw hash universe into batch files
    pub fn partition_universe(&self, source: &Path) -> Result<PartitionReport> {
        let required = std::fs::metadata(source)
            .map(|m| m.len())
            .unwrap_or(0);
        ensure_local_headroom(&self.config.paths.work_dir, required)?;

        partition::partition(
            source,
            &self.config.paths.gravel_dir(),
            self.config.partition.batch_size,
            self.config.show_progress,
        )
    }

    /// Stage 2: remove baseline-cracked hashes from every batch
    pub fn filter_baseline(&self) -> Result<baseline::FilterReport> {
        let batches = discover_batches(&self.config.paths.gravel_dir())?;
        if batches.is_empty() {
            return Err(SluiceError::Config(
                "no batch files found; run partition first".to_string(),
            ));
        }
        let mut index = DigestIndex::open(
            &self.config.baseline.index_path,
            self.config.baseline.cache_pages,
        )?;
        baseline::filter_all(
            &batches,
            &mut index,
            &self.config.paths.filter_bitmap(),
            &self.config.paths.candidates_dir(),
            self.config.show_progress,
        )
    }

    /// Stage 3: the chunk pass. Concatenate candidate batches, run the
    /// configured first-pass attack on each chunk, and split the
    /// results into recovered pairs and per-batch remainders.
    pub fn run_chunk_pass<T: Transport>(&self, transport: T) -> Result<ChunkPassReport> {
        let candidates = discover_batches(&self.config.paths.candidates_dir())?;
        if candidates.is_empty() {
            return Err(SluiceError::Config(
                "no candidate batches found; run filter first".to_string(),
            ));
        }

        let mut state = StateStore::open(&self.config.paths.state_file())?;
        let registry = AttackRegistry::from_config(&self.config.attacks);
        let default_order = registry.default_order().to_vec();
        for batch in &candidates {
            state.init(&batch.id, batch.line_count as u64, &default_order);
        }
        state.save()?;

        let recipe_name = match self.config.chunk.attack {
            Some(ref name) => name.clone(),
            None => default_order
                .first()
                .cloned()
                .ok_or_else(|| SluiceError::Config("attack registry is empty".to_string()))?,
        };
        let recipe = registry
            .get(&recipe_name)
            .ok_or_else(|| {
                SluiceError::Config(format!("chunk attack '{}' is not a recipe", recipe_name))
            })?
            .clone();

        let mut executor = RemoteExecutor::new(transport, self.config.executor.clone());
        let distributor = self.distributor();
        let inputs: Vec<ChunkInput> = candidates
            .iter()
            .map(|b| ChunkInput {
                batch_id: b.id.clone(),
                path: b.path.clone(),
                line_count: b.line_count,
            })
            .collect();
        let groups = chunk::group_batches(
            &inputs,
            self.config.chunk.batches_per_chunk,
            self.config.chunk.max_chunk_hashes,
        );

        let mut report = ChunkPassReport::default();
        let work_dir = self.config.remote.work_dir.trim_end_matches('/').to_string();

        for (chunk_id, group) in groups.iter().enumerate() {
            if self.aborted() {
                warn!("abort requested; stopping chunk pass");
                break;
            }

            // A chunk whose batches all have remainders already was
            // distributed in a previous run
            if group
                .iter()
                .all(|input| self.sand_path_for(&input.batch_id).is_some())
            {
                report.chunks_skipped += 1;
                continue;
            }

            let built = chunk::build(group, chunk_id, &self.config.paths.chunks_dir())?;
            let remote_hashlist = format!("{}/chunk-{:04}.txt", work_dir, chunk_id);
            let session = format!("sluice-chunk-{:04}", chunk_id);
            let log_path = format!("{}/{}.log", work_dir, session);
            let artifact_path = format!("{}/{}.pot", work_dir, session);

            executor
                .transport_mut()
                .upload(&built.path, &remote_hashlist)
                .map_err(SluiceError::Transport)?;

            let (base_command, asset_paths) = registry.translate(
                &recipe,
                &remote_hashlist,
                &self.config.remote,
                &self.config.attacks.asset_map,
            );
            let command = format!(
                "{} --status --status-timer={} --potfile-path={}",
                base_command, self.config.executor.poll_interval_secs, artifact_path
            );

            // Skip pre-flight when this chunk's session already exists;
            // the executor will adopt it instead of relaunching
            let resuming = crate::remote::DetachedSession::new(session.as_str(), log_path.as_str())
                .exists(executor.transport_mut())
                .unwrap_or(false);
            if !resuming {
                preflight(
                    executor.transport_mut(),
                    &self.config.remote,
                    &self.config.executor,
                    &remote_hashlist,
                    &asset_paths,
                )?;
            }

            let spec = RunSpec {
                session_name: session.clone(),
                command,
                log_path,
                artifact_path: artifact_path.clone(),
                process_pattern: self.config.remote.worker_process.clone(),
            };
            let outcome = executor.run(&spec)?;
            info!(chunk = chunk_id, terminal = ?outcome.terminal, "chunk pass finished");

            let local_pot = self
                .config
                .paths
                .chunks_dir()
                .join(format!("chunk-{:04}.pot", chunk_id));
            let pot_bytes = match executor
                .transport_mut()
                .download(&artifact_path, &local_pot)
            {
                Ok(bytes) => bytes,
                Err(crate::remote::TransportError::Transfer { .. }) => 0,
                Err(e) => return Err(SluiceError::Transport(e)),
            };
            let mut pot = if pot_bytes > 0 {
                PotfileMap::load(&local_pot)?
            } else {
                PotfileMap::default()
            };

            let batch_paths: Vec<(String, PathBuf)> = group
                .iter()
                .map(|input| (input.batch_id.clone(), input.path.clone()))
                .collect();
            let chunk_report = distributor.distribute_chunk(
                &batch_paths,
                &mut pot,
                &mut state,
                self.config.checkpoint_every,
                &self.abort,
            )?;
            report.pearls += chunk_report.total_pearls();
            report.sand += chunk_report.total_sand();
            report.orphans += chunk_report.orphans;
            report.chunks_run += 1;

            // The chunk is transient: once distribution succeeded the
            // per-batch remainders carry all the information
            let _ = std::fs::remove_file(&built.path);
            let _ = std::fs::remove_file(&local_pot);
            let _ = executor
                .transport_mut()
                .exec(&format!("rm -f '{}' '{}'", remote_hashlist, artifact_path));
        }

        state.save()?;
        Ok(report)
    }

    /// Stage 4: walk the attack schedule over every batch's remainder,
    /// closing the feedback loop after each batch
    pub fn run_attack_pass<T: Transport>(
        &self,
        transport: T,
        only_batches: Option<&[String]>,
        order_override: Option<&[String]>,
    ) -> Result<Vec<BatchRunSummary>> {
        let mut state = StateStore::open(&self.config.paths.state_file())?;
        let registry = AttackRegistry::from_config(&self.config.attacks);

        let executor = RemoteExecutor::new(transport, self.config.executor.clone());
        let mut sequencer = Sequencer::new(
            registry,
            executor,
            self.distributor(),
            self.config.remote.clone(),
            self.config.executor.clone(),
            self.config.attacks.asset_map.clone(),
            self.config.paths.chunks_dir(),
        );

        let batch_ids: Vec<String> = match only_batches {
            Some(ids) => ids.to_vec(),
            None => state.document().batches.keys().cloned().collect(),
        };

        let mut summaries = Vec::new();
        for batch_id in &batch_ids {
            if self.aborted() {
                warn!("abort requested; stopping attack pass");
                break;
            }

            let Some(input) = self.attack_input_for(batch_id) else {
                warn!(batch = %batch_id, "no remainder or candidate file; skipping");
                continue;
            };

            let summary = sequencer.run_batch(batch_id, &input, &mut state, order_override)?;
            if !summary.pearls.is_empty() {
                self.apply_feedback(batch_id, &summary.pearls, &mut state)?;
            }
            let stop = summary.aborted;
            summaries.push(summary);
            if stop {
                break;
            }
        }

        Ok(summaries)
    }

    /// Operator-triggered distribution of an already-downloaded potfile
    /// over batch remainders (re-runs after a crash, or potfiles
    /// recovered by hand from an orphaned session). Same conservation
    /// and cracked-log discipline as the chunk pass.
    pub fn distribute_potfile(
        &self,
        potfile: &Path,
        only_batches: Option<&[String]>,
    ) -> Result<crate::distribute::DistributorReport> {
        let mut state = StateStore::open(&self.config.paths.state_file())?;

        let batch_ids: Vec<String> = match only_batches {
            Some(ids) => ids.to_vec(),
            None => state.document().batches.keys().cloned().collect(),
        };
        let mut batch_paths: Vec<(String, PathBuf)> = Vec::new();
        for batch_id in &batch_ids {
            match self.attack_input_for(batch_id) {
                Some(input) => batch_paths.push((batch_id.clone(), input)),
                None => warn!(batch = %batch_id, "no remainder or candidate file; skipping"),
            }
        }
        if batch_paths.is_empty() {
            return Err(SluiceError::Config(
                "no batches with input files to distribute over".to_string(),
            ));
        }

        let mut pot = PotfileMap::load(potfile)?;
        self.distributor().distribute_chunk(
            &batch_paths,
            &mut pot,
            &mut state,
            self.config.checkpoint_every,
            &self.abort,
        )
    }

    /// Re-order every batch's remaining attacks from observed
    /// effectiveness (cracks per second across all batches)
    pub fn reorder_attacks(&self) -> Result<()> {
        let mut state = StateStore::open(&self.config.paths.state_file())?;

        let mut totals: std::collections::HashMap<String, (u64, u64)> =
            std::collections::HashMap::new();
        for batch in state.document().batches.values() {
            for result in &batch.attack_results {
                let entry = totals.entry(result.attack.clone()).or_insert((0, 0));
                entry.0 += result.new_cracks;
                entry.1 += result.duration_seconds;
            }
        }

        state.reorder_attacks(|attack| {
            totals.get(attack).map(|&(cracks, secs)| {
                cracks as f64 / secs.max(1) as f64
            })
        })
    }

    /// Corpus-wide analysis of the full cracked log (the `analyze`
    /// subcommand); per-batch feedback attribution happens inside the
    /// attack pass instead
    pub fn run_feedback_corpus(&self) -> Result<crate::feedback::EmitterReport> {
        let log = CrackedLog::new(self.config.paths.cracked_log());
        let records = log.read_all()?;
        let analyzer = Analyzer::from_config(&self.config.analyzer)?;
        let report = analyzer.analyze(&records);

        for candidate in &report.discovery_candidates {
            info!(
                label = %candidate.label,
                matched = candidate.matched_roots,
                samples = ?candidate.samples,
                "discovery fingerprint fired; consider adding a cohort"
            );
        }

        self.emitter().emit(&report)
    }

    /// Analyze one batch's newly recovered pairs, emit artifacts, and
    /// write the metrics back into batch state
    fn apply_feedback(
        &self,
        batch_id: &str,
        pearls: &[PotfileEntry],
        state: &mut StateStore,
    ) -> Result<()> {
        let records: Vec<CrackedRecord> = pearls
            .iter()
            .map(|p| CrackedRecord {
                hash: p.hash.clone(),
                plain: p.plain.clone(),
            })
            .collect();

        let analyzer = Analyzer::from_config(&self.config.analyzer)?;
        let report = analyzer.analyze(&records);
        let emitted = self.emitter().emit(&report)?;

        let attributed = state
            .batch(batch_id)
            .map(|b| {
                feedback_cracks(
                    &b.attack_results,
                    &self.config.feedback.feedback_attack_prefixes,
                )
            })
            .unwrap_or(0);

        let mut metrics = FeedbackMetrics {
            new_roots_discovered: emitted.new_roots as u64,
            total_discovered_roots: emitted.total_roots as u64,
            composite_size: emitted.composite_size as u64,
            feedback_cracks: attributed,
            ..Default::default()
        };
        for (label, growth) in &emitted.cohort_growth {
            metrics.cohort_sizes.insert(label.clone(), growth.total as u64);
        }
        state.record_feedback(batch_id, metrics)?;

        for candidate in &report.discovery_candidates {
            info!(
                batch = batch_id,
                label = %candidate.label,
                matched = candidate.matched_roots,
                "discovery fingerprint fired"
            );
        }
        Ok(())
    }

    fn distributor(&self) -> Distributor {
        Distributor::new(
            CrackedLog::new(self.config.paths.cracked_log()),
            self.config.paths.sand_dir(),
            false,
        )
    }

    fn emitter(&self) -> FeedbackEmitter {
        FeedbackEmitter::new(
            self.config.feedback.clone(),
            self.config.paths.accumulated_roots(),
            self.config.paths.composite_wordlist(),
            self.config.paths.rules_file(),
        )
    }

    /// The remainder file for a batch, if one was written yet
    fn sand_path_for(&self, batch_id: &str) -> Option<PathBuf> {
        let dir = self.config.paths.sand_dir();
        let plain = dir.join(format!("batch-{}.txt", batch_id));
        if plain.exists() {
            return Some(plain);
        }
        let gz = dir.join(format!("batch-{}.txt.gz", batch_id));
        gz.exists().then_some(gz)
    }

    /// Attack-stage input: the remainder when present, otherwise the
    /// candidate batch (chunk pass skipped)
    fn attack_input_for(&self, batch_id: &str) -> Option<PathBuf> {
        if let Some(sand) = self.sand_path_for(batch_id) {
            return Some(sand);
        }
        let candidate = self
            .config
            .paths
            .candidates_dir()
            .join(format!("batch-{}.txt", batch_id));
        candidate.exists().then_some(candidate)
    }
}

/// List batch files in a directory, ordered by id
pub fn discover_batches(dir: &Path) -> Result<Vec<BatchRef>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut batches = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| SluiceError::SourceIo {
        path: dir.to_path_buf(),
        source: e,
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| SluiceError::SourceIo {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(id) = name
            .strip_prefix("batch-")
            .and_then(|rest| rest.strip_suffix(".txt").or_else(|| rest.strip_suffix(".txt.gz")))
        else {
            continue;
        };
        let line_count = hashline::count_lines(&path)?;
        batches.push(BatchRef {
            id: id.to_string(),
            path,
            line_count,
        });
    }
    batches.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(batches)
}

/// Refuse to start large local writes without disk headroom
fn ensure_local_headroom(work_dir: &Path, required: u64) -> Result<()> {
    if required == 0 {
        return Ok(());
    }
    let disks = Disks::new_with_refreshed_list();
    let target = disks.iter().find(|disk| {
        work_dir.starts_with(disk.mount_point())
            || work_dir
                .parent()
                .map(|p| p.starts_with(disk.mount_point()))
                .unwrap_or(false)
    });

    if let Some(disk) = target {
        let needed = required.saturating_add((required as f64 * LOCAL_DISK_MARGIN) as u64);
        let available = disk.available_space();
        if available < needed {
            return Err(SluiceError::InsufficientDiskSpace {
                required: needed,
                available,
            });
        }
    } else {
        warn!(path = %work_dir.display(), "could not determine disk for work directory");
    }
    Ok(())
}

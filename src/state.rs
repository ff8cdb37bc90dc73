/*!
 * Batch state machine
 *
 * Durable per-batch record of which attacks have been applied, which
 * remain, and what each one yielded. The whole state is one JSON
 * document, rewritten atomically (write-temp-then-rename) so a crash at
 * any instant leaves either the old document or the new one, never a
 * torn file. A successful attack result is persisted before the next
 * attack begins, which makes interrupted attacks re-runnable without
 * double-counting.
 *
 * An advisory lock file guards against two orchestrators sharing one
 * state document.
 */

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Result, SluiceError};

/// Current state document schema version
pub const STATE_VERSION: u32 = 2;

/// Batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One finished attack against one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackResult {
    pub attack: String,
    pub new_cracks: u64,
    pub duration_seconds: u64,
    /// RFC 3339 completion timestamp
    pub completed_at: String,
}

/// Feedback metrics attributed to one batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackMetrics {
    /// Roots first seen while analyzing this batch's recoveries
    pub new_roots_discovered: u64,
    /// Size of the accumulated-roots file after the merge
    pub total_discovered_roots: u64,
    /// Size of the freshly written composite wordlist
    pub composite_size: u64,
    /// Current size of each grown cohort wordlist
    #[serde(default)]
    pub cohort_sizes: BTreeMap<String, u64>,
    /// Cracks attributable to feedback-derived attacks
    pub feedback_cracks: u64,
}

/// Durable state of one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchState {
    /// Batch id this record tracks
    pub hashlist_id: String,
    /// Hashes in the batch when it entered the attack stage
    pub hash_count: u64,
    /// Cumulative cracked count
    pub cracked: u64,
    pub status: BatchStatus,
    pub attacks_applied: Vec<String>,
    pub attacks_remaining: Vec<String>,
    pub attack_results: Vec<AttackResult>,
    /// External reference (remote session name) while in progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<FeedbackMetrics>,
}

/// The persisted document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    pub version: u32,
    pub started_at: String,
    pub last_updated: String,
    pub batches: BTreeMap<String, BatchState>,
}

impl StateDocument {
    fn new() -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            version: STATE_VERSION,
            started_at: now.clone(),
            last_updated: now,
            batches: BTreeMap::new(),
        }
    }
}

/// Owner of the state document and its lock
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    lock_path: PathBuf,
    doc: StateDocument,
    unsaved: usize,
}

impl StateStore {
    /// Open (or create) the state document, taking the advisory lock.
    ///
    /// A parse failure is `StateCorruption` and is never repaired
    /// automatically.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SluiceError::WriteIo {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let lock_path = path.with_extension("lock");
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut lock) => {
                let _ = writeln!(lock, "{}", std::process::id());
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(SluiceError::StateLocked {
                    path: lock_path.clone(),
                });
            }
            Err(e) => {
                return Err(SluiceError::WriteIo {
                    path: lock_path.clone(),
                    source: e,
                });
            }
        }

        let doc = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| SluiceError::SourceIo {
                path: path.to_path_buf(),
                source: e,
            })?;
            match serde_json::from_str::<StateDocument>(&content) {
                Ok(doc) => doc,
                Err(e) => {
                    // Do not hold the lock over a document we refuse to touch
                    let _ = std::fs::remove_file(&lock_path);
                    return Err(SluiceError::StateCorruption {
                        path: path.to_path_buf(),
                        detail: e.to_string(),
                    });
                }
            }
        } else {
            StateDocument::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            lock_path,
            doc,
            unsaved: 0,
        })
    }

    /// Read-only view of the document
    pub fn document(&self) -> &StateDocument {
        &self.doc
    }

    /// Parse the document without taking the lock (status displays).
    /// Returns an empty document when the file does not exist.
    pub fn peek(path: &Path) -> Result<StateDocument> {
        if !path.exists() {
            return Ok(StateDocument::new());
        }
        let content = std::fs::read_to_string(path).map_err(|e| SluiceError::SourceIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| SluiceError::StateCorruption {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    /// Create a pending record for a batch. Idempotent: an existing
    /// record is left untouched.
    pub fn init(&mut self, batch_id: &str, hash_count: u64, attack_order: &[String]) {
        if self.doc.batches.contains_key(batch_id) {
            return;
        }
        debug!(batch = batch_id, hash_count, "initializing batch state");
        self.doc.batches.insert(
            batch_id.to_string(),
            BatchState {
                hashlist_id: batch_id.to_string(),
                hash_count,
                cracked: 0,
                status: BatchStatus::Pending,
                attacks_applied: Vec::new(),
                attacks_remaining: attack_order.to_vec(),
                attack_results: Vec::new(),
                current_ref: None,
                feedback: None,
            },
        );
        self.unsaved += 1;
    }

    /// Whether an attack has already completed against a batch
    pub fn is_attack_applied(&self, batch_id: &str, attack: &str) -> bool {
        self.doc
            .batches
            .get(batch_id)
            .map(|b| b.attacks_applied.iter().any(|a| a == attack))
            .unwrap_or(false)
    }

    pub fn batch(&self, batch_id: &str) -> Option<&BatchState> {
        self.doc.batches.get(batch_id)
    }

    fn batch_mut(&mut self, batch_id: &str) -> Result<&mut BatchState> {
        self.doc
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| SluiceError::Other(format!("unknown batch '{}'", batch_id)))
    }

    /// Mark an attack as started, recording the external session
    /// reference. Persisted immediately so a crash still knows where to
    /// look for the detached session.
    pub fn start_attack(&mut self, batch_id: &str, attack: &str, external_ref: &str) -> Result<()> {
        let batch = self.batch_mut(batch_id)?;
        if batch.attacks_applied.iter().any(|a| a == attack) {
            warn!(batch = batch_id, attack, "attack already applied; not restarting");
            return Ok(());
        }
        batch.status = BatchStatus::InProgress;
        batch.current_ref = Some(external_ref.to_string());
        self.save()
    }

    /// Record a finished attack: append its result, move it from
    /// remaining to applied, bump the cracked counter, and persist
    /// before returning.
    pub fn complete_attack(
        &mut self,
        batch_id: &str,
        attack: &str,
        new_cracks: u64,
        duration_seconds: u64,
    ) -> Result<()> {
        let batch = self.batch_mut(batch_id)?;
        if batch.attacks_applied.iter().any(|a| a == attack) {
            // Resume replay of a finished attack must not double-count
            debug!(batch = batch_id, attack, "attack already recorded; skipping");
            return Ok(());
        }

        batch.attack_results.push(AttackResult {
            attack: attack.to_string(),
            new_cracks,
            duration_seconds,
            completed_at: Utc::now().to_rfc3339(),
        });
        batch.attacks_remaining.retain(|a| a != attack);
        batch.attacks_applied.push(attack.to_string());
        batch.cracked += new_cracks;
        batch.current_ref = None;
        if batch.attacks_remaining.is_empty() {
            batch.status = BatchStatus::Completed;
        }

        info!(
            batch = batch_id,
            attack, new_cracks, duration_seconds, "attack completed"
        );
        self.save()
    }

    /// Set the authoritative cumulative cracked count for a batch
    pub fn update_cracked(&mut self, batch_id: &str, total: u64) -> Result<()> {
        let batch = self.batch_mut(batch_id)?;
        if total < batch.cracked {
            warn!(
                batch = batch_id,
                old = batch.cracked,
                new = total,
                "refusing to lower cracked count"
            );
            return Ok(());
        }
        batch.cracked = total;
        self.unsaved += 1;
        Ok(())
    }

    /// Mark a batch failed (environment broken mid-attack)
    pub fn mark_failed(&mut self, batch_id: &str) -> Result<()> {
        let batch = self.batch_mut(batch_id)?;
        batch.status = BatchStatus::Failed;
        batch.current_ref = None;
        self.save()
    }

    /// Store feedback metrics for a batch
    pub fn record_feedback(&mut self, batch_id: &str, metrics: FeedbackMetrics) -> Result<()> {
        let batch = self.batch_mut(batch_id)?;
        batch.feedback = Some(metrics);
        self.save()
    }

    /// Re-order every batch's remaining attacks by observed
    /// effectiveness (cracks per second, highest first). Applied
    /// attacks are never discarded or re-introduced; attacks without
    /// observations keep their relative order after the measured ones.
    pub fn reorder_attacks<F>(&mut self, effectiveness: F) -> Result<()>
    where
        F: Fn(&str) -> Option<f64>,
    {
        for batch in self.doc.batches.values_mut() {
            let mut scored: Vec<(usize, String, Option<f64>)> = batch
                .attacks_remaining
                .iter()
                .enumerate()
                .map(|(i, a)| (i, a.clone(), effectiveness(a)))
                .collect();
            scored.sort_by(|(ia, _, ra), (ib, _, rb)| match (ra, rb) {
                (Some(x), Some(y)) => y.partial_cmp(x).unwrap_or(std::cmp::Ordering::Equal),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => ia.cmp(ib),
            });
            batch.attacks_remaining = scored.into_iter().map(|(_, a, _)| a).collect();
        }
        self.save()
    }

    /// Aggregate cracked count across all batches
    pub fn total_cracked(&self) -> u64 {
        self.doc.batches.values().map(|b| b.cracked).sum()
    }

    /// Aggregate hash count across all batches
    pub fn total_hashes(&self) -> u64 {
        self.doc.batches.values().map(|b| b.hash_count).sum()
    }

    /// Persist if at least `every` mutations accumulated since the last
    /// save. Used inside long distributor loops to bound lost work.
    pub fn checkpoint(&mut self, every: usize) -> Result<()> {
        if self.unsaved >= every.max(1) {
            self.save()?;
        }
        Ok(())
    }

    /// Write the document atomically: serialize to a sibling temp file,
    /// flush, then rename over the destination.
    pub fn save(&mut self) -> Result<()> {
        self.doc.last_updated = Utc::now().to_rfc3339();
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp = NamedTempFile::new_in(parent).map_err(|e| SluiceError::WriteIo {
            path: self.path.clone(),
            source: e,
        })?;
        let json = serde_json::to_string_pretty(&self.doc)?;
        temp.write_all(json.as_bytes())
            .and_then(|_| temp.flush())
            .map_err(|e| SluiceError::WriteIo {
                path: self.path.clone(),
                source: e,
            })?;
        temp.persist(&self.path).map_err(|e| SluiceError::WriteIo {
            path: self.path.clone(),
            source: e.error,
        })?;
        self.unsaved = 0;
        Ok(())
    }
}

impl Drop for StateStore {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

/*!
 * Result distributor
 *
 * Takes a completed chunk's potfile and splits every contributing batch
 * into recovered (hash, plaintext) pairs and an uncracked remainder.
 * Conservation is enforced per batch: recovered + remainder must equal
 * the batch input exactly, and a violation aborts before any output for
 * that batch is written. Recovered pairs are appended to the cracked
 * log before batch state advances, so an interruption can duplicate an
 * append but never lose one.
 */

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, SluiceError};
use crate::hashline::{self, LineOutcome, PotfileEntry};
use crate::state::StateStore;

/// One cracked-log line: exactly `hash` and `plain`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrackedRecord {
    pub hash: String,
    pub plain: String,
}

/// Append-only JSON-lines log of every recovered pair
#[derive(Debug, Clone)]
pub struct CrackedLog {
    path: PathBuf,
}

impl CrackedLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records; each line is flushed before returning
    pub fn append(&self, entries: &[PotfileEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| SluiceError::WriteIo {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SluiceError::WriteIo {
                path: self.path.clone(),
                source: e,
            })?;
        let mut writer = BufWriter::new(file);
        for entry in entries {
            let record = CrackedRecord {
                hash: entry.hash.clone(),
                plain: entry.plain.clone(),
            };
            let line = serde_json::to_string(&record)?;
            writer
                .write_all(line.as_bytes())
                .and_then(|_| writer.write_all(b"\n"))
                .map_err(|e| SluiceError::WriteIo {
                    path: self.path.clone(),
                    source: e,
                })?;
        }
        writer.flush().map_err(|e| SluiceError::WriteIo {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(entries.len())
    }

    /// Read every record back (analyzer input)
    pub fn read_all(&self) -> Result<Vec<CrackedRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(|e| SluiceError::SourceIo {
            path: self.path.clone(),
            source: e,
        })?;
        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str::<CrackedRecord>(line)?);
        }
        Ok(records)
    }
}

/// Potfile loaded into a hash -> plaintext map
#[derive(Debug, Default)]
pub struct PotfileMap {
    entries: HashMap<String, String>,
    matched: HashSet<String>,
    /// Lines that did not parse as potfile grammar
    pub malformed: usize,
}

impl PotfileMap {
    /// Load and decode a potfile. `$HEX[..]` plaintexts are decoded and
    /// hashes normalized to lowercase on the way in.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SluiceError::SourceIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut map = Self::default();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match hashline::parse_potfile_line(line) {
                Some(entry) => {
                    map.entries.insert(entry.hash, entry.plain);
                }
                None => map.malformed += 1,
            }
        }
        if map.malformed > 0 {
            warn!(path = %path.display(), malformed = map.malformed, "skipped malformed potfile lines");
        }
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&mut self, hash: &str) -> Option<String> {
        let plain = self.entries.get(hash)?;
        self.matched.insert(hash.to_string());
        Some(plain.clone())
    }

    /// Entries that matched no batch in this pass
    pub fn orphans(&self) -> usize {
        self.entries.len() - self.matched.len()
    }
}

/// Result of splitting one batch
#[derive(Debug)]
pub struct BatchSplit {
    pub batch_id: String,
    pub pearls: Vec<PotfileEntry>,
    pub sand: Vec<String>,
    /// Valid input hashes read from the batch file
    pub input_count: usize,
    /// Malformed batch lines skipped
    pub rejected: usize,
}

/// Outcome of distributing one batch to disk
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub batch_id: String,
    pub pearls: usize,
    pub sand: usize,
    pub sand_path: PathBuf,
    /// The recovered pairs themselves (feedback analysis input)
    pub pearl_entries: Vec<PotfileEntry>,
}

/// Summary of a full distributor pass
#[derive(Debug, Default)]
pub struct DistributorReport {
    pub outcomes: Vec<BatchOutcome>,
    /// Potfile entries that belonged to no processed batch
    pub orphans: usize,
    pub aborted: bool,
}

impl DistributorReport {
    pub fn total_pearls(&self) -> usize {
        self.outcomes.iter().map(|o| o.pearls).sum()
    }

    pub fn total_sand(&self) -> usize {
        self.outcomes.iter().map(|o| o.sand).sum()
    }
}

/// Splits batches against a potfile and owns the output layout
pub struct Distributor {
    cracked_log: CrackedLog,
    sand_dir: PathBuf,
    /// Write the uncracked remainder gzip-compressed
    compress_sand: bool,
}

impl Distributor {
    pub fn new(cracked_log: CrackedLog, sand_dir: impl Into<PathBuf>, compress_sand: bool) -> Self {
        Self {
            cracked_log,
            sand_dir: sand_dir.into(),
            compress_sand,
        }
    }

    pub fn sand_path(&self, batch_id: &str) -> PathBuf {
        if self.compress_sand {
            self.sand_dir.join(format!("batch-{}.txt.gz", batch_id))
        } else {
            self.sand_dir.join(format!("batch-{}.txt", batch_id))
        }
    }

    /// Partition one batch's hashes on potfile membership, preserving
    /// input order in both halves. Nothing is written.
    pub fn split_batch(
        &self,
        batch_id: &str,
        input_path: &Path,
        pot: &mut PotfileMap,
    ) -> Result<BatchSplit> {
        let mut split = BatchSplit {
            batch_id: batch_id.to_string(),
            pearls: Vec::new(),
            sand: Vec::new(),
            input_count: 0,
            rejected: 0,
        };
        hashline::for_each_hash_line(input_path, |outcome| {
            match outcome {
                LineOutcome::Hash(hash) => {
                    split.input_count += 1;
                    match pot.lookup(&hash) {
                        Some(plain) => split.pearls.push(PotfileEntry { hash, plain }),
                        None => split.sand.push(hash),
                    }
                }
                LineOutcome::Rejected => split.rejected += 1,
            }
            Ok(())
        })?;
        Ok(split)
    }

    /// Split one batch and persist its halves.
    ///
    /// Order of operations is deliberate: conservation is asserted
    /// first (abort writes nothing), pearls reach the cracked log
    /// before the sand file exists, and only then may callers advance
    /// batch state.
    pub fn distribute_batch(
        &self,
        batch_id: &str,
        input_path: &Path,
        pot: &mut PotfileMap,
    ) -> Result<BatchOutcome> {
        let split = self.split_batch(batch_id, input_path, pot)?;

        if split.pearls.len() + split.sand.len() != split.input_count {
            return Err(SluiceError::ConservationViolation {
                batch_id: batch_id.to_string(),
                cracked: split.pearls.len(),
                remaining: split.sand.len(),
                expected: split.input_count,
            });
        }

        self.cracked_log.append(&split.pearls)?;
        let sand_path = self.sand_path(batch_id);
        hashline::write_hashlist(&sand_path, split.sand.iter().map(|s| s.as_str()))?;

        debug!(
            batch = batch_id,
            pearls = split.pearls.len(),
            sand = split.sand.len(),
            "distributed batch"
        );
        Ok(BatchOutcome {
            batch_id: batch_id.to_string(),
            pearls: split.pearls.len(),
            sand: split.sand.len(),
            sand_path,
            pearl_entries: split.pearls,
        })
    }

    /// Distribute every contributing batch of a chunk, in index order,
    /// updating batch state with the authoritative cracked counts and
    /// checkpointing every `checkpoint_every` batches.
    pub fn distribute_chunk(
        &self,
        batches: &[(String, PathBuf)],
        pot: &mut PotfileMap,
        state: &mut StateStore,
        checkpoint_every: usize,
        abort: &AtomicBool,
    ) -> Result<DistributorReport> {
        let mut report = DistributorReport::default();

        for (batch_id, input_path) in batches {
            if abort.load(Ordering::Relaxed) {
                warn!(batch = %batch_id, "abort requested; stopping distribution");
                report.aborted = true;
                break;
            }

            let outcome = self.distribute_batch(batch_id, input_path, pot)?;
            let already = state.batch(batch_id).map(|b| b.cracked).unwrap_or(0);
            state.update_cracked(batch_id, already + outcome.pearls as u64)?;
            state.checkpoint(checkpoint_every)?;
            report.outcomes.push(outcome);
        }

        state.save()?;
        report.orphans = pot.orphans();
        if report.orphans > 0 {
            // Entries for hashes outside every processed batch are not an
            // error, but the operator should see the count
            info!(orphans = report.orphans, "potfile entries matched no batch");
        }
        Ok(report)
    }
}

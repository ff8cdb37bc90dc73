/*!
 * Baseline filter
 *
 * Removes from each raw batch every hash whose plaintext is already in
 * the baseline wordlist, leaving candidate batches for the worker.
 * Memory stays bounded: one batch is held at a time and the baseline
 * index is binary-searched on disk, never loaded. Progress across the
 * universe persists in a completion bitmap so an interrupted filter run
 * resumes without re-work.
 */

pub mod bitmap;
pub mod index;

pub use bitmap::CompletionBitmap;
pub use index::{build_index, DigestIndex};

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::error::{Result, SluiceError};
use crate::hashline::{self, LineOutcome};
use crate::partition::BatchRef;

/// Outcome of filtering one batch
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub batch_id: String,
    /// Path of the emitted candidate batch
    pub output: PathBuf,
    /// Hashes that survived the baseline
    pub kept: usize,
    /// Hashes removed as trivially cracked
    pub removed: usize,
    /// Malformed lines skipped
    pub rejected: usize,
}

/// Summary of a filter pass over many batches
#[derive(Debug, Default)]
pub struct FilterReport {
    pub outcomes: Vec<FilterOutcome>,
    /// Batches skipped because the bitmap already marked them done
    pub skipped: usize,
}

impl FilterReport {
    pub fn total_kept(&self) -> usize {
        self.outcomes.iter().map(|o| o.kept).sum()
    }

    pub fn total_removed(&self) -> usize {
        self.outcomes.iter().map(|o| o.removed).sum()
    }
}

/// Filter one batch against the baseline index, preserving input order.
///
/// The candidate batch is written to `out_path`; survivors keep their
/// original relative order.
pub fn filter_batch(
    batch_path: &Path,
    batch_id: &str,
    index: &mut DigestIndex,
    out_path: &Path,
) -> Result<FilterOutcome> {
    let mut kept: Vec<String> = Vec::new();
    let mut removed = 0usize;
    let mut rejected = 0usize;

    hashline::for_each_hash_line(batch_path, |outcome| {
        match outcome {
            LineOutcome::Hash(hash) => {
                if index.contains_hex(&hash)? {
                    removed += 1;
                } else {
                    kept.push(hash);
                }
            }
            LineOutcome::Rejected => rejected += 1,
        }
        Ok(())
    })?;

    if rejected > 0 {
        warn!(batch = batch_id, rejected, "skipped malformed batch lines");
    }

    hashline::write_hashlist(out_path, kept.iter().map(|s| s.as_str()))?;

    Ok(FilterOutcome {
        batch_id: batch_id.to_string(),
        output: out_path.to_path_buf(),
        kept: kept.len(),
        removed,
        rejected,
    })
}

/// Filter a set of batches, resuming from the completion bitmap.
///
/// The bitmap is saved atomically after every batch, so interrupting
/// the pass loses at most the batch in flight. Already-done batches
/// are skipped (their candidate files are assumed present).
pub fn filter_all(
    batches: &[BatchRef],
    index: &mut DigestIndex,
    bitmap_path: &Path,
    out_dir: &Path,
    show_progress: bool,
) -> Result<FilterReport> {
    let mut bitmap = CompletionBitmap::load_or_new(bitmap_path, batches.len())?;
    std::fs::create_dir_all(out_dir).map_err(|e| SluiceError::WriteIo {
        path: out_dir.to_path_buf(),
        source: e,
    })?;

    let progress = if show_progress {
        let bar = ProgressBar::new(batches.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} batches {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_position(bitmap.completed() as u64);
        Some(bar)
    } else {
        None
    };

    let mut report = FilterReport::default();
    for (i, batch) in batches.iter().enumerate() {
        if bitmap.is_done(i) {
            report.skipped += 1;
            continue;
        }

        let out_path = out_dir.join(format!("batch-{}.txt", batch.id));
        let outcome = filter_batch(&batch.path, &batch.id, index, &out_path)?;
        info!(
            batch = %batch.id,
            kept = outcome.kept,
            removed = outcome.removed,
            "filtered batch against baseline"
        );
        report.outcomes.push(outcome);

        bitmap.mark_done(i);
        bitmap.save()?;
        if let Some(ref bar) = progress {
            bar.inc(1);
        }
    }

    if let Some(bar) = progress {
        bar.finish_and_clear();
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashline::sha1_hex;
    use crate::partition;
    use tempfile::tempdir;

    fn make_index(dir: &Path, words: &[&str]) -> DigestIndex {
        let wordlist = dir.join("baseline-words.txt");
        std::fs::write(&wordlist, words.join("\n")).unwrap();
        let index_path = dir.join("baseline.idx");
        index::build_index(&wordlist, &index_path).unwrap();
        DigestIndex::open(&index_path, 8).unwrap()
    }

    #[test]
    fn test_filter_removes_baseline_hits_in_order() {
        let dir = tempdir().unwrap();
        let mut index = make_index(dir.path(), &["password"]);

        let batch_path = dir.path().join("batch-0000.txt");
        let hashes = [sha1_hex(b"password"), sha1_hex(b"s3cret!"), sha1_hex(b"gibberish")];
        std::fs::write(&batch_path, hashes.join("\n")).unwrap();

        let out = dir.path().join("candidates-0000.txt");
        let outcome = filter_batch(&batch_path, "0000", &mut index, &out).unwrap();

        assert_eq!(outcome.kept, 2);
        assert_eq!(outcome.removed, 1);

        let survivors = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = survivors.lines().collect();
        assert_eq!(lines, vec![hashes[1].as_str(), hashes[2].as_str()]);
    }

    #[test]
    fn test_filter_all_resumes_from_bitmap() {
        let dir = tempdir().unwrap();
        let mut index = make_index(dir.path(), &["known"]);

        // Two source batches
        let universe: Vec<String> = vec![
            sha1_hex(b"known"),
            sha1_hex(b"aaa"),
            sha1_hex(b"bbb"),
            sha1_hex(b"ccc"),
        ];
        let source = dir.path().join("universe.txt");
        std::fs::write(&source, universe.join("\n")).unwrap();
        let gravel = dir.path().join("gravel");
        let parted = partition::partition(&source, &gravel, 2, false).unwrap();

        let bitmap_path = dir.path().join("progress.bitmap");
        let out_dir = dir.path().join("candidates");

        let first = filter_all(&parted.batches, &mut index, &bitmap_path, &out_dir, false)
            .unwrap();
        assert_eq!(first.outcomes.len(), 2);
        assert_eq!(first.skipped, 0);
        assert_eq!(first.total_removed(), 1);
        assert_eq!(first.total_kept(), 3);

        // A second pass does no work
        let second = filter_all(&parted.batches, &mut index, &bitmap_path, &out_dir, false)
            .unwrap();
        assert_eq!(second.outcomes.len(), 0);
        assert_eq!(second.skipped, 2);
    }
}

/*!
 * Hash universe partitioner
 *
 * Splits a large external hash collection into fixed-size, ordered
 * batch files. Batch numbering is monotonic and zero-padded, so a
 * second run over the same source reproduces the same layout.
 */

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::error::{Result, SluiceError};
use crate::hashline;

/// Format a batch index as its canonical zero-padded id
pub fn batch_id(index: usize) -> String {
    format!("{:04}", index)
}

/// Canonical batch file path for an id inside a directory
pub fn batch_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("batch-{}.txt", id))
}

/// One emitted batch file
#[derive(Debug, Clone)]
pub struct BatchRef {
    /// Zero-padded monotonic id ("0000", "0001", ...)
    pub id: String,
    pub path: PathBuf,
    /// Hashes written to this batch
    pub line_count: usize,
}

/// Outcome of a partition run
#[derive(Debug, Default)]
pub struct PartitionReport {
    pub batches: Vec<BatchRef>,
    pub total_hashes: usize,
    /// Lines discarded for not matching the hash grammar
    pub rejected: usize,
}

/// Partition a source hash stream into batch files of `batch_size`
/// hashes each.
///
/// Lines failing the 40-hex grammar are discarded and counted; they
/// never enter the pipeline. Mixed-case digests are normalized to
/// lowercase on the way through.
pub fn partition(
    source: &Path,
    out_dir: &Path,
    batch_size: usize,
    show_progress: bool,
) -> Result<PartitionReport> {
    let file = File::open(source).map_err(|e| SluiceError::SourceIo {
        path: source.to_path_buf(),
        source: e,
    })?;
    std::fs::create_dir_all(out_dir).map_err(|e| SluiceError::WriteIo {
        path: out_dir.to_path_buf(),
        source: e,
    })?;

    let source_bytes = file.metadata().map(|m| m.len()).unwrap_or(0);
    let progress = if show_progress {
        let bar = ProgressBar::new(source_bytes);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner} [{elapsed_precise}] [{bar:40}] {bytes}/{total_bytes} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Some(bar)
    } else {
        None
    };

    let reader = BufReader::new(file);
    let mut report = PartitionReport::default();
    let mut writer: Option<BatchWriter> = None;

    for line in reader.lines() {
        let line = line.map_err(|e| SluiceError::SourceIo {
            path: source.to_path_buf(),
            source: e,
        })?;
        if let Some(ref bar) = progress {
            bar.inc(line.len() as u64 + 1);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let hash = match hashline::normalize_hash(trimmed) {
            Some(h) => h,
            None => {
                report.rejected += 1;
                continue;
            }
        };

        let roll = writer.as_ref().map(|w| w.count >= batch_size).unwrap_or(true);
        if roll {
            if let Some(full) = writer.take() {
                report.batches.push(full.finish()?);
            }
            let index = report.batches.len();
            writer = Some(BatchWriter::create(out_dir, index)?);
        }
        if let Some(ref mut w) = writer {
            w.write_hash(&hash)?;
            report.total_hashes += 1;
        }
    }

    if let Some(partial) = writer.take() {
        report.batches.push(partial.finish()?);
    }
    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    info!(
        batches = report.batches.len(),
        hashes = report.total_hashes,
        rejected = report.rejected,
        "partitioned hash universe"
    );
    Ok(report)
}

struct BatchWriter {
    id: String,
    path: PathBuf,
    writer: BufWriter<File>,
    count: usize,
}

impl BatchWriter {
    fn create(dir: &Path, index: usize) -> Result<Self> {
        let id = batch_id(index);
        let path = batch_path(dir, &id);
        let file = File::create(&path).map_err(|e| SluiceError::WriteIo {
            path: path.clone(),
            source: e,
        })?;
        debug!(batch = %id, "opened batch file");
        Ok(Self {
            id,
            path,
            writer: BufWriter::new(file),
            count: 0,
        })
    }

    fn write_hash(&mut self, hash: &str) -> Result<()> {
        let path = self.path.clone();
        let io_err = move |e| SluiceError::WriteIo {
            path: path.clone(),
            source: e,
        };
        self.writer.write_all(hash.as_bytes()).map_err(&io_err)?;
        self.writer.write_all(b"\n").map_err(&io_err)?;
        self.count += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<BatchRef> {
        self.writer.flush().map_err(|e| SluiceError::WriteIo {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(BatchRef {
            id: self.id,
            path: self.path,
            line_count: self.count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashline::sha1_hex;
    use tempfile::tempdir;

    fn write_source(dir: &Path, lines: &[String]) -> PathBuf {
        let path = dir.join("universe.txt");
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    #[test]
    fn test_partition_fixed_size_batches() {
        let dir = tempdir().unwrap();
        let hashes: Vec<String> = (0..10)
            .map(|i| sha1_hex(format!("pw{}", i).as_bytes()))
            .collect();
        let source = write_source(dir.path(), &hashes);
        let out = dir.path().join("gravel");

        let report = partition(&source, &out, 4, false).unwrap();

        assert_eq!(report.total_hashes, 10);
        assert_eq!(report.rejected, 0);
        assert_eq!(report.batches.len(), 3);
        assert_eq!(report.batches[0].id, "0000");
        assert_eq!(report.batches[2].id, "0002");
        assert_eq!(report.batches[0].line_count, 4);
        assert_eq!(report.batches[2].line_count, 2);

        // Order is preserved across batch boundaries
        let first = std::fs::read_to_string(&report.batches[0].path).unwrap();
        assert_eq!(first.lines().next().unwrap(), hashes[0]);
        let last = std::fs::read_to_string(&report.batches[2].path).unwrap();
        assert_eq!(last.lines().last().unwrap(), hashes[9]);
    }

    #[test]
    fn test_partition_rejects_bad_lines() {
        let dir = tempdir().unwrap();
        let lines = vec![
            sha1_hex(b"alpha"),
            "not-a-hash".to_string(),
            String::new(),
            sha1_hex(b"beta").to_ascii_uppercase(),
            "deadbeef".to_string(),
        ];
        let source = write_source(dir.path(), &lines);
        let out = dir.path().join("gravel");

        let report = partition(&source, &out, 100, false).unwrap();

        assert_eq!(report.total_hashes, 2);
        assert_eq!(report.rejected, 2);

        // Uppercase input lands lowercased
        let content = std::fs::read_to_string(&report.batches[0].path).unwrap();
        assert!(content.contains(&sha1_hex(b"beta")));
    }

    #[test]
    fn test_partition_deterministic() {
        let dir = tempdir().unwrap();
        let hashes: Vec<String> = (0..7).map(|i| sha1_hex(&[i as u8])).collect();
        let source = write_source(dir.path(), &hashes);

        let out_a = dir.path().join("a");
        let out_b = dir.path().join("b");
        let a = partition(&source, &out_a, 3, false).unwrap();
        let b = partition(&source, &out_b, 3, false).unwrap();

        assert_eq!(a.batches.len(), b.batches.len());
        for (x, y) in a.batches.iter().zip(&b.batches) {
            assert_eq!(x.id, y.id);
            assert_eq!(
                std::fs::read_to_string(&x.path).unwrap(),
                std::fs::read_to_string(&y.path).unwrap()
            );
        }
    }

    #[test]
    fn test_partition_missing_source() {
        let dir = tempdir().unwrap();
        let err = partition(
            &dir.path().join("absent.txt"),
            &dir.path().join("out"),
            10,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, SluiceError::SourceIo { .. }));
    }
}

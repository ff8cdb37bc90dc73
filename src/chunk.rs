/*!
 * Chunk builder
 *
 * Concatenates N candidate batches into one hashlist so the worker
 * amortizes its startup and hash-lookup costs over a larger list.
 */

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, SluiceError};
use crate::hashline;

/// A batch eligible for chunking
#[derive(Debug, Clone)]
pub struct ChunkInput {
    pub batch_id: String,
    pub path: PathBuf,
    pub line_count: usize,
}

/// One built chunk
#[derive(Debug, Clone)]
pub struct ChunkRef {
    pub id: usize,
    pub path: PathBuf,
    /// Contributing batch ids, in concatenation order
    pub batch_ids: Vec<String>,
    pub line_count: usize,
}

/// Canonical chunk file path
pub fn chunk_path(dir: &Path, id: usize) -> PathBuf {
    dir.join(format!("chunk-{:04}.txt", id))
}

/// Group batches into chunks of at most `batches_per_chunk` batches,
/// additionally honoring the worker's hash-count ceiling. Groups keep
/// batch order. A single oversized batch still becomes its own chunk.
pub fn group_batches(
    inputs: &[ChunkInput],
    batches_per_chunk: usize,
    max_chunk_hashes: usize,
) -> Vec<Vec<ChunkInput>> {
    let mut groups: Vec<Vec<ChunkInput>> = Vec::new();
    let mut current: Vec<ChunkInput> = Vec::new();
    let mut current_hashes = 0usize;

    for input in inputs {
        let over_count = current.len() >= batches_per_chunk;
        let over_ceiling =
            !current.is_empty() && current_hashes + input.line_count > max_chunk_hashes;
        if over_count || over_ceiling {
            groups.push(std::mem::take(&mut current));
            current_hashes = 0;
        }
        current_hashes += input.line_count;
        current.push(input.clone());
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Build one chunk by concatenating the given batches in order.
///
/// Output is deterministic for the same inputs: the same bytes in the
/// same order, one trailing newline per batch line.
pub fn build(inputs: &[ChunkInput], chunk_id: usize, out_dir: &Path) -> Result<ChunkRef> {
    std::fs::create_dir_all(out_dir).map_err(|e| SluiceError::WriteIo {
        path: out_dir.to_path_buf(),
        source: e,
    })?;
    let path = chunk_path(out_dir, chunk_id);
    let file = File::create(&path).map_err(|e| SluiceError::WriteIo {
        path: path.clone(),
        source: e,
    })?;
    let mut writer = BufWriter::new(file);
    let mut line_count = 0usize;
    let mut batch_ids = Vec::with_capacity(inputs.len());

    for input in inputs {
        let mut reader = hashline::open_lines(&input.path)?;
        let mut buf = String::new();
        reader
            .read_to_string(&mut buf)
            .map_err(|e| SluiceError::SourceIo {
                path: input.path.clone(),
                source: e,
            })?;
        for line in buf.lines() {
            if line.is_empty() {
                continue;
            }
            writer
                .write_all(line.as_bytes())
                .and_then(|_| writer.write_all(b"\n"))
                .map_err(|e| SluiceError::WriteIo {
                    path: path.clone(),
                    source: e,
                })?;
            line_count += 1;
        }
        batch_ids.push(input.batch_id.clone());
    }

    writer.flush().map_err(|e| SluiceError::WriteIo {
        path: path.clone(),
        source: e,
    })?;

    info!(
        chunk = chunk_id,
        batches = batch_ids.len(),
        hashes = line_count,
        "built chunk"
    );
    Ok(ChunkRef {
        id: chunk_id,
        path,
        batch_ids,
        line_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashline::sha1_hex;
    use tempfile::tempdir;

    fn input(dir: &Path, id: &str, hashes: &[String]) -> ChunkInput {
        let path = dir.join(format!("batch-{}.txt", id));
        std::fs::write(&path, hashes.join("\n")).unwrap();
        ChunkInput {
            batch_id: id.to_string(),
            path,
            line_count: hashes.len(),
        }
    }

    #[test]
    fn test_build_concatenates_in_order() {
        let dir = tempdir().unwrap();
        let a = vec![sha1_hex(b"a1"), sha1_hex(b"a2")];
        let b = vec![sha1_hex(b"b1")];
        let inputs = vec![input(dir.path(), "0000", &a), input(dir.path(), "0001", &b)];

        let chunk = build(&inputs, 0, &dir.path().join("chunks")).unwrap();

        assert_eq!(chunk.line_count, 3);
        assert_eq!(chunk.batch_ids, vec!["0000", "0001"]);
        let content = std::fs::read_to_string(&chunk.path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec![a[0].as_str(), a[1].as_str(), b[0].as_str()]);
    }

    #[test]
    fn test_build_deterministic() {
        let dir = tempdir().unwrap();
        let hashes = vec![sha1_hex(b"x"), sha1_hex(b"y")];
        let inputs = vec![input(dir.path(), "0000", &hashes)];

        let first = build(&inputs, 0, &dir.path().join("c1")).unwrap();
        let second = build(&inputs, 0, &dir.path().join("c2")).unwrap();
        assert_eq!(
            std::fs::read_to_string(&first.path).unwrap(),
            std::fs::read_to_string(&second.path).unwrap()
        );
    }

    #[test]
    fn test_group_batches_respects_count() {
        let dir = tempdir().unwrap();
        let hashes = vec![sha1_hex(b"h")];
        let inputs: Vec<ChunkInput> = (0..5)
            .map(|i| input(dir.path(), &format!("{:04}", i), &hashes))
            .collect();

        let groups = group_batches(&inputs, 2, 1_000_000);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[2].len(), 1);
    }

    #[test]
    fn test_group_batches_respects_hash_ceiling() {
        let dir = tempdir().unwrap();
        let hashes = vec![sha1_hex(b"h"); 10];
        let inputs: Vec<ChunkInput> = (0..4)
            .map(|i| input(dir.path(), &format!("{:04}", i), &hashes))
            .collect();

        // Each batch has 10 hashes; ceiling of 15 forces one batch per chunk
        let groups = group_batches(&inputs, 10, 15);
        assert_eq!(groups.len(), 4);
    }
}

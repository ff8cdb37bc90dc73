/*!
 * Completion bitmap for resumable filtering
 *
 * One bit per batch index. The bitmap is persisted after every batch
 * with a write-temp-then-rename, so a crash mid-universe never loses
 * more than the batch in flight and never leaves a torn file.
 */

use std::io::Write;
use std::path::{Path, PathBuf};

use bitvec::prelude::*;
use tempfile::NamedTempFile;

use crate::error::{Result, SluiceError};

/// Durable set of completed batch indexes
#[derive(Debug)]
pub struct CompletionBitmap {
    bits: BitVec<u8, Msb0>,
    path: PathBuf,
}

impl CompletionBitmap {
    /// Load the bitmap from disk, or create an empty one sized for
    /// `size` batches when the file does not exist yet
    pub fn load_or_new(path: &Path, size: usize) -> Result<Self> {
        let mut bits = if path.exists() {
            let data = std::fs::read(path).map_err(|e| SluiceError::SourceIo {
                path: path.to_path_buf(),
                source: e,
            })?;
            BitVec::from_vec(data)
        } else {
            BitVec::new()
        };
        if bits.len() < size {
            bits.resize(size, false);
        }
        Ok(Self {
            bits,
            path: path.to_path_buf(),
        })
    }

    /// Whether a batch index is marked complete
    pub fn is_done(&self, index: usize) -> bool {
        self.bits.get(index).map(|b| *b).unwrap_or(false)
    }

    /// Mark a batch index complete (grows the bitmap if needed)
    pub fn mark_done(&mut self, index: usize) {
        if index >= self.bits.len() {
            self.bits.resize(index + 1, false);
        }
        self.bits.set(index, true);
    }

    /// Number of completed batches
    pub fn completed(&self) -> usize {
        self.bits.count_ones()
    }

    /// Persist atomically: write to a sibling temp file, then rename
    /// over the destination
    pub fn save(&self) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| SluiceError::WriteIo {
            path: parent.to_path_buf(),
            source: e,
        })?;

        let mut temp = NamedTempFile::new_in(parent).map_err(|e| SluiceError::WriteIo {
            path: self.path.clone(),
            source: e,
        })?;
        temp.write_all(self.bits.as_raw_slice())
            .map_err(|e| SluiceError::WriteIo {
                path: self.path.clone(),
                source: e,
            })?;
        temp.persist(&self.path).map_err(|e| SluiceError::WriteIo {
            path: self.path.clone(),
            source: e.error,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_new_bitmap_is_empty() {
        let dir = tempdir().unwrap();
        let bitmap =
            CompletionBitmap::load_or_new(&dir.path().join("progress.bitmap"), 16).unwrap();
        assert_eq!(bitmap.completed(), 0);
        assert!(!bitmap.is_done(0));
        assert!(!bitmap.is_done(15));
    }

    #[test]
    fn test_mark_save_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.bitmap");

        let mut bitmap = CompletionBitmap::load_or_new(&path, 16).unwrap();
        bitmap.mark_done(0);
        bitmap.mark_done(9);
        bitmap.save().unwrap();

        let reloaded = CompletionBitmap::load_or_new(&path, 16).unwrap();
        assert!(reloaded.is_done(0));
        assert!(reloaded.is_done(9));
        assert!(!reloaded.is_done(1));
        assert_eq!(reloaded.completed(), 2);
    }

    #[test]
    fn test_mark_beyond_size_grows() {
        let dir = tempdir().unwrap();
        let mut bitmap =
            CompletionBitmap::load_or_new(&dir.path().join("p.bitmap"), 4).unwrap();
        bitmap.mark_done(100);
        assert!(bitmap.is_done(100));
        assert!(!bitmap.is_done(99));
    }
}

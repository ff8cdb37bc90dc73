/*!
 * Line grammars shared across the pipeline
 *
 * Hashlists are UTF-8 text, one 40-hex SHA-1 digest per line, LF or
 * CRLF. Potfiles append `<hash>:<plaintext>` per recovered hash, where
 * the plaintext may be `$HEX[..]`-encoded. Everything downstream of the
 * partitioner assumes digests have been normalized to lowercase here.
 */

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};

use crate::error::{Result, SluiceError};

/// Length of a hex-encoded SHA-1 digest
pub const HASH_LEN: usize = 40;

/// Check whether a string is a well-formed 40-hex digest (either case)
pub fn is_valid_hash(s: &str) -> bool {
    s.len() == HASH_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Normalize a candidate hash line: trim whitespace, lowercase,
/// validate. Returns `None` for lines that do not parse as a digest.
pub fn normalize_hash(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if !is_valid_hash(trimmed) {
        return None;
    }
    if trimmed.bytes().any(|b| b.is_ascii_uppercase()) {
        Some(trimmed.to_ascii_lowercase())
    } else {
        Some(trimmed.to_string())
    }
}

/// Hex-encoded SHA-1 of raw bytes
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Decode a potfile plaintext field.
///
/// `$HEX[..]` forms decode to raw bytes; when those bytes are valid
/// UTF-8 the decoded string is returned, otherwise the `$HEX[..]` form
/// is kept verbatim so the cracked-log stays valid UTF-8. Anything else
/// passes through unchanged.
pub fn decode_plaintext(raw: &str) -> String {
    if let Some(inner) = raw.strip_prefix("$HEX[").and_then(|s| s.strip_suffix(']')) {
        if inner.len() % 2 == 0 {
            if let Ok(bytes) = hex::decode(inner) {
                if let Ok(s) = String::from_utf8(bytes) {
                    return s;
                }
                return raw.to_string();
            }
        }
    }
    raw.to_string()
}

/// One parsed potfile line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PotfileEntry {
    /// Lowercase 40-hex digest
    pub hash: String,
    /// Decoded plaintext (or verbatim `$HEX[..]` when not valid UTF-8)
    pub plain: String,
}

/// Parse one potfile line.
///
/// The split is fixed at the 41st byte: 40 hex digits, one `:`, then
/// the plaintext (which may itself contain colons). CRLF is tolerated.
/// Returns `None` for lines that do not match the grammar.
pub fn parse_potfile_line(line: &str) -> Option<PotfileEntry> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.len() < HASH_LEN + 1 {
        return None;
    }
    let (head, rest) = line.split_at(HASH_LEN);
    if !is_valid_hash(head) || !rest.starts_with(':') {
        return None;
    }
    Some(PotfileEntry {
        hash: head.to_ascii_lowercase(),
        plain: decode_plaintext(&rest[1..]),
    })
}

/// Open a hashlist-grammar file for buffered line reading,
/// transparently decompressing when the path ends in `.gz`
pub fn open_lines(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|e| SluiceError::SourceIo {
        path: path.to_path_buf(),
        source: e,
    })?;
    if is_gzip_path(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Line-oriented writer that gzip-compresses when the path ends in `.gz`
pub fn create_line_writer(path: &Path) -> Result<Box<dyn Write>> {
    let file = File::create(path).map_err(|e| SluiceError::WriteIo {
        path: path.to_path_buf(),
        source: e,
    })?;
    if is_gzip_path(path) {
        Ok(Box::new(BufWriter::new(GzEncoder::new(
            file,
            Compression::default(),
        ))))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

fn is_gzip_path(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("gz")
}

/// Result of loading a hashlist
#[derive(Debug, Default)]
pub struct HashlistLoad {
    /// Normalized digests in file order
    pub hashes: Vec<String>,
    /// Lines discarded for not matching the hash grammar
    pub rejected: usize,
}

/// Read an entire hashlist into memory, normalizing digests and
/// counting rejects. Blank lines count as rejects only when non-empty
/// after trimming.
pub fn read_hashlist(path: &Path) -> Result<HashlistLoad> {
    let mut load = HashlistLoad::default();
    for_each_hash_line(path, |outcome| {
        match outcome {
            LineOutcome::Hash(h) => load.hashes.push(h),
            LineOutcome::Rejected => load.rejected += 1,
        }
        Ok(())
    })?;
    Ok(load)
}

/// Outcome of scanning one hashlist line
pub enum LineOutcome {
    /// A normalized digest
    Hash(String),
    /// A non-blank line that failed the grammar
    Rejected,
}

/// Stream a hashlist line by line without materializing it.
///
/// Blank lines are skipped silently; malformed non-blank lines are
/// reported as `LineOutcome::Rejected`.
pub fn for_each_hash_line<F>(path: &Path, mut f: F) -> Result<()>
where
    F: FnMut(LineOutcome) -> Result<()>,
{
    let reader = open_lines(path)?;
    for line in reader.lines() {
        let line = line.map_err(|e| SluiceError::SourceIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match normalize_hash(trimmed) {
            Some(h) => f(LineOutcome::Hash(h))?,
            None => f(LineOutcome::Rejected)?,
        }
    }
    Ok(())
}

/// Write digests one per line, creating parent directories as needed
pub fn write_hashlist<'a, I>(path: &Path, hashes: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| SluiceError::WriteIo {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }
    let mut writer = create_line_writer(path)?;
    let mut count = 0;
    let write_err = |e: io::Error| SluiceError::WriteIo {
        path: path.to_path_buf(),
        source: e,
    };
    for hash in hashes {
        writer.write_all(hash.as_bytes()).map_err(write_err)?;
        writer.write_all(b"\n").map_err(write_err)?;
        count += 1;
    }
    writer.flush().map_err(write_err)?;
    Ok(count)
}

/// Count the lines of a hashlist-grammar file without loading it
pub fn count_lines(path: &Path) -> Result<usize> {
    let mut reader = open_lines(path)?;
    let mut buf = [0u8; 64 * 1024];
    let mut count = 0;
    let mut last = 0u8;
    loop {
        let n = reader.read(&mut buf).map_err(|e| SluiceError::SourceIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        count += buf[..n].iter().filter(|&&b| b == b'\n').count();
        last = buf[n - 1];
    }
    if last != b'\n' && last != 0 {
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_hash() {
        assert_eq!(
            normalize_hash("5BAA61E4C9B93F3F0682250B6CF8331B7EE68FD8"),
            Some("5baa61e4c9b93f3f0682250b6cf8331b7ee68fd8".to_string())
        );
        assert_eq!(
            normalize_hash("  5baa61e4c9b93f3f0682250b6cf8331b7ee68fd8\r"),
            Some("5baa61e4c9b93f3f0682250b6cf8331b7ee68fd8".to_string())
        );
        assert_eq!(normalize_hash("not-a-hash"), None);
        assert_eq!(normalize_hash("5baa61e4"), None);
        // 39 and 41 hex digits both fail
        assert_eq!(normalize_hash(&"a".repeat(39)), None);
        assert_eq!(normalize_hash(&"a".repeat(41)), None);
    }

    #[test]
    fn test_sha1_hex() {
        assert_eq!(
            sha1_hex(b"password"),
            "5baa61e4c9b93f3f0682250b6cf8331b7ee68fd8"
        );
    }

    #[test]
    fn test_decode_plaintext_hex_form() {
        assert_eq!(decode_plaintext("$HEX[70613a7373]"), "pa:ss");
        assert_eq!(decode_plaintext("plain"), "plain");
        // Odd-length hex payload is not decodable, passes through
        assert_eq!(decode_plaintext("$HEX[abc]"), "$HEX[abc]");
        // Invalid UTF-8 stays in $HEX form
        assert_eq!(decode_plaintext("$HEX[ff00ff]"), "$HEX[ff00ff]");
    }

    #[test]
    fn test_parse_potfile_line() {
        let entry =
            parse_potfile_line("aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d:$HEX[70613a7373]")
                .unwrap();
        assert_eq!(entry.hash, "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
        assert_eq!(entry.plain, "pa:ss");

        // Colons in the plaintext belong to the plaintext
        let entry =
            parse_potfile_line("5baa61e4c9b93f3f0682250b6cf8331b7ee68fd8:a:b:c").unwrap();
        assert_eq!(entry.plain, "a:b:c");

        // CRLF tolerated
        let entry =
            parse_potfile_line("5baa61e4c9b93f3f0682250b6cf8331b7ee68fd8:pw\r").unwrap();
        assert_eq!(entry.plain, "pw");

        // Mixed-case hash is normalized
        let entry =
            parse_potfile_line("5BAA61E4C9B93F3F0682250B6CF8331B7EE68FD8:pw").unwrap();
        assert_eq!(entry.hash, "5baa61e4c9b93f3f0682250b6cf8331b7ee68fd8");

        assert!(parse_potfile_line("garbage").is_none());
        assert!(parse_potfile_line("5baa61e4c9b93f3f0682250b6cf8331b7ee68fd8").is_none());
    }

    #[test]
    fn test_hashlist_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("list.txt");

        let hashes = vec![sha1_hex(b"one"), sha1_hex(b"two"), sha1_hex(b"three")];
        let written = write_hashlist(&path, hashes.iter().map(|s| s.as_str())).unwrap();
        assert_eq!(written, 3);

        let load = read_hashlist(&path).unwrap();
        assert_eq!(load.hashes, hashes);
        assert_eq!(load.rejected, 0);
        assert_eq!(count_lines(&path).unwrap(), 3);
    }

    #[test]
    fn test_hashlist_gzip_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("list.txt.gz");

        let hashes = vec![sha1_hex(b"alpha"), sha1_hex(b"beta")];
        write_hashlist(&path, hashes.iter().map(|s| s.as_str())).unwrap();

        let load = read_hashlist(&path).unwrap();
        assert_eq!(load.hashes, hashes);
    }

    #[test]
    fn test_rejects_counted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("list.txt");
        std::fs::write(
            &path,
            "5baa61e4c9b93f3f0682250b6cf8331b7ee68fd8\nnot-a-hash\n\nzzz\n",
        )
        .unwrap();

        let load = read_hashlist(&path).unwrap();
        assert_eq!(load.hashes.len(), 1);
        assert_eq!(load.rejected, 2);
    }
}

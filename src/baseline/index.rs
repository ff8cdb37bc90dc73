/*!
 * On-disk sorted digest index
 *
 * The baseline wordlist is represented as a flat file of fixed-width
 * 20-byte SHA-1 records, sorted bytewise. Membership queries binary
 * search the file through a small page cache, so the index is never
 * materialized in memory.
 *
 * Building the index from a plaintext wordlist uses an external
 * merge-sort: digests are collected into bounded in-memory chunks,
 * each chunk is sorted and spilled to disk, and the spill files are
 * merged with a streaming k-way merge.
 */

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use tracing::{debug, info};

use crate::error::{Result, SluiceError};

/// Width of one index record (raw SHA-1 digest)
pub const RECORD_LEN: usize = 20;

/// Records per cached page; 256 records keeps pages at 5 KiB
const RECORDS_PER_PAGE: usize = 256;

/// Default entries per spill chunk while building
const BUILD_CHUNK_RECORDS: usize = 2_000_000;

/// Read-only membership index over sorted fixed-width digest records
pub struct DigestIndex {
    file: File,
    path: PathBuf,
    record_count: u64,
    cache: PageCache,
}

impl DigestIndex {
    /// Open an existing index file
    pub fn open(path: &Path, cache_pages: usize) -> Result<Self> {
        let file = File::open(path).map_err(|e| SluiceError::SourceIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        let len = file
            .metadata()
            .map_err(|e| SluiceError::SourceIo {
                path: path.to_path_buf(),
                source: e,
            })?
            .len();
        if len % RECORD_LEN as u64 != 0 {
            return Err(SluiceError::Config(format!(
                "baseline index {} has a partial record ({} bytes)",
                path.display(),
                len
            )));
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
            record_count: len / RECORD_LEN as u64,
            cache: PageCache::new(cache_pages.max(1)),
        })
    }

    /// Number of digests in the index
    pub fn len(&self) -> u64 {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Binary search for a lowercase 40-hex digest
    pub fn contains_hex(&mut self, hash: &str) -> Result<bool> {
        let mut digest = [0u8; RECORD_LEN];
        if hex::decode_to_slice(hash, &mut digest).is_err() {
            return Ok(false);
        }
        self.contains(&digest)
    }

    /// Binary search for a raw 20-byte digest
    pub fn contains(&mut self, digest: &[u8; RECORD_LEN]) -> Result<bool> {
        let mut lo = 0u64;
        let mut hi = self.record_count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let record = self.record_at(mid)?;
            match record.as_slice().cmp(digest.as_slice()) {
                Ordering::Equal => return Ok(true),
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
            }
        }
        Ok(false)
    }

    fn record_at(&mut self, index: u64) -> Result<[u8; RECORD_LEN]> {
        let page_index = index / RECORDS_PER_PAGE as u64;
        let offset_in_page = (index % RECORDS_PER_PAGE as u64) as usize * RECORD_LEN;

        if !self.cache.contains(page_index) {
            let page = self.read_page(page_index)?;
            self.cache.insert(page_index, page);
        }
        let page = self
            .cache
            .get(page_index)
            .ok_or_else(|| SluiceError::Other("page cache evicted live page".to_string()))?;

        let mut record = [0u8; RECORD_LEN];
        record.copy_from_slice(&page[offset_in_page..offset_in_page + RECORD_LEN]);
        Ok(record)
    }

    fn read_page(&mut self, page_index: u64) -> Result<Vec<u8>> {
        let start = page_index * (RECORDS_PER_PAGE * RECORD_LEN) as u64;
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |e| SluiceError::SourceIo { path, source: e }
        };
        self.file
            .seek(SeekFrom::Start(start))
            .map_err(io_err(&self.path))?;
        let remaining = (self.record_count * RECORD_LEN as u64).saturating_sub(start) as usize;
        let mut page = vec![0u8; remaining.min(RECORDS_PER_PAGE * RECORD_LEN)];
        self.file
            .read_exact(&mut page)
            .map_err(io_err(&self.path))?;
        Ok(page)
    }
}

/// Insertion-order page cache with a fixed capacity
struct PageCache {
    capacity: usize,
    pages: HashMap<u64, Vec<u8>>,
    order: VecDeque<u64>,
}

impl PageCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pages: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn contains(&self, index: u64) -> bool {
        self.pages.contains_key(&index)
    }

    fn get(&self, index: u64) -> Option<&Vec<u8>> {
        self.pages.get(&index)
    }

    fn insert(&mut self, index: u64, page: Vec<u8>) {
        while self.pages.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.pages.remove(&oldest);
            } else {
                break;
            }
        }
        self.order.push_back(index);
        self.pages.insert(index, page);
    }
}

/// Build a sorted digest index from a plaintext baseline wordlist.
///
/// Returns the number of unique digests written. Spill chunks keep the
/// build within a bounded memory footprint regardless of wordlist size.
pub fn build_index(wordlist: &Path, out: &Path) -> Result<u64> {
    build_index_with_chunk(wordlist, out, BUILD_CHUNK_RECORDS)
}

pub fn build_index_with_chunk(wordlist: &Path, out: &Path, chunk_records: usize) -> Result<u64> {
    let file = File::open(wordlist).map_err(|e| SluiceError::SourceIo {
        path: wordlist.to_path_buf(),
        source: e,
    })?;
    let reader = BufReader::new(file);

    let spill_dir = out.with_extension("spill");
    std::fs::create_dir_all(&spill_dir).map_err(|e| SluiceError::WriteIo {
        path: spill_dir.clone(),
        source: e,
    })?;

    let mut chunk: Vec<[u8; RECORD_LEN]> = Vec::with_capacity(chunk_records.min(1 << 20));
    let mut spills: Vec<PathBuf> = Vec::new();

    for line in reader.split(b'\n') {
        let mut word = line.map_err(|e| SluiceError::SourceIo {
            path: wordlist.to_path_buf(),
            source: e,
        })?;
        if word.last() == Some(&b'\r') {
            word.pop();
        }
        if word.is_empty() {
            continue;
        }
        let mut hasher = Sha1::new();
        hasher.update(&word);
        chunk.push(hasher.finalize().into());

        if chunk.len() >= chunk_records {
            spills.push(write_spill(&spill_dir, spills.len(), &mut chunk)?);
        }
    }

    let total = if spills.is_empty() {
        // Everything fit in one chunk; sort and write directly
        chunk.sort_unstable();
        chunk.dedup();
        write_records(out, chunk.iter())?
    } else {
        if !chunk.is_empty() {
            spills.push(write_spill(&spill_dir, spills.len(), &mut chunk)?);
        }
        merge_spills(&spills, out)?
    };

    for spill in &spills {
        let _ = std::fs::remove_file(spill);
    }
    let _ = std::fs::remove_dir(&spill_dir);

    info!(records = total, index = %out.display(), "built baseline index");
    Ok(total)
}

fn write_spill(
    dir: &Path,
    index: usize,
    chunk: &mut Vec<[u8; RECORD_LEN]>,
) -> Result<PathBuf> {
    chunk.sort_unstable();
    chunk.dedup();
    let path = dir.join(format!("spill-{:04}.bin", index));
    write_records(&path, chunk.iter())?;
    debug!(spill = %path.display(), records = chunk.len(), "wrote spill chunk");
    chunk.clear();
    Ok(path)
}

fn write_records<'a, I>(path: &Path, records: I) -> Result<u64>
where
    I: Iterator<Item = &'a [u8; RECORD_LEN]>,
{
    let file = File::create(path).map_err(|e| SluiceError::WriteIo {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut writer = BufWriter::new(file);
    let mut count = 0u64;
    for record in records {
        writer.write_all(record).map_err(|e| SluiceError::WriteIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        count += 1;
    }
    writer.flush().map_err(|e| SluiceError::WriteIo {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(count)
}

/// Streaming k-way merge of sorted spill files, deduplicating on the fly
fn merge_spills(spills: &[PathBuf], out: &Path) -> Result<u64> {
    struct SpillReader {
        reader: BufReader<File>,
        path: PathBuf,
    }

    impl SpillReader {
        fn next_record(&mut self) -> Result<Option<[u8; RECORD_LEN]>> {
            let mut record = [0u8; RECORD_LEN];
            match self.reader.read_exact(&mut record) {
                Ok(()) => Ok(Some(record)),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
                Err(e) => Err(SluiceError::SourceIo {
                    path: self.path.clone(),
                    source: e,
                }),
            }
        }
    }

    let mut readers = Vec::with_capacity(spills.len());
    for path in spills {
        let file = File::open(path).map_err(|e| SluiceError::SourceIo {
            path: path.clone(),
            source: e,
        })?;
        readers.push(SpillReader {
            reader: BufReader::new(file),
            path: path.clone(),
        });
    }

    let mut heap: BinaryHeap<Reverse<([u8; RECORD_LEN], usize)>> = BinaryHeap::new();
    for (i, reader) in readers.iter_mut().enumerate() {
        if let Some(record) = reader.next_record()? {
            heap.push(Reverse((record, i)));
        }
    }

    let file = File::create(out).map_err(|e| SluiceError::WriteIo {
        path: out.to_path_buf(),
        source: e,
    })?;
    let mut writer = BufWriter::new(file);
    let mut count = 0u64;
    let mut last: Option<[u8; RECORD_LEN]> = None;

    while let Some(Reverse((record, source))) = heap.pop() {
        if last != Some(record) {
            writer.write_all(&record).map_err(|e| SluiceError::WriteIo {
                path: out.to_path_buf(),
                source: e,
            })?;
            last = Some(record);
            count += 1;
        }
        if let Some(next) = readers[source].next_record()? {
            heap.push(Reverse((next, source)));
        }
    }

    writer.flush().map_err(|e| SluiceError::WriteIo {
        path: out.to_path_buf(),
        source: e,
    })?;
    Ok(count)
}

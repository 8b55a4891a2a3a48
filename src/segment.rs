//! Segment store (component C): append-only `<stem>.dat` + `<stem>.index`
//! pairs, size-bounded rotation, and binary search over `partitionIndex`.
//!
//! `<stem>.dat` holds one 16-byte header (`seq:i32 | crc:i32 | len:i32 |
//! time:i32`) followed by `len` payload bytes per record. `<stem>.index`
//! holds one `i32` per record: the byte offset just past that record's end
//! in `.dat`. `partitionIndex` holds one `i32` per segment: its starting
//! sequence number, ascending.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{Cache, Mode, Role};
use crate::codec::{crc32_signed, pack_i32, unpack_i32, I32_SIZE};
use crate::error::{Error, Result};
use crate::lock::{retry_io, spin_wait_absent, ExclusiveLock};
use crate::mmap::IndexView;

pub const RECORD_HEADER_SIZE: usize = 16;
pub const STEM_WIDTH: usize = 10;

const SEGMENT_LOCK_FILE: &str = "lock";
const PARTITION_INDEX_FILE: &str = "partitionIndex";

/// One fully-decoded record read back from a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRecord {
    pub seq: i64,
    pub crc: i32,
    pub time: i32,
    pub payload: Vec<u8>,
}

/// A message awaiting assignment of a sequence number, about to be
/// appended to the current segment.
pub struct PendingRecord {
    pub time: i32,
    pub payload: Vec<u8>,
}

/// Result of resolving which segment a writer should append into.
pub enum PartitionOutcome {
    /// Append into the segment starting at this sequence.
    Ready(i64),
    /// The current generation is saturated; the caller must hand off to
    /// the generation manager and retry.
    Saturated,
}

pub fn partition_index_path(topic_dir: &Path) -> PathBuf {
    topic_dir.join(PARTITION_INDEX_FILE)
}

pub fn segment_lock_path(topic_dir: &Path) -> PathBuf {
    topic_dir.join(SEGMENT_LOCK_FILE)
}

pub fn stem_name(seq: i64) -> String {
    format!("{seq:0width$}", width = STEM_WIDTH)
}

pub fn dat_path(topic_dir: &Path, seq: i64) -> PathBuf {
    topic_dir.join(format!("{}.dat", stem_name(seq)))
}

pub fn index_path(topic_dir: &Path, seq: i64) -> PathBuf {
    topic_dir.join(format!("{}.index", stem_name(seq)))
}

fn parse_stem(name: &str) -> Option<i64> {
    let stem = name.strip_suffix(".index")?;
    if stem.len() != STEM_WIDTH || !stem.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    stem.parse::<i64>().ok()
}

/// Scan `topic_dir` for `<stem>.index` files and return their stems,
/// ascending. Used both by repair and by tests asserting invariant 3.
pub fn discover_segment_stems(topic_dir: &Path) -> Result<Vec<i64>> {
    let mut stems = Vec::new();
    if !topic_dir.exists() {
        return Ok(stems);
    }
    for entry in std::fs::read_dir(topic_dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(stem) = parse_stem(name) {
                stems.push(stem);
            }
        }
    }
    stems.sort_unstable();
    Ok(stems)
}

/// Rebuild `partitionIndex` from scratch if it's missing or torn (size not
/// a multiple of 4) while segment files still exist on disk (invariant 9).
/// A topic with no segments at all is left untouched — that's the
/// legitimate "brand new topic" state, not corruption.
pub fn repair_partition_index(topic_dir: &Path) -> Result<bool> {
    let path = partition_index_path(topic_dir);
    let corrupt = match std::fs::metadata(&path) {
        Ok(meta) => meta.len() % (I32_SIZE as u64) != 0,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            !discover_segment_stems(topic_dir)?.is_empty()
        }
        Err(err) => return Err(err.into()),
    };
    if !corrupt {
        return Ok(false);
    }
    let stems = discover_segment_stems(topic_dir)?;
    log::warn!("{}: repairing torn partitionIndex from {} segment(s) on disk", topic_dir.display(), stems.len());
    let mut buf = Vec::with_capacity(stems.len() * I32_SIZE);
    for stem in &stems {
        buf.extend_from_slice(&pack_i32(*stem as i32));
    }
    std::fs::write(&path, buf)?;
    Ok(true)
}

/// Determine which segment a writer should append `pad_count` messages
/// into (§4.C `current_partition`).
pub fn current_partition(
    cache: &mut Cache,
    topic_dir: &Path,
    topic: &str,
    pad_count: i64,
    partition_size_bytes: u64,
    label_size: i64,
) -> Result<PartitionOutcome> {
    spin_wait_absent(
        &segment_lock_path(topic_dir),
        500,
        Duration::from_millis(10),
        "segment lock held past retry budget",
    )?;

    repair_partition_index(topic_dir)?;

    let pi_path = partition_index_path(topic_dir);
    if !pi_path.exists() {
        std::fs::write(&pi_path, pack_i32(0))?;
        return Ok(PartitionOutcome::Ready(0));
    }

    let file = cache.get_write(topic, Role::PartitionIndex, &pi_path, Mode::ReadWrite)?;
    let mut file = file.try_clone()?;
    let _guard = ExclusiveLock::acquire(&file)?;

    let len = file.metadata()?.len();
    if len == 0 || len % I32_SIZE as u64 != 0 {
        return Err(Error::FileError("partitionIndex size not a multiple of 4"));
    }
    let current_start = read_i32_at(&file, len - I32_SIZE as u64)? as i64;

    if !dat_path(topic_dir, current_start).exists() {
        return Ok(PartitionOutcome::Ready(current_start));
    }

    let index_len = std::fs::metadata(index_path(topic_dir, current_start))?.len();
    if index_len % I32_SIZE as u64 != 0 {
        return Err(Error::FileError("segment index size not a multiple of 4"));
    }
    let last_seq = current_start + (index_len / I32_SIZE as u64) as i64;

    if last_seq + pad_count > label_size {
        std::fs::File::create(segment_lock_path(topic_dir))?;
        return Ok(PartitionOutcome::Saturated);
    }

    let dat_len = std::fs::metadata(dat_path(topic_dir, current_start))?.len();
    if dat_len > partition_size_bytes {
        file.seek(SeekFrom::End(0))?;
        file.write_all(&pack_i32(last_seq as i32))?;
        file.flush()?;
        log::debug!("{topic}: rolled segment {current_start} -> {last_seq} ({dat_len} bytes)");
        return Ok(PartitionOutcome::Ready(last_seq));
    }

    Ok(PartitionOutcome::Ready(current_start))
}

/// Append `messages` to the segment starting at `stem`, assigning
/// sequential sequence numbers starting at `stem + (existing record
/// count)`. Returns the first assigned sequence.
///
/// The `.index` lock is acquired before the `.dat` lock and is the
/// primary serialization point for writers (§5); on an `.index` write
/// failure after the `.dat` write already landed, the `.dat` file is
/// truncated back to its pre-write size to restore invariant 3.
pub fn append(
    cache: &mut Cache,
    topic_dir: &Path,
    topic: &str,
    stem: i64,
    messages: &[PendingRecord],
) -> Result<i64> {
    if messages.is_empty() {
        return Ok(stem);
    }

    let ipath = index_path(topic_dir, stem);
    let dpath = dat_path(topic_dir, stem);

    let mut index_file = cache.get_write(topic, Role::Index, &ipath, Mode::Append)?.try_clone()?;
    let _index_guard = ExclusiveLock::acquire(&index_file)?;

    let mut dat_file = cache.get_write(topic, Role::Dat, &dpath, Mode::Append)?.try_clone()?;
    let _dat_guard = ExclusiveLock::acquire(&dat_file)?;

    let existing_records = index_file.metadata()?.len() / I32_SIZE as u64;
    let first_seq = stem + existing_records as i64;

    // The index-visible tail, not the physical file length, is the true
    // end of record data: a crash on a *previous* append can leave orphan
    // bytes in `.dat` past what `.index` ever learned about. Truncating to
    // that tail here (not just on a same-call write failure below) is what
    // keeps invariant 3 holding across process restarts, not just within
    // one call.
    let dat_pre_len = if existing_records == 0 {
        0
    } else {
        read_i32_at(&index_file, (existing_records - 1) * I32_SIZE as u64)? as u64
    };
    dat_file.set_len(dat_pre_len)?;

    let mut dat_buf = Vec::new();
    let mut index_buf = Vec::new();
    let mut running_end = dat_pre_len;
    for (i, message) in messages.iter().enumerate() {
        let seq = first_seq + i as i64;
        let crc = crc32_signed(&message.payload);
        dat_buf.extend_from_slice(&pack_i32(seq as i32));
        dat_buf.extend_from_slice(&pack_i32(crc));
        dat_buf.extend_from_slice(&pack_i32(message.payload.len() as i32));
        dat_buf.extend_from_slice(&pack_i32(message.time));
        dat_buf.extend_from_slice(&message.payload);
        running_end += (RECORD_HEADER_SIZE + message.payload.len()) as u64;
        index_buf.extend_from_slice(&pack_i32(running_end as i32));
    }

    dat_file.seek(SeekFrom::End(0))?;
    dat_file.write_all(&dat_buf)?;
    dat_file.flush()?;

    index_file.seek(SeekFrom::End(0))?;
    if let Err(err) = index_file.write_all(&index_buf) {
        // Invariant 3 repair: the .index append failed, so the .dat bytes
        // we just wrote are orphaned. Truncate .dat back to its pre-write
        // size; readers address records via .index, never by scanning
        // .dat, so the orphan bytes are otherwise silently ignored too.
        dat_file.set_len(dat_pre_len)?;
        return Err(err.into());
    }
    index_file.flush()?;

    Ok(first_seq)
}

/// The highest assigned sequence in this generation, i.e. the count of
/// records on disk: the start of the last segment plus its record count.
/// An empty topic (no `partitionIndex` yet) reads as `0`.
///
/// Repairs a missing-or-torn `partitionIndex` first (invariant 9): a
/// `length`/`max_offset` query is as likely to be the first operation
/// after a crash as a `push` is, so the read path can't assume
/// `current_partition` already ran.
pub fn local_max_offset(topic_dir: &Path) -> Result<i64> {
    repair_partition_index(topic_dir)?;
    let view = IndexView::open(&partition_index_path(topic_dir))?;
    if view.is_empty() {
        return Ok(0);
    }
    let stem = view.get(view.len() - 1) as i64;
    let count = match std::fs::metadata(index_path(topic_dir, stem)) {
        Ok(meta) => meta.len() / I32_SIZE as u64,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
        Err(err) => return Err(err.into()),
    };
    Ok(stem + count as i64)
}

/// Locate the segment stem containing absolute sequence `offset`.
pub fn find_segment(topic_dir: &Path, offset: i64) -> Result<Option<i64>> {
    repair_partition_index(topic_dir)?;
    let view = IndexView::open(&partition_index_path(topic_dir))?;
    Ok(view.segment_for(offset as i32).map(|i| view.get(i) as i64))
}

/// Read up to `limit` consecutive records starting at absolute sequence
/// `offset`, fanning out across segment boundaries as needed. Does not
/// touch the consumer cursor (`Topic::get_queue` uses this directly).
pub fn read_range(cache: &mut Cache, topic_dir: &Path, topic: &str, offset: i64, limit: usize) -> Result<Vec<SegmentRecord>> {
    repair_partition_index(topic_dir)?;
    let mut out = Vec::new();
    let partition = IndexView::open(&partition_index_path(topic_dir))?;
    if partition.is_empty() {
        return Ok(out);
    }
    let mut cursor = offset;
    while out.len() < limit {
        let Some(seg_idx) = partition.segment_for(cursor as i32) else {
            break;
        };
        let stem = partition.get(seg_idx) as i64;
        let next_stem = if seg_idx + 1 < partition.len() {
            Some(partition.get(seg_idx + 1) as i64)
        } else {
            None
        };
        let remaining_in_segment = match next_stem {
            Some(next) if cursor < next => (next - cursor) as usize,
            Some(_) => 0,
            None => usize::MAX,
        };
        if remaining_in_segment == 0 {
            break;
        }
        let want = (limit - out.len()).min(remaining_in_segment);
        let mut records = read_segment_range(cache, topic_dir, topic, stem, cursor, want)?;
        if records.is_empty() {
            break;
        }
        cursor += records.len() as i64;
        out.append(&mut records);
    }
    Ok(out)
}

/// Reads through the shared cache's read pool rather than opening fresh
/// `.dat`/`.index` descriptors: this is the hottest path in the engine
/// (every `pop`/`get_queue`/`get_message`), and `retry_io` can call it up
/// to 500 times in a row.
fn read_segment_range(
    cache: &mut Cache,
    topic_dir: &Path,
    topic: &str,
    stem: i64,
    offset: i64,
    limit: usize,
) -> Result<Vec<SegmentRecord>> {
    retry_io(500, Duration::from_millis(1), || {
        let mut dat = cache.get_read(topic, Role::Dat, &dat_path(topic_dir, stem))?.try_clone()?;
        let mut index = cache.get_read(topic, Role::Index, &index_path(topic_dir, stem))?.try_clone()?;
        let index_len = index.metadata()?.len() / I32_SIZE as u64;

        let mut out = Vec::new();
        let mut pos = (offset - stem) as u64;
        while out.len() < limit && pos < index_len {
            let end = read_i32_at(&mut index, pos * I32_SIZE as u64)? as u64;
            let start = if pos == 0 {
                0
            } else {
                read_i32_at(&mut index, (pos - 1) * I32_SIZE as u64)? as u64
            };
            dat.seek(SeekFrom::Start(start))?;
            let mut header = [0u8; RECORD_HEADER_SIZE];
            dat.read_exact(&mut header)?;
            let seq = unpack_i32(&header[0..4]);
            let crc = unpack_i32(&header[4..8]);
            let len = unpack_i32(&header[8..12]) as usize;
            let time = unpack_i32(&header[12..16]);
            if seq as i64 != stem + pos as i64 {
                return Err(Error::FileError("segment record sequence mismatch"));
            }
            let mut payload = vec![0u8; len];
            dat.read_exact(&mut payload)?;
            if start + (RECORD_HEADER_SIZE + len) as u64 != end {
                return Err(Error::FileError("segment record length disagrees with index"));
            }
            crate::codec::validate_crc(crc, &payload)?;
            out.push(SegmentRecord { seq: stem + pos as i64, crc, time, payload });
            pos += 1;
        }
        Ok(out)
    })
}

fn read_i32_at(file: &File, offset: u64) -> Result<i32> {
    let mut file = file.try_clone()?;
    crate::codec::read_i32_at(&mut file, offset)
}

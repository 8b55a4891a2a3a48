//! Topic façade (component G): the public surface that orchestrates the
//! segment store, delay log, cursor and generation manager into `push`,
//! `pop`, `get_queue`, and the offset/length queries.

use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::cache::Cache;
use crate::config::EngineConfig;
use crate::cursor;
use crate::delay;
use crate::error::{Error, Result};
use crate::generation;
use crate::segment::{self, PartitionOutcome, PendingRecord};

const ROLLOVER_RETRIES: u32 = 100;
const ROLLOVER_INTERVAL: Duration = Duration::from_millis(10);

/// One message as handed back across the public API: `{offset, hash, len,
/// time, payload, label}` from §6, `offset` widened to `i64` so it can
/// carry the generation-widened logical offset, `time` widened to `i64`
/// for header ergonomics even though the wire field is 32-bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub offset: i64,
    pub hash: i32,
    pub len: u32,
    pub time: i64,
    pub payload: Vec<u8>,
    pub label: u32,
}

/// A handle to one topic, borrowed from an `Engine` for the duration of a
/// call sequence. Mirrors a database handle's table/collection handle:
/// cheap to create, and scoped to the `Cache` borrow it holds.
pub struct Topic<'a> {
    cache: &'a mut Cache,
    root: &'a Path,
    dir: PathBuf,
    name: String,
    partition_size_bytes: u64,
    label_size: i64,
}

impl<'a> Topic<'a> {
    pub(crate) fn new(cache: &'a mut Cache, root: &'a Path, name: &str, config: &EngineConfig) -> Self {
        Self {
            cache,
            root,
            dir: root.join(name),
            name: name.to_string(),
            partition_size_bytes: config.partition_size_bytes(),
            label_size: config.label_size_value(),
        }
    }

    /// Single-item convenience: routes to the delay log if `delay_seconds
    /// > 0`, else straight to the segment store.
    pub fn push(&mut self, payload: Vec<u8>, delay_seconds: i32) -> Result<()> {
        self.push_multi(&[(delay_seconds, payload)])
    }

    /// The buffered batch path (§4.G `set_message`/`send`): groups `items`
    /// into one delay-log write and one segment append.
    pub fn push_multi(&mut self, items: &[(i32, Vec<u8>)]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)?;
        let now = unix_now();

        let mut delayed = Vec::new();
        let mut immediate = Vec::new();
        for (delay_seconds, payload) in items {
            if *delay_seconds > 0 {
                delayed.push((*delay_seconds, payload.clone()));
            } else {
                immediate.push(PendingRecord { time: now, payload: payload.clone() });
            }
        }

        if !delayed.is_empty() {
            delay::write(self.cache, &self.dir, &self.name, &delayed, now)?;
        }
        if !immediate.is_empty() {
            append_with_rollover(
                self.cache,
                self.root,
                &self.dir,
                &self.name,
                self.partition_size_bytes,
                self.label_size,
                &immediate,
            )?;
        }
        Ok(())
    }

    /// `pop(ignore_error=false)`: on any error, `ignore_error` swallows it
    /// and returns `None` instead of propagating (§4.G).
    pub fn pop(&mut self, ignore_error: bool) -> Result<Option<Message>> {
        match self.pop_inner() {
            Ok(value) => Ok(value),
            Err(_) if ignore_error => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn pop_inner(&mut self) -> Result<Option<Message>> {
        self.promote_delay()?;
        loop {
            let mut guard = cursor::open_for_update(self.cache, &self.dir, &self.name)?;
            let offset = guard.value();
            let mut records = segment::read_range(self.cache, &self.dir, &self.name, offset, 1)?;
            if let Some(record) = records.pop() {
                guard.advance_to(offset + 1)?;
                let label = generation::read_label(self.cache, &self.dir, &self.name)? as u32;
                return Ok(Some(Message {
                    offset: record.seq,
                    hash: record.crc,
                    len: record.payload.len() as u32,
                    time: record.time as i64,
                    payload: record.payload,
                    label,
                }));
            }
            drop(guard);
            if !segment::segment_lock_path(&self.dir).exists() {
                return Ok(None);
            }
            generation::rollover(self.cache, self.root, &self.dir, &self.name)?;
        }
    }

    /// Non-destructive range read across segment boundaries; never
    /// touches `current`.
    pub fn get_queue(&mut self, offset: i64, limit: usize) -> Result<Vec<Message>> {
        self.promote_delay()?;
        let label = generation::read_label(self.cache, &self.dir, &self.name)? as u32;
        let records = segment::read_range(self.cache, &self.dir, &self.name, offset, limit)?;
        Ok(records
            .into_iter()
            .map(|record| Message {
                offset: record.seq,
                hash: record.crc,
                len: record.payload.len() as u32,
                time: record.time as i64,
                payload: record.payload,
                label,
            })
            .collect())
    }

    /// Degenerate `get_queue(offset, 1)`.
    pub fn get_message(&mut self, offset: i64) -> Result<Option<Message>> {
        Ok(self.get_queue(offset, 1)?.into_iter().next())
    }

    /// `max(0, max_offset - current_offset)`, both taken local to the
    /// active generation so the subtraction can't straddle a rollover.
    pub fn length(&mut self) -> Result<i64> {
        self.promote_delay()?;
        let max = segment::local_max_offset(&self.dir)?;
        let current = cursor::read(self.cache, &self.dir, &self.name)?;
        Ok((max - current).max(0))
    }

    /// Runs delay promotion, then reads the last `partitionIndex` entry
    /// plus its segment's record count. `from_start` widens the result by
    /// every retired generation (`label_size * generation`).
    pub fn max_offset(&mut self, from_start: bool) -> Result<i64> {
        self.promote_delay()?;
        let local = segment::local_max_offset(&self.dir)?;
        self.widen(local, from_start)
    }

    /// Reads `current`; `from_start` widens it the same way as
    /// `max_offset`.
    pub fn current_offset(&mut self, from_start: bool) -> Result<i64> {
        let local = cursor::read(self.cache, &self.dir, &self.name)?;
        self.widen(local, from_start)
    }

    /// The active generation counter (0 for a topic that's never rolled
    /// over).
    pub fn label(&mut self) -> Result<i64> {
        generation::read_label(self.cache, &self.dir, &self.name)
    }

    fn widen(&mut self, local: i64, from_start: bool) -> Result<i64> {
        if from_start {
            let generation = generation::read_label(self.cache, &self.dir, &self.name)?;
            Ok(generation::global_offset(local, self.label_size, generation))
        } else {
            Ok(local)
        }
    }

    fn promote_delay(&mut self) -> Result<()> {
        let now = unix_now();
        let root = self.root.to_path_buf();
        let dir = self.dir.clone();
        let name = self.name.clone();
        let partition_size_bytes = self.partition_size_bytes;
        let label_size = self.label_size;
        delay::promote(self.cache, &dir, &name, now, partition_size_bytes, move |cache, records| {
            append_with_rollover(cache, &root, &dir, &name, partition_size_bytes, label_size, records)
        })
    }
}

/// Shared by the immediate-push path and delay promotion: resolve the
/// current segment, append, and hand off to the generation manager on
/// saturation, bounded to the rollover retry budget rather than recursing
/// (REDESIGN FLAGS).
///
/// A generation is only sealed once `current` has advanced past its final
/// sequence (§3 Lifecycles), so a saturated-but-undrained generation just
/// backs off: the rollover itself runs here only if this writer can see
/// the cursor has already caught up, and otherwise waits for a `pop` call
/// (ours or another process's) to notice there's nothing left to read and
/// perform it from the reader side instead.
fn append_with_rollover(
    cache: &mut Cache,
    root: &Path,
    dir: &Path,
    name: &str,
    partition_size_bytes: u64,
    label_size: i64,
    records: &[PendingRecord],
) -> Result<i64> {
    for _ in 0..ROLLOVER_RETRIES {
        match segment::current_partition(cache, dir, name, records.len() as i64, partition_size_bytes, label_size)? {
            PartitionOutcome::Ready(stem) => return segment::append(cache, dir, name, stem, records),
            PartitionOutcome::Saturated => {
                let drained = cursor::read(cache, dir, name)? >= segment::local_max_offset(dir)?;
                if drained {
                    generation::rollover(cache, root, dir, name)?;
                } else {
                    sleep(ROLLOVER_INTERVAL);
                }
            }
        }
    }
    Err(Error::CreateFailed("generation rollover exceeded retry budget"))
}

fn unix_now() -> i32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_secs() as i32
}

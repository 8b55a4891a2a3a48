//! Delay log (component D): an append-only, time-sorted-by-arrival log of
//! not-yet-due messages, promoted into the segment store on each read and
//! periodically compacted to drop its tombstoned prefix.
//!
//! `delayMessage` holds a 4-byte `valid_start` header followed by
//! `due_time:i32 | len:i32 | payload:len bytes` records; everything before
//! `valid_start` has already been promoted. `delayRead` carries forward
//! records a promotion pass saw but weren't due yet; `delayRebuild` and
//! `delayTemp` are transient files that exist only for the duration of a
//! compaction or promotion pass, and double as lock-free barriers against
//! concurrent writers (§5).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{Cache, Mode, Role};
use crate::codec::{pack_i32, read_i32_at, unpack_i32};
use crate::error::{Error, Result};
use crate::lock::{exponential_wait_absent, retry_io, ExclusiveLock};
use crate::segment::PendingRecord;

const DELAY_MESSAGE_FILE: &str = "delayMessage";
const DELAY_READ_FILE: &str = "delayRead";
const DELAY_REBUILD_FILE: &str = "delayRebuild";
const DELAY_TEMP_FILE: &str = "delayTemp";
const HEADER_SIZE: u64 = 4;

pub fn delay_message_path(topic_dir: &Path) -> PathBuf {
    topic_dir.join(DELAY_MESSAGE_FILE)
}

pub fn delay_read_path(topic_dir: &Path) -> PathBuf {
    topic_dir.join(DELAY_READ_FILE)
}

pub fn delay_rebuild_path(topic_dir: &Path) -> PathBuf {
    topic_dir.join(DELAY_REBUILD_FILE)
}

pub fn delay_temp_path(topic_dir: &Path) -> PathBuf {
    topic_dir.join(DELAY_TEMP_FILE)
}

/// Append `items` (`delay_seconds`, `payload`) to the delay log, due at
/// `now + delay_seconds`.
///
/// Waits out any in-progress compaction first: `delayRebuild`'s mere
/// existence is the barrier, polled with the 1µs→8192µs/14-doubling
/// schedule so a long-running compaction never gets starved by a writer
/// that keeps re-appending to the file it's trying to replace.
pub fn write(cache: &mut Cache, topic_dir: &Path, topic: &str, items: &[(i32, Vec<u8>)], now: i32) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }

    cache.close(Some(topic), Some(Role::DelayMessage));
    exponential_wait_absent(
        &delay_rebuild_path(topic_dir),
        Duration::from_micros(1),
        14,
        "delay rebuild barrier exceeded",
    )?;

    let path = delay_message_path(topic_dir);
    let mut file = cache.get_write(topic, Role::DelayMessage, &path, Mode::Append)?.try_clone()?;
    let _guard = ExclusiveLock::acquire(&file)?;

    let mut buf = Vec::new();
    if file.metadata()?.len() == 0 {
        buf.extend_from_slice(&pack_i32(HEADER_SIZE as i32));
    }
    for (delay_seconds, payload) in items {
        let due = now.saturating_add(*delay_seconds);
        append_record(&mut buf, due, payload);
    }

    file.seek(SeekFrom::End(0))?;
    file.write_all(&buf)?;
    file.flush()?;
    Ok(())
}

/// Drain matured entries from the delay log into the segment store via
/// `append_matured`, carrying forward anything still not due. Run at the
/// top of every `pop`/`length`/`max_offset` call (§4.D).
///
/// Compacts at most once per call: if `valid_start` is past the partition
/// size threshold during the quiet window, the log is rewritten to drop
/// its tombstoned prefix before the normal promotion pass runs — a second
/// compaction in the same call would be a no-op, so the loop is bounded to
/// two passes rather than retried until the predicate goes false.
pub fn promote(
    cache: &mut Cache,
    topic_dir: &Path,
    topic: &str,
    now: i32,
    partition_size_bytes: u64,
    mut append_matured: impl FnMut(&mut Cache, &[PendingRecord]) -> Result<i64>,
) -> Result<()> {
    let path = delay_message_path(topic_dir);
    if !path.exists() {
        return Ok(());
    }

    let mut compacted = false;
    loop {
        let mut file = cache.get_write(topic, Role::DelayMessage, &path, Mode::ReadWrite)?.try_clone()?;
        let valid_start = read_i32_at(&mut file, 0)?;
        file.seek(SeekFrom::Start(valid_start as u64))?;
        let guard = ExclusiveLock::acquire(&file)?;

        if !compacted && valid_start as u64 > partition_size_bytes && in_quiet_window(now) {
            compact(topic_dir, &mut file, valid_start)?;
            drop(guard);
            cache.close(Some(topic), Some(Role::DelayMessage));
            compacted = true;
            continue;
        }

        run_promotion_pass(cache, topic_dir, &mut file, now, &mut append_matured)?;
        return Ok(());
    }
}

fn run_promotion_pass(
    cache: &mut Cache,
    topic_dir: &Path,
    file: &mut File,
    now: i32,
    append_matured: &mut impl FnMut(&mut Cache, &[PendingRecord]) -> Result<i64>,
) -> Result<()> {
    let temp_path = delay_temp_path(topic_dir);
    let mut temp_file = File::create(&temp_path)?;
    let _temp_guard = ExclusiveLock::acquire(&temp_file)?;

    let mut matured = Vec::new();
    let mut temp_buf = Vec::new();

    let read_path = delay_read_path(topic_dir);
    if read_path.exists() {
        let mut read_file = File::open(&read_path)?;
        let _read_guard = ExclusiveLock::acquire(&read_file)?;
        while let Some((due, payload)) = read_record(&mut read_file)? {
            split(due, payload, now, &mut temp_buf, &mut matured);
        }
        drop(_read_guard);
        drop(read_file);
        std::fs::remove_file(&read_path)?;
    }

    while let Some((due, payload)) = read_record(file)? {
        split(due, payload, now, &mut temp_buf, &mut matured);
    }
    let consumed_to = file.stream_position()?;

    if !matured.is_empty() {
        append_matured(cache, &matured)?;
    }

    temp_file.write_all(&temp_buf)?;
    temp_file.flush()?;
    drop(_temp_guard);
    drop(temp_file);

    if temp_buf.is_empty() {
        let _ = std::fs::remove_file(&temp_path);
    } else {
        std::fs::rename(&temp_path, &read_path)?;
    }

    file.seek(SeekFrom::Start(0))?;
    file.write_all(&pack_i32(consumed_to as i32))?;
    file.flush()?;

    Ok(())
}

fn split(due: i32, payload: Vec<u8>, now: i32, temp_buf: &mut Vec<u8>, matured: &mut Vec<PendingRecord>) {
    if due > now {
        append_record(temp_buf, due, &payload);
    } else {
        matured.push(PendingRecord { time: due, payload });
    }
}

/// Rewrite `delayMessage` as `delayRebuild` with everything from
/// `valid_start` onward, re-based to a fresh `valid_start = 4`, then
/// atomically swap it in. Retries the swap up to 100x since the unlink
/// and rename are two syscalls, not one.
fn compact(topic_dir: &Path, file: &mut File, valid_start: i32) -> Result<()> {
    log::debug!("{}: compacting delay log, dropping tombstoned prefix of {valid_start} bytes", topic_dir.display());
    file.seek(SeekFrom::Start(valid_start as u64))?;
    let mut tail = Vec::new();
    file.read_to_end(&mut tail)?;

    let rebuild_path = delay_rebuild_path(topic_dir);
    let mut rebuild_file = File::create(&rebuild_path)?;
    rebuild_file.write_all(&pack_i32(HEADER_SIZE as i32))?;
    rebuild_file.write_all(&tail)?;
    rebuild_file.flush()?;
    drop(rebuild_file);

    let message_path = delay_message_path(topic_dir);
    retry_io(100, Duration::from_millis(10), || {
        match std::fs::remove_file(&message_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        std::fs::rename(&rebuild_path, &message_path)?;
        Ok(())
    })
}

fn append_record(buf: &mut Vec<u8>, due: i32, payload: &[u8]) {
    buf.extend_from_slice(&pack_i32(due));
    buf.extend_from_slice(&pack_i32(payload.len() as i32));
    buf.extend_from_slice(payload);
}

/// Read one `due|len|payload` record. A short read of `due`/`len`
/// themselves — the torn tail left by a crash mid-append, before the
/// header even landed — is treated as "no more records", not an error.
/// Once a full header has been read, `len` is a promise the writer made
/// about how many payload bytes follow; a short read at that point means
/// the payload itself was torn mid-write, which is corruption, not EOF.
fn read_record(file: &mut File) -> Result<Option<(i32, Vec<u8>)>> {
    let mut header = [0u8; 8];
    if !read_exact_or_eof(file, &mut header)? {
        return Ok(None);
    }
    let due = unpack_i32(&header[0..4]);
    let len = unpack_i32(&header[4..8]);
    if len < 0 {
        return Ok(None);
    }
    let mut payload = vec![0u8; len as usize];
    if !read_exact_or_eof(file, &mut payload)? {
        return Err(Error::FileError("delay record payload truncated"));
    }
    Ok(Some((due, payload)))
}

/// Like `Read::read_exact`, but a short read (including zero bytes) is
/// reported as `Ok(false)` instead of `UnexpectedEof`.
fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(true)
}

fn in_quiet_window(now: i32) -> bool {
    (2..=6).contains(&local_hour(now))
}

fn local_hour(now: i32) -> i32 {
    unsafe {
        let time = now as libc::time_t;
        let mut tm: libc::tm = std::mem::zeroed();
        libc::localtime_r(&time, &mut tm);
        tm.tm_hour
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_promote_splits_on_due_time() {
        let dir = tempfile::tempdir().unwrap();
        let topic_dir = dir.path();
        let mut cache = Cache::new();

        write(&mut cache, topic_dir, "t", &[(1, b"soon".to_vec()), (60, b"later".to_vec())], 1_000).unwrap();
        cache.close(None, None);

        let mut promoted = Vec::new();
        promote(&mut cache, topic_dir, "t", 1_001, 1 << 20, |_cache, records| {
            promoted.extend(records.iter().map(|r| r.payload.clone()));
            Ok(0)
        })
        .unwrap();

        assert_eq!(promoted, vec![b"soon".to_vec()]);
        assert!(delay_read_path(topic_dir).exists());
    }

    #[test]
    fn carried_forward_record_matures_on_a_later_pass() {
        let dir = tempfile::tempdir().unwrap();
        let topic_dir = dir.path();
        let mut cache = Cache::new();

        write(&mut cache, topic_dir, "t", &[(60, b"later".to_vec())], 1_000).unwrap();
        cache.close(None, None);

        let mut promoted = Vec::new();
        promote(&mut cache, topic_dir, "t", 1_001, 1 << 20, |_cache, records| {
            promoted.extend(records.iter().map(|r| r.payload.clone()));
            Ok(0)
        })
        .unwrap();
        assert!(promoted.is_empty());
        assert!(delay_read_path(topic_dir).exists());

        promote(&mut cache, topic_dir, "t", 1_061, 1 << 20, |_cache, records| {
            promoted.extend(records.iter().map(|r| r.payload.clone()));
            Ok(0)
        })
        .unwrap();
        assert_eq!(promoted, vec![b"later".to_vec()]);
    }

    #[test]
    fn promote_on_missing_log_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = Cache::new();
        promote(&mut cache, dir.path(), "t", 0, 1 << 20, |_cache, _records| Ok(0)).unwrap();
    }

    #[test]
    fn write_waits_out_an_existing_rebuild_barrier() {
        let dir = tempfile::tempdir().unwrap();
        let topic_dir = dir.path();
        std::fs::write(delay_rebuild_path(topic_dir), b"").unwrap();
        let mut cache = Cache::new();
        let result = write(&mut cache, topic_dir, "t", &[(0, b"x".to_vec())], 0);
        assert!(matches!(result, Err(crate::error::Error::CreateFailed(_))));
    }

    #[test]
    fn compact_preserves_due_later_than_now_set_of_payloads() {
        // Exercises `compact` directly rather than through `promote`'s
        // hour-of-day gate (§9 open question 1), since the gate depends on
        // the test runner's local timezone and would make this flaky.
        let dir = tempfile::tempdir().unwrap();
        let topic_dir = dir.path();
        let mut cache = Cache::new();

        write(&mut cache, topic_dir, "t", &[(100, b"keep-a".to_vec()), (1, b"drop-me".to_vec()), (200, b"keep-b".to_vec())], 0)
            .unwrap();
        // Promote at a time past only the first delayed item's due time, so
        // the log ends up with a non-zero `valid_start` to compact away.
        promote(&mut cache, topic_dir, "t", 1, 1 << 20, |_cache, _records| Ok(0)).unwrap();
        cache.close(None, None);

        let path = delay_message_path(topic_dir);
        let mut file = std::fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let valid_start = read_i32_at(&mut file, 0).unwrap();
        assert!(valid_start > HEADER_SIZE as i32, "drop-me should have advanced valid_start");

        compact(topic_dir, &mut file, valid_start).unwrap();
        drop(file);

        // After compaction the log should contain exactly the still-due
        // payloads (keep-a, keep-b), now re-based behind a fresh header.
        let mut cache = Cache::new();
        let mut promoted = Vec::new();
        promote(&mut cache, topic_dir, "t", 10_000, 1 << 20, |_cache, records| {
            promoted.extend(records.iter().map(|r| r.payload.clone()));
            Ok(0)
        })
        .unwrap();
        promoted.sort();
        assert_eq!(promoted, vec![b"keep-a".to_vec(), b"keep-b".to_vec()]);
    }

    #[test]
    fn torn_tail_is_ignored_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let topic_dir = dir.path();
        let mut cache = Cache::new();
        write(&mut cache, topic_dir, "t", &[(0, b"ok".to_vec())], 0).unwrap();
        cache.close(None, None);

        let path = delay_message_path(topic_dir);
        let mut contents = std::fs::read(&path).unwrap();
        contents.extend_from_slice(&[0, 0, 0, 100]);
        std::fs::write(&path, &contents).unwrap();

        let mut promoted = Vec::new();
        promote(&mut cache, topic_dir, "t", 100, 1 << 20, |_cache, records| {
            promoted.extend(records.iter().map(|r| r.payload.clone()));
            Ok(0)
        })
        .unwrap();
        assert_eq!(promoted, vec![b"ok".to_vec()]);
    }

    #[test]
    fn torn_payload_after_a_whole_header_is_a_file_error() {
        let dir = tempfile::tempdir().unwrap();
        let topic_dir = dir.path();
        let mut cache = Cache::new();
        write(&mut cache, topic_dir, "t", &[(0, b"ok".to_vec())], 0).unwrap();
        cache.close(None, None);

        let path = delay_message_path(topic_dir);
        let mut contents = std::fs::read(&path).unwrap();
        // A whole due|len header promising a 50-byte payload, with none of
        // it actually written: the header parsed fine, so this is corruption,
        // not a torn tail that can be silently treated as EOF.
        contents.extend_from_slice(&pack_i32(0));
        contents.extend_from_slice(&pack_i32(50));
        std::fs::write(&path, &contents).unwrap();

        let result = promote(&mut cache, topic_dir, "t", 100, 1 << 20, |_cache, _records| Ok(0));
        assert!(matches!(result, Err(crate::error::Error::FileError(_))));
    }
}

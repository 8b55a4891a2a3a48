//! Consumer cursor (component E): `current` stores the next sequence
//! number to read in the active generation.
//!
//! `pop` needs the read-modify-write (read cursor, fetch the message at
//! that sequence, advance the cursor on success) to happen under one
//! continuously-held lock, so this module hands out a guard rather than
//! separate read/write functions — `Topic::pop` holds the guard across
//! its call into the segment store.

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::cache::{Cache, Mode, Role};
use crate::codec::{pack_i32, read_i32_at};
use crate::error::Result;
use crate::lock::ExclusiveLock;

const CURRENT_FILE: &str = "current";

pub fn current_path(topic_dir: &Path) -> PathBuf {
    topic_dir.join(CURRENT_FILE)
}

/// Read the cursor without locking, for non-destructive queries
/// (`current_offset`). A missing or truncated file reads as `0`, the
/// natural "nothing consumed yet" state.
pub fn read(cache: &mut Cache, topic_dir: &Path, topic: &str) -> Result<i64> {
    let path = current_path(topic_dir);
    if !path.exists() {
        return Ok(0);
    }
    let mut file = cache.get_read(topic, Role::Current, &path)?.try_clone()?;
    if file.metadata()?.len() < 4 {
        return Ok(0);
    }
    Ok(read_i32_at(&mut file, 0)? as i64)
}

/// Holds the cursor's exclusive lock for the duration of one `pop`.
pub struct CursorGuard {
    file: std::fs::File,
    value: i64,
    _lock: ExclusiveLock,
}

impl CursorGuard {
    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn advance_to(&mut self, new_value: i64) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&pack_i32(new_value as i32))?;
        self.file.flush()?;
        self.value = new_value;
        Ok(())
    }
}

/// Acquire the cursor's exclusive lock and read its current value.
pub fn open_for_update(cache: &mut Cache, topic_dir: &Path, topic: &str) -> Result<CursorGuard> {
    let path = current_path(topic_dir);
    let mut file = cache.get_write(topic, Role::Current, &path, Mode::ReadWrite)?.try_clone()?;
    let lock = ExclusiveLock::acquire(&file)?;
    let len = file.metadata()?.len();
    let value = if len < 4 { 0 } else { read_i32_at(&mut file, 0)? as i64 };
    Ok(CursorGuard { file, value, _lock: lock })
}

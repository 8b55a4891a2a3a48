//! Generation manager (component F): rolls an entire topic directory into
//! a suffixed backup when its sequence counter saturates, and promotes the
//! pre-created successor directory into its place.
//!
//! A generation is saturated when `current_partition` finds
//! `last_seq + pad_count > label_size`; it marks the topic with a `lock`
//! sentinel and hands off here. Both the writer that hit the saturation
//! and a reader whose `pop` can't find its cursor's sequence call the same
//! `rollover`: whichever gets there first does the directory rename dance,
//! the other just observes `lock` is already gone by the time it's their
//! turn to retry.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use crate::cache::{Cache, Role};
use crate::codec::{pack_i32, read_i32_at};
use crate::error::{Error, Result};
use crate::lock::spin_wait_absent;
use crate::segment::segment_lock_path;

const LABEL_FILE: &str = "label";
const ROLLOVER_RETRIES: u32 = 100;
const ROLLOVER_INTERVAL: Duration = Duration::from_millis(10);

pub fn label_path(topic_dir: &Path) -> PathBuf {
    topic_dir.join(LABEL_FILE)
}

fn successor_dir(root: &Path, topic: &str, generation: i64) -> PathBuf {
    root.join(format!("{topic}_{generation}"))
}

fn retired_dir(root: &Path, topic: &str, generation: i64) -> PathBuf {
    root.join(format!("{topic}_h_{generation}"))
}

fn cross_topic_lock_path(root: &Path, topic: &str) -> PathBuf {
    root.join(format!("{topic}.lock"))
}

/// Read the generation counter for `topic_dir`; a topic on its first
/// generation has no `label` file, which reads as `0`.
pub fn read_label(cache: &mut Cache, topic_dir: &Path, topic: &str) -> Result<i64> {
    let path = label_path(topic_dir);
    if !path.exists() {
        return Ok(0);
    }
    let mut file = cache.get_read(topic, Role::Label, &path)?.try_clone()?;
    if file.metadata()?.len() < 4 {
        return Ok(0);
    }
    Ok(read_i32_at(&mut file, 0)? as i64)
}

/// Roll `topic_dir` over to its successor generation if a saturation
/// sentinel (`lock`) is present; a no-op if it isn't, or if another
/// process already cleared it. Retries transient I/O failures up to
/// 100 times at 10ms, per §4.F.
pub fn rollover(cache: &mut Cache, root: &Path, topic_dir: &Path, topic: &str) -> Result<()> {
    for _ in 0..ROLLOVER_RETRIES {
        if !segment_lock_path(topic_dir).exists() {
            return Ok(());
        }
        match try_rollover_once(cache, root, topic_dir, topic) {
            Ok(()) => return Ok(()),
            Err(Error::Io(_)) => sleep(ROLLOVER_INTERVAL),
            Err(other) => return Err(other),
        }
    }
    Err(Error::CreateFailed("generation rollover exceeded retry budget"))
}

fn try_rollover_once(cache: &mut Cache, root: &Path, topic_dir: &Path, topic: &str) -> Result<()> {
    let label = read_label(cache, topic_dir, topic)?;
    let new_generation = label + 1;
    let successor = successor_dir(root, topic, new_generation);
    if !successor.exists() {
        std::fs::create_dir_all(&successor)?;
        std::fs::write(label_path(&successor), pack_i32(new_generation as i32))?;
    }

    let cross_lock = cross_topic_lock_path(root, topic);
    let claimed = match OpenOptions::new().write(true).create_new(true).open(&cross_lock) {
        Ok(_) => true,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => false,
        Err(err) => return Err(err.into()),
    };
    if !claimed {
        // Someone else is mid-rollover; wait it out and let the caller's
        // outer loop re-check whether `lock` is already gone.
        spin_wait_absent(&cross_lock, ROLLOVER_RETRIES, ROLLOVER_INTERVAL, "rollover cross-topic lock held past retry budget")?;
        return Ok(());
    }

    cache.close(Some(topic), None);
    log::info!("{topic}: rolling over to generation {new_generation}");
    let result = change_topic_store(root, topic_dir, topic, new_generation, &successor);
    let _ = std::fs::remove_file(&cross_lock);
    result
}

/// `changeTopicStore`: retire `topic_dir` under a `_h_<gen>` suffix,
/// migrate its in-flight delay state into the successor, then promote the
/// successor into `topic_dir`'s place. Any failure reverses every
/// completed rename, in LIFO order, before propagating the error.
fn change_topic_store(root: &Path, topic_dir: &Path, topic: &str, new_generation: i64, successor: &Path) -> Result<()> {
    if !successor.is_dir() {
        return Err(Error::CreateFailed("rollover successor directory missing"));
    }

    let retired = retired_dir(root, topic, new_generation);
    let mut completed: Vec<(PathBuf, PathBuf)> = Vec::new();

    if let Err(err) = std::fs::rename(topic_dir, &retired) {
        return Err(err.into());
    }
    completed.push((topic_dir.to_path_buf(), retired.clone()));

    for name in ["delayMessage", "delayRead"] {
        let src = retired.join(name);
        if src.exists() {
            let dst = successor.join(name);
            if let Err(err) = std::fs::rename(&src, &dst) {
                rollback(&completed);
                return Err(err.into());
            }
            completed.push((src, dst));
        }
    }

    if let Err(err) = std::fs::rename(successor, topic_dir) {
        rollback(&completed);
        return Err(err.into());
    }

    Ok(())
}

fn rollback(completed: &[(PathBuf, PathBuf)]) {
    for (from, to) in completed.iter().rev() {
        let _ = std::fs::rename(to, from);
    }
}

/// `maxOffset`/`currentOffset`'s logical-offset formula: a sequence local
/// to the active generation, widened by every generation already retired.
pub fn global_offset(local_offset: i64, label_size: i64, generation: i64) -> i64 {
    local_offset + label_size * generation
}

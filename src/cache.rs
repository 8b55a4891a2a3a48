//! Resource cache (component B): two keyed pools — read and write — of
//! open file handles, keyed by `(topic, role)`.
//!
//! A cache entry is only ever replaced when its path or open mode changes
//! (a new segment stem, say); `get` transparently closes the stale handle
//! and reopens. No handle is shared between the read and write pools, so
//! `flock` semantics stay unambiguous: the write path always has its own
//! descriptor. Every lock taken against a cached handle is released by the
//! caller (an `ExclusiveLock` guard scoped to one call) before the handle
//! is ever evicted, so eviction never needs to release a lock itself.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// The fixed set of files a topic directory can hold a cached handle for.
/// `Dat`/`Index` are per-segment (the stem changes as segments roll), so
/// their fingerprint is the full path, not just the role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Dat,
    Index,
    Current,
    DelayMessage,
    PartitionIndex,
    Label,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    /// Create-if-absent, read-write, positioned for appends.
    Append,
    /// Read-write of an existing file at an arbitrary offset (cursor/label
    /// rewrites, delay-log header rewrites).
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    path: PathBuf,
    mode: Mode,
}

#[derive(Default)]
pub struct Cache {
    read_pool: HashMap<(String, Role), (Fingerprint, File)>,
    write_pool: HashMap<(String, Role), (Fingerprint, File)>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch (or open-and-cache) a handle from the read pool.
    pub fn get_read(&mut self, topic: &str, role: Role, path: &Path) -> Result<&File> {
        self.get(&mut Pool::Read, topic, role, path, Mode::Read)
    }

    /// Fetch (or open-and-cache) a handle from the write pool with the
    /// given open mode.
    pub fn get_write(&mut self, topic: &str, role: Role, path: &Path, mode: Mode) -> Result<&File> {
        debug_assert_ne!(mode, Mode::Read, "write pool never opens read-only");
        self.get(&mut Pool::Write, topic, role, path, mode)
    }

    fn get(&mut self, pool: &mut Pool, topic: &str, role: Role, path: &Path, mode: Mode) -> Result<&File> {
        let map = match pool {
            Pool::Read => &mut self.read_pool,
            Pool::Write => &mut self.write_pool,
        };
        let key = (topic.to_string(), role);
        let wanted = Fingerprint { path: path.to_path_buf(), mode };
        let needs_reopen = match map.get(&key) {
            Some((cached, _)) => cached != &wanted,
            None => true,
        };
        if needs_reopen {
            let file = open(path, mode)?;
            map.insert(key.clone(), (wanted, file));
        }
        Ok(&map.get(&key).expect("just inserted").1)
    }

    /// Close cached handles. `topic`/`role` narrow the subset; `None`
    /// means "all topics" / "all roles" respectively. No-op for entries
    /// that aren't cached.
    pub fn close(&mut self, topic: Option<&str>, role: Option<Role>) {
        close_matching(&mut self.read_pool, topic, role);
        close_matching(&mut self.write_pool, topic, role);
    }
}

enum Pool {
    Read,
    Write,
}

fn close_matching(map: &mut HashMap<(String, Role), (Fingerprint, File)>, topic: Option<&str>, role: Option<Role>) {
    map.retain(|(t, r), _| {
        let topic_matches = topic.map_or(false, |want| want == t);
        let role_matches = role.map_or(true, |want| want == *r);
        !(topic_matches && role_matches)
    });
}

fn open(path: &Path, mode: Mode) -> Result<File> {
    let file = match mode {
        Mode::Read => OpenOptions::new().read(true).open(path)?,
        Mode::Append => OpenOptions::new().create(true).read(true).append(true).open(path)?,
        Mode::ReadWrite => OpenOptions::new().create(true).read(true).write(true).open(path)?,
    };
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn reopens_on_path_change() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.dat");
        let b = dir.path().join("b.dat");
        std::fs::write(&a, b"aaa").unwrap();
        std::fs::write(&b, b"bbb").unwrap();

        let mut cache = Cache::new();
        {
            let f = cache.get_read("t", Role::Dat, &a).unwrap();
            let mut buf = [0u8; 3];
            std::io::Read::read_exact(&mut { f.try_clone().unwrap() }, &mut buf).unwrap();
            assert_eq!(&buf, b"aaa");
        }
        let f = cache.get_read("t", Role::Dat, &b).unwrap();
        let mut buf = [0u8; 3];
        std::io::Read::read_exact(&mut { f.try_clone().unwrap() }, &mut buf).unwrap();
        assert_eq!(&buf, b"bbb");
    }

    #[test]
    fn close_narrows_by_topic_and_role() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.dat");
        std::fs::write(&path, b"x").unwrap();
        let mut cache = Cache::new();
        cache.get_read("t1", Role::Dat, &path).unwrap();
        cache.get_read("t2", Role::Dat, &path).unwrap();
        cache.close(Some("t1"), None);
        assert!(cache.read_pool.contains_key(&("t2".to_string(), Role::Dat)));
        assert!(!cache.read_pool.contains_key(&("t1".to_string(), Role::Dat)));
    }

    #[test]
    fn write_handle_survives_external_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w.dat");
        let mut cache = Cache::new();
        {
            let f = cache.get_write("t", Role::Dat, &path, Mode::Append).unwrap();
            let mut f = f.try_clone().unwrap();
            f.write_all(b"hello").unwrap();
        }
        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents, b"hello");
    }
}

//! Top-level entry point: owns the root directory and the shared resource
//! cache, and hands out `Topic` handles the way a database handle hands
//! out table handles. Absent from the distilled spec, which only names
//! the topic façade — the natural Rust shape for "one root directory
//! containing N topic directories".

use std::collections::HashMap;

use crate::cache::Cache;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::topic::Topic;

pub struct Engine {
    cache: Cache,
    config: EngineConfig,
}

impl Engine {
    /// Open (creating if absent) the root directory named by `config`.
    /// Topic subdirectories themselves are created lazily on first push.
    pub fn open(config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.folder)?;
        Ok(Self { cache: Cache::new(), config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Borrow a handle to `name`'s topic directory. Cheap; scoped to the
    /// `Cache` borrow, so only one `Topic` can be live at a time.
    pub fn topic(&mut self, name: &str) -> Topic<'_> {
        Topic::new(&mut self.cache, &self.config.folder, name, &self.config)
    }

    /// The buffered, multi-topic batch path (§4.G `set_message`/`send`):
    /// accumulate items across topics, then flush each topic with one
    /// `push_multi` call.
    pub fn batch(&mut self) -> Batch<'_> {
        Batch { engine: self, items: HashMap::new() }
    }
}

pub struct Batch<'a> {
    engine: &'a mut Engine,
    items: HashMap<String, Vec<(i32, Vec<u8>)>>,
}

impl<'a> Batch<'a> {
    pub fn push(&mut self, topic: &str, payload: Vec<u8>, delay_seconds: i32) -> &mut Self {
        self.items.entry(topic.to_string()).or_default().push((delay_seconds, payload));
        self
    }

    /// Flush every accumulated topic's items in one `push_multi` call
    /// each. Topics are independent: a failure on one topic still lets
    /// the caller know which items never made it (the error surfaces as
    /// soon as its topic is flushed; topics queued after it are skipped).
    pub fn send(&mut self) -> Result<()> {
        for (topic, items) in self.items.drain() {
            self.engine.topic(&topic).push_multi(&items)?;
        }
        Ok(())
    }
}

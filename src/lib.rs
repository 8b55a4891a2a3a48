//! A durable, file-backed FIFO message queue engine.
//!
//! Supports multiple named topics, immediate and time-delayed messages,
//! crash-safe append semantics under multi-process concurrency, and
//! unbounded lifetime via generational rollover once a topic's sequence
//! counter saturates. The engine is synchronous and blocking; all
//! concurrency between processes is mediated by advisory file locks,
//! marker files, and atomic renames — there are no background threads.
//!
//! # Example
//!
//! ```no_run
//! use fifoq::{Engine, EngineConfig};
//!
//! let mut engine = Engine::open(EngineConfig::new("/var/lib/fifoq"))?;
//! engine.topic("jobs").push(b"do the thing".to_vec(), 0)?;
//! if let Some(msg) = engine.topic("jobs").pop(false)? {
//!     println!("got {} bytes", msg.payload.len());
//! }
//! # Ok::<(), fifoq::Error>(())
//! ```

pub mod cache;
pub mod codec;
pub mod config;
pub mod cursor;
pub mod delay;
pub mod engine;
pub mod error;
pub mod generation;
pub mod lock;
pub mod mmap;
pub mod segment;
pub mod topic;

pub use config::EngineConfig;
pub use engine::{Batch, Engine};
pub use error::{Error, Result};
pub use topic::{Message, Topic};

//! # shale
//!
//! A crash-safe, single-writer / multi-reader storage backend for
//! full-text search engines.
//!
//! ## Features
//!
//! - Six revision-numbered tables (postings, positions, termlists,
//!   synonyms, spelling data, document records) committed atomically
//! - Copy-on-write blocks with double-buffered base files, so readers
//!   never block on the writer
//! - In-memory write buffering with a configurable flush threshold
//! - Binary changeset emission and a replication driver that streams
//!   full snapshots or incremental changesets to followers
//! - Per-document value slots with per-slot statistics
//! - Arbitrary key/value metadata

pub mod changeset;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod lock;
pub mod position;
pub mod postlist;
pub mod record;
pub mod replication;
pub mod spelling;
pub mod stats;
pub mod synonym;
pub mod table;
pub mod termlist;
pub mod util;
pub mod values;
pub mod version;

pub use config::DatabaseConfig;
pub use database::{Action, Database, WritableDatabase};
pub use document::Document;
pub use error::{Result, ShaleError};

/// A document id. Ids are positive; 0 is reserved.
pub type DocId = u32;

/// A revision number shared by all tables at a committed point in time.
pub type Revision = u64;

/// A value slot number.
pub type Slot = u32;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

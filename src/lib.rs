#![forbid(unsafe_code)]

//! nebby: concurrent directory indexer.
//!
//! Walks a directory tree in two phases (count, then parallel visit), splits
//! every subdirectory name into fields and stores the result in a SQLite
//! database with a `valid` table and an optional `invalid` table.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use nebby::prelude::*;
//!
//! let request = IndexRequest {
//!     root: "/srv/music".into(),
//!     database: "/tmp/music.db".into(),
//!     options: WriteOptions {
//!         splitter: Splitter::char('_'),
//!         columns: ColumnSpec::parse("artist,album"),
//!         keep_invalid: true,
//!     },
//! };
//! let session = IndexingSession::new(request, WalkerConfig::default());
//! let outcome = session.start()?.wait();
//! println!("{outcome:?}");
//! # Ok::<(), NebbyError>(())
//! ```

pub mod prelude;

pub mod core;
pub mod indexer;
pub mod logger;
pub mod store;

//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use nebby::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{NebbyError, Result};
pub use crate::core::recent::{RecentDatabase, RecentDatabaseStore};

// Indexer
pub use crate::indexer::cancel::CancellationToken;
pub use crate::indexer::session::{
    CompletionHandle, IndexRequest, IndexingSession, SessionOutcome, SessionState,
};
pub use crate::indexer::walker::{DirectoryRecord, DirectoryWalker, WalkerConfig};

// Store
pub use crate::store::classify::{Classification, classify};
pub use crate::store::columns::{ColumnSpec, Splitter};
pub use crate::store::reader::{IndexReader, InvalidRecord, TableView};
pub use crate::store::writer::{DatabaseWriter, WriteOptions, WriteSummary};

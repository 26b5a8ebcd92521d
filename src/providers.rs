//! Collaborator interfaces the pipeline depends on.
//!
//! The pipeline never talks to Postgres, the filesystem, an LLM endpoint or
//! a shared cache directly; it goes through these traits. The bundled
//! implementations live in `db`, `file_loader`, `llm` and `cache`.

use crate::analyzer::DescriptiveStats;
use crate::error::Result;
use crate::schema::SchemaDescription;
use crate::table::TableData;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Reference to an uploaded tabular file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub path: PathBuf,
}

impl FileHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// A connection checked out of a provider's pool. Dropping it returns the
/// connection to the pool on every exit path.
#[async_trait]
pub trait QueryConnection: Send {
    /// Run a read-only statement and return the result rows.
    async fn run_select(&mut self, sql: &str) -> Result<TableData>;
}

/// Yields schema descriptions and query-capable connections for one
/// relational source.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Stable identifier of this source, used in fingerprints.
    fn identity(&self) -> String;

    /// Current schema snapshot, including a version token.
    async fn schema(&self) -> Result<SchemaDescription>;

    /// Acquire a pooled connection. Blocks up to the configured timeout
    /// and fails with `PoolExhausted` rather than waiting forever.
    async fn acquire(&self) -> Result<Box<dyn QueryConnection>>;
}

/// Loads uploaded tabular files into memory, enforcing a byte limit
/// before any parsing happens.
#[async_trait]
pub trait FileProvider: Send + Sync {
    /// Content hash of the file, used in fingerprints.
    fn content_hash(&self, handle: &FileHandle) -> Result<String>;

    /// Load the file as an in-memory table.
    async fn load(&self, handle: &FileHandle) -> Result<TableData>;
}

/// Narrow interface to the language-inference service. May be slow or
/// unreliable; the pipeline always calls it under a hard deadline.
#[async_trait]
pub trait LanguageInference: Send + Sync {
    /// Produce a candidate SQL query for a question against a schema.
    async fn infer_sql(&self, question: &str, schema: &SchemaDescription) -> Result<String>;

    /// Produce a short narrative summary of an analysis result.
    async fn infer_narrative(
        &self,
        question: &str,
        table: &TableData,
        stats: &DescriptiveStats,
    ) -> Result<String>;
}

/// Shared (cross-process) cache tier: a plain key/value store with TTL.
#[async_trait]
pub trait SharedCacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
}

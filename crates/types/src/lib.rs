use std::path::PathBuf;
use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum InboxError {
    #[cfg(feature = "rusqlite-errors")]
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    /// Mirror unreadable, or the resume commit is gone from history.
    #[error("extraction error: {0}")]
    Extraction(String),
    #[cfg(feature = "git2-errors")]
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store connection lock poisoned")]
    Lock,
}

pub type Result<T> = std::result::Result<T, InboxError>;

// ── Domain types ──────────────────────────────────────────────────────────

/// One stored email, keyed by its Message-ID.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub message_id: String,
    pub subject: Option<String>,
    pub from_addr: Option<String>,
    pub from_name: Option<String>,
    pub date_sent: Option<i64>,
    pub commit_id: String,
    pub root_message_id: String,
}

impl Message {
    pub fn is_root(&self) -> bool {
        self.message_id == self.root_message_id
    }
}

/// Resume checkpoint: the last commit consumed and how many commits precede it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Watermark {
    pub commit_id: String,
    pub position: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SkippedCommit {
    pub commit_id: String,
    pub reason: String,
}

/// Everything one batch transaction writes.
#[derive(Debug, Clone)]
pub struct IndexBatch {
    pub messages: Vec<Message>,
    pub skipped: Vec<SkippedCommit>,
    pub watermark: Watermark,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
pub struct IndexSummary {
    pub commits_scanned: usize,
    pub messages_indexed: usize,
    pub commits_without_message: usize,
    pub batches_committed: usize,
    pub skipped: Vec<SkippedCommit>,
    pub watermark: Option<Watermark>,
}

// ── Query result types ────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ThreadSummary {
    pub message_id: String,
    pub root_message_id: String,
    pub subject: Option<String>,
    pub from_name: Option<String>,
    pub from_addr: Option<String>,
    pub date_sent: Option<i64>,
    pub message_count: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStats {
    pub message_count: usize,
    pub thread_count: usize,
    pub skipped_count: usize,
    pub watermark: Option<Watermark>,
    pub last_indexed_at: Option<i64>,
    pub last_error: Option<String>,
}

// ── Config ────────────────────────────────────────────────────────────────

pub const DEFAULT_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub mirror_path: PathBuf,
    /// Branch or revspec to index; `None` follows the mirror's HEAD.
    pub branch: Option<String>,
    /// Commits per transaction.
    pub batch_size: usize,
    /// Ignore the stored watermark and re-walk the whole history.
    pub from_scratch: bool,
}

impl IndexConfig {
    pub fn new(mirror_path: impl Into<PathBuf>) -> Self {
        Self {
            mirror_path: mirror_path.into(),
            branch: None,
            batch_size: DEFAULT_BATCH_SIZE,
            from_scratch: false,
        }
    }
}

// ── Core traits ───────────────────────────────────────────────────────────

/// Point lookups of a message's stored thread root.
pub trait RootLookup {
    fn root_of(&self, message_id: &str) -> Result<Option<String>>;
}

pub trait Store: RootLookup + Send + Sync {
    // Indexer state
    fn get_watermark(&self) -> Result<Option<Watermark>>;
    /// Writes rows, skip records and the watermark in one transaction.
    fn commit_batch(&self, batch: &IndexBatch) -> Result<()>;
    fn record_error(&self, error: &str) -> Result<()>;

    // Serving queries
    fn get_message(&self, message_id: &str) -> Result<Option<Message>>;
    fn thread_messages(&self, root_message_id: &str) -> Result<Vec<Message>>;
    fn thread_containing(&self, message_id: &str) -> Result<Vec<Message>>;
    fn recent_messages(&self, limit: usize) -> Result<Vec<Message>>;
    fn search_threads(&self, query: Option<&str>, limit: usize) -> Result<Vec<ThreadSummary>>;

    // Admin
    fn list_skipped(&self, limit: usize) -> Result<Vec<SkippedCommit>>;
    fn stats(&self) -> Result<IndexStats>;
}

pub trait Indexer: Send + Sync {
    fn index_mirror(&self, config: &IndexConfig, store: &dyn Store) -> Result<IndexSummary>;
}

// ── Tests ─────────────────────────────────────────────────────────────────

use std::collections::HashMap;

use inboxmux_types::{
    IndexBatch, IndexConfig, IndexSummary, InboxError, Message, Result, RootLookup,
    SkippedCommit, Store, Watermark,
};

use crate::header::parse_message;
use crate::mirror::{Mirror, RawMail};
use crate::resolve::resolve_root;

pub struct Git2Indexer;

impl Git2Indexer {
    pub fn new() -> Self {
        Git2Indexer
    }
}

impl Default for Git2Indexer {
    fn default() -> Self {
        Git2Indexer::new()
    }
}

impl inboxmux_types::Indexer for Git2Indexer {
    fn index_mirror(&self, config: &IndexConfig, store: &dyn Store) -> Result<IndexSummary> {
        if config.batch_size == 0 {
            return Err(InboxError::Config("batch size must be at least 1".into()));
        }

        let result = Pass::new(store, config.batch_size, config.from_scratch).run(config);

        if let Err(ref e) = result {
            log::error!("indexing pass failed: {}", e);
            // Best-effort; the pass error is what the caller needs.
            if let Err(record_err) = store.record_error(&e.to_string()) {
                log::warn!("failed to record indexing error: {}", record_err);
            }
        }
        result
    }
}

/// Resolves roots against the uncommitted batch first, then the store.
///
/// A from-scratch pass never reads the store: rows this pass has not reached
/// yet carry roots that are about to be rewritten. `rewritten` holds the roots
/// committed earlier in the same pass instead.
struct BatchLookup<'a> {
    pending: &'a HashMap<String, String>,
    rewritten: Option<&'a HashMap<String, String>>,
    store: &'a dyn Store,
}

impl RootLookup for BatchLookup<'_> {
    fn root_of(&self, message_id: &str) -> Result<Option<String>> {
        if let Some(root) = self.pending.get(message_id) {
            return Ok(Some(root.clone()));
        }
        match self.rewritten {
            Some(rewritten) => Ok(rewritten.get(message_id).cloned()),
            None => self.store.root_of(message_id),
        }
    }
}

#[derive(Default)]
struct PendingBatch {
    messages: Vec<Message>,
    roots: HashMap<String, String>,
    skipped: Vec<SkippedCommit>,
    commits: usize,
    last: Option<Watermark>,
}

struct Pass<'a> {
    store: &'a dyn Store,
    batch_size: usize,
    batch: PendingBatch,
    /// Roots committed so far by a from-scratch pass.
    rewritten: Option<HashMap<String, String>>,
    summary: IndexSummary,
}

impl<'a> Pass<'a> {
    fn new(store: &'a dyn Store, batch_size: usize, from_scratch: bool) -> Self {
        Pass {
            store,
            batch_size,
            batch: PendingBatch::default(),
            rewritten: from_scratch.then(HashMap::new),
            summary: IndexSummary::default(),
        }
    }

    fn run(mut self, config: &IndexConfig) -> Result<IndexSummary> {
        let mirror = Mirror::open(&config.mirror_path, config.branch.as_deref())?;

        let resume = if self.rewritten.is_some() {
            None
        } else {
            self.store.get_watermark()?
        };
        let mut position = resume.as_ref().map(|w| w.position).unwrap_or(0);

        match resume {
            Some(ref w) => log::info!(
                "indexing {} after commit {} (position {})",
                config.mirror_path.display(),
                w.commit_id,
                w.position
            ),
            None => log::info!(
                "indexing {} from the beginning of history",
                config.mirror_path.display()
            ),
        }

        let walk = mirror.walk_since(resume.as_ref().map(|w| w.commit_id.as_str()))?;
        self.summary.watermark = resume;

        for item in walk {
            let raw = item?;
            position += 1;
            self.summary.commits_scanned += 1;
            self.add(raw, position)?;

            if self.batch.commits >= self.batch_size {
                self.flush()?;
            }
        }
        self.flush()?;

        log::info!(
            "indexed {} messages from {} commits ({} skipped) in {} batches",
            self.summary.messages_indexed,
            self.summary.commits_scanned,
            self.summary.skipped.len(),
            self.summary.batches_committed
        );
        Ok(self.summary)
    }

    fn add(&mut self, raw: RawMail, position: u64) -> Result<()> {
        self.batch.commits += 1;
        self.batch.last = Some(Watermark {
            commit_id: raw.commit_id.clone(),
            position,
        });

        let Some(blob) = raw.blob else {
            log::debug!("commit {} carries no message", raw.commit_id);
            self.summary.commits_without_message += 1;
            return Ok(());
        };

        let parsed = match parse_message(&blob) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("skipping commit {}: {}", raw.commit_id, e);
                self.batch.skipped.push(SkippedCommit {
                    commit_id: raw.commit_id,
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        let lookup = BatchLookup {
            pending: &self.batch.roots,
            rewritten: self.rewritten.as_ref(),
            store: self.store,
        };
        let root_message_id = resolve_root(&parsed, &lookup)?;

        self.batch
            .roots
            .insert(parsed.message_id.clone(), root_message_id.clone());
        self.batch.messages.push(Message {
            message_id: parsed.message_id,
            subject: parsed.subject,
            from_addr: parsed.from_addr,
            from_name: parsed.from_name,
            date_sent: parsed.date_sent,
            commit_id: raw.commit_id,
            root_message_id,
        });
        Ok(())
    }

    /// Commit the pending batch; a no-op when nothing was consumed.
    fn flush(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.batch);
        let Some(watermark) = pending.last else {
            return Ok(());
        };

        let batch = IndexBatch {
            messages: pending.messages,
            skipped: pending.skipped,
            watermark,
        };
        self.store.commit_batch(&batch)?;
        if let Some(ref mut rewritten) = self.rewritten {
            rewritten.extend(pending.roots);
        }

        log::info!(
            "committed batch: {} commits, {} messages, {} skipped, through {}",
            pending.commits,
            batch.messages.len(),
            batch.skipped.len(),
            batch.watermark.commit_id
        );

        self.summary.messages_indexed += batch.messages.len();
        self.summary.batches_committed += 1;
        self.summary.skipped.extend(batch.skipped);
        self.summary.watermark = Some(batch.watermark);
        Ok(())
    }
}

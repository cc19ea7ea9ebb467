pub mod header;
mod indexer;
pub mod mirror;
pub mod resolve;
pub mod tree;

pub use header::{parse_message, AncestorChain, ParseError, ParsedMessage};
pub use indexer::Git2Indexer;
pub use mirror::{MailWalk, Mirror, RawMail};
pub use resolve::resolve_root;
pub use tree::{build_thread, thread_inputs, ThreadEntry, ThreadInput};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::testutil::{commit_mail, commit_removal, mail, signature};
    use inboxmux_types::{
        IndexBatch, IndexConfig, IndexStats, Indexer, InboxError, Message, Result, RootLookup,
        SkippedCommit, Store, ThreadSummary, Watermark,
    };
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    // ── MockStore ────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct MockState {
        messages: BTreeMap<String, Message>,
        skipped: Vec<SkippedCommit>,
        watermark: Option<Watermark>,
        batches: usize,
        fail_batch: Option<usize>,
        last_error: Option<String>,
    }

    struct MockStore {
        state: Mutex<MockState>,
    }

    impl MockStore {
        fn new() -> Self {
            MockStore {
                state: Mutex::new(MockState::default()),
            }
        }

        /// Make the `n`th batch commit (1-based) fail.
        fn failing_on(n: usize) -> Self {
            let store = MockStore::new();
            store.state.lock().unwrap().fail_batch = Some(n);
            store
        }

        fn messages(&self) -> BTreeMap<String, Message> {
            self.state.lock().unwrap().messages.clone()
        }

        fn watermark(&self) -> Option<Watermark> {
            self.state.lock().unwrap().watermark.clone()
        }
    }

    impl RootLookup for MockStore {
        fn root_of(&self, message_id: &str) -> Result<Option<String>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .messages
                .get(message_id)
                .map(|m| m.root_message_id.clone()))
        }
    }

    impl Store for MockStore {
        fn get_watermark(&self) -> Result<Option<Watermark>> {
            Ok(self.watermark())
        }

        fn commit_batch(&self, batch: &IndexBatch) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.batches += 1;
            if state.fail_batch == Some(state.batches) {
                return Err(InboxError::Io(std::io::Error::other("disk full")));
            }
            for m in &batch.messages {
                state.messages.insert(m.message_id.clone(), m.clone());
            }
            state.skipped.extend(batch.skipped.iter().cloned());
            state.watermark = Some(batch.watermark.clone());
            Ok(())
        }

        fn record_error(&self, error: &str) -> Result<()> {
            self.state.lock().unwrap().last_error = Some(error.to_string());
            Ok(())
        }

        fn get_message(&self, _message_id: &str) -> Result<Option<Message>> {
            unimplemented!()
        }

        fn thread_messages(&self, _root_message_id: &str) -> Result<Vec<Message>> {
            unimplemented!()
        }

        fn thread_containing(&self, _message_id: &str) -> Result<Vec<Message>> {
            unimplemented!()
        }

        fn recent_messages(&self, _limit: usize) -> Result<Vec<Message>> {
            unimplemented!()
        }

        fn search_threads(&self, _query: Option<&str>, _limit: usize) -> Result<Vec<ThreadSummary>> {
            unimplemented!()
        }

        fn list_skipped(&self, _limit: usize) -> Result<Vec<SkippedCommit>> {
            Ok(self.state.lock().unwrap().skipped.clone())
        }

        fn stats(&self) -> Result<IndexStats> {
            unimplemented!()
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn config(path: &std::path::Path, batch_size: usize) -> IndexConfig {
        IndexConfig {
            batch_size,
            ..IndexConfig::new(path)
        }
    }

    fn root_of(store: &MockStore, id: &str) -> String {
        store.messages()[id].root_message_id.clone()
    }

    // ── Tests ────────────────────────────────────────────────────────────────

    #[test]
    fn test_malformed_commit_is_skipped_and_passed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = git2::Repository::init(dir.path()).expect("git init");
        commit_mail(&repo, &mail("m1@x", ""));
        commit_mail(&repo, &mail("m2@x", ""));
        let bad = commit_mail(&repo, "From: nobody@example.com\nSubject: no id\n\nbody\n");
        commit_mail(&repo, &mail("m4@x", ""));
        let last = commit_mail(&repo, &mail("m5@x", ""));

        let store = MockStore::new();
        let summary = Git2Indexer::new()
            .index_mirror(&config(dir.path(), 10), &store)
            .expect("index");

        assert_eq!(summary.commits_scanned, 5);
        assert_eq!(summary.messages_indexed, 4);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].commit_id, bad.to_string());
        assert!(summary.skipped[0].reason.contains("Message-ID"));

        assert_eq!(store.messages().len(), 4);
        let wm = store.watermark().expect("watermark");
        assert_eq!(wm.commit_id, last.to_string());
        assert_eq!(wm.position, 5);
        assert_eq!(store.list_skipped(10).unwrap().len(), 1);
    }

    #[test]
    fn test_reply_in_same_batch_joins_thread() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = git2::Repository::init(dir.path()).expect("git init");
        commit_mail(&repo, &mail("a@x", ""));
        commit_mail(&repo, &mail("b@x", "In-Reply-To: <a@x>\n"));
        commit_mail(&repo, &mail("c@x", "References: <a@x> <b@x>\n"));

        let store = MockStore::new();
        Git2Indexer::new()
            .index_mirror(&config(dir.path(), 100), &store)
            .expect("index");

        assert_eq!(root_of(&store, "a@x"), "a@x");
        assert_eq!(root_of(&store, "b@x"), "a@x");
        assert_eq!(root_of(&store, "c@x"), "a@x");
    }

    #[test]
    fn test_reply_across_batches_joins_thread() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = git2::Repository::init(dir.path()).expect("git init");
        commit_mail(&repo, &mail("a@x", ""));
        commit_mail(&repo, &mail("b@x", "In-Reply-To: <a@x>\n"));
        commit_mail(&repo, &mail("c@x", "In-Reply-To: <b@x>\n"));

        let store = MockStore::new();
        let summary = Git2Indexer::new()
            .index_mirror(&config(dir.path(), 1), &store)
            .expect("index");

        assert_eq!(summary.batches_committed, 3);
        assert_eq!(root_of(&store, "c@x"), "a@x");
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = git2::Repository::init(dir.path()).expect("git init");
        commit_mail(&repo, &mail("a@x", ""));
        commit_mail(&repo, &mail("b@x", "In-Reply-To: <a@x>\n"));

        let store = MockStore::new();
        let indexer = Git2Indexer::new();
        indexer
            .index_mirror(&config(dir.path(), 2), &store)
            .expect("first run");
        let before = store.messages();
        let wm_before = store.watermark();

        let summary = indexer
            .index_mirror(&config(dir.path(), 2), &store)
            .expect("second run");
        assert_eq!(summary.commits_scanned, 0);
        assert_eq!(summary.messages_indexed, 0);
        assert_eq!(summary.batches_committed, 0);
        assert_eq!(summary.watermark, wm_before);
        assert_eq!(store.messages(), before);
    }

    #[test]
    fn test_failed_batch_resumes_to_same_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = git2::Repository::init(dir.path()).expect("git init");
        let first = commit_mail(&repo, &mail("a@x", ""));
        commit_mail(&repo, &mail("b@x", "In-Reply-To: <a@x>\n"));
        commit_mail(&repo, &mail("c@x", "References: <a@x> <b@x>\n"));
        commit_mail(&repo, &mail("d@x", ""));

        let indexer = Git2Indexer::new();

        let reference = MockStore::new();
        indexer
            .index_mirror(&config(dir.path(), 1), &reference)
            .expect("uninterrupted run");

        let store = MockStore::failing_on(2);
        let err = indexer
            .index_mirror(&config(dir.path(), 1), &store)
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(store.watermark().map(|w| w.commit_id), Some(first.to_string()));
        assert_eq!(store.messages().len(), 1);
        assert!(store.state.lock().unwrap().last_error.is_some());

        let summary = indexer
            .index_mirror(&config(dir.path(), 1), &store)
            .expect("resumed run");
        assert_eq!(summary.commits_scanned, 3);
        assert_eq!(store.messages(), reference.messages());
        assert_eq!(store.watermark(), reference.watermark());
    }

    fn roots(store: &MockStore) -> Vec<(String, String)> {
        store
            .messages()
            .into_values()
            .map(|m| (m.message_id, m.root_message_id))
            .collect()
    }

    #[test]
    fn test_from_scratch_matches_a_fresh_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = git2::Repository::init(dir.path()).expect("git init");
        // The reply lands in the mirror before its parent.
        commit_mail(&repo, &mail("child@x", "In-Reply-To: <parent@x>\n"));
        commit_mail(&repo, &mail("parent@x", ""));
        commit_mail(&repo, &mail("reply@x", "In-Reply-To: <parent@x>\n"));

        let store = MockStore::new();
        let indexer = Git2Indexer::new();
        indexer
            .index_mirror(&config(dir.path(), 10), &store)
            .expect("first run");
        let first = roots(&store);

        let rerun = IndexConfig {
            from_scratch: true,
            ..config(dir.path(), 1)
        };
        let summary = indexer.index_mirror(&rerun, &store).expect("re-index");
        assert_eq!(summary.commits_scanned, 3);
        assert_eq!(summary.messages_indexed, 3);
        assert_eq!(roots(&store), first);
        assert_eq!(root_of(&store, "child@x"), "child@x");
        assert_eq!(root_of(&store, "reply@x"), "parent@x");
        assert_eq!(store.watermark().map(|w| w.position), Some(3));
    }

    #[test]
    fn test_from_scratch_ignores_roots_not_yet_rewritten() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = git2::Repository::init(dir.path()).expect("git init");
        // Each message arrives before the one it replies to.
        commit_mail(&repo, &mail("y@x", "In-Reply-To: <x@x>\n"));
        commit_mail(&repo, &mail("x@x", "In-Reply-To: <p@x>\n"));
        commit_mail(&repo, &mail("p@x", ""));

        let store = MockStore::new();
        let indexer = Git2Indexer::new();
        indexer
            .index_mirror(&config(dir.path(), 10), &store)
            .expect("first run");

        let rerun = IndexConfig {
            from_scratch: true,
            ..config(dir.path(), 10)
        };
        for round in 0..2 {
            indexer.index_mirror(&rerun, &store).expect("re-index");
            let stored = store.messages();
            for m in stored.values() {
                let root = &stored[&m.root_message_id];
                assert!(root.is_root(), "round {round}: {} is two hops from its root", m.message_id);
            }
            assert_eq!(
                roots(&store),
                vec![
                    ("p@x".to_string(), "p@x".to_string()),
                    ("x@x".to_string(), "x@x".to_string()),
                    ("y@x".to_string(), "y@x".to_string()),
                ],
                "round {round}"
            );
        }
    }

    #[test]
    fn test_removal_commit_is_not_reindexed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = git2::Repository::init(dir.path()).expect("git init");
        let added = commit_mail(&repo, &mail("a@x", ""));
        let removal = commit_removal(&repo, &mail("a@x", ""));

        let store = MockStore::new();
        let summary = Git2Indexer::new()
            .index_mirror(&config(dir.path(), 10), &store)
            .expect("index");

        assert_eq!(summary.messages_indexed, 1);
        assert_eq!(summary.commits_without_message, 1);
        assert_eq!(store.messages()["a@x"].commit_id, added.to_string());
        assert_eq!(store.watermark().map(|w| w.commit_id), Some(removal.to_string()));
    }

    #[test]
    fn test_commit_without_message_advances_watermark() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = git2::Repository::init(dir.path()).expect("git init");
        commit_mail(&repo, &mail("a@x", ""));

        // Deletion: empty tree on top of the message commit.
        let tree = repo
            .find_tree(repo.treebuilder(None).unwrap().write().unwrap())
            .unwrap();
        let parent = repo.head().unwrap().peel_to_commit().unwrap();
        let sig = signature();
        let deletion = repo
            .commit(Some("HEAD"), &sig, &sig, "d", &tree, &[&parent])
            .unwrap();

        let store = MockStore::new();
        let summary = Git2Indexer::new()
            .index_mirror(&config(dir.path(), 10), &store)
            .expect("index");

        assert_eq!(summary.messages_indexed, 1);
        assert_eq!(summary.commits_without_message, 1);
        assert!(summary.skipped.is_empty());
        assert_eq!(store.watermark().map(|w| w.commit_id), Some(deletion.to_string()));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        git2::Repository::init(dir.path()).expect("git init");
        let store = MockStore::new();
        let result = Git2Indexer::new().index_mirror(&config(dir.path(), 0), &store);
        assert!(matches!(result, Err(InboxError::Config(_))));
    }

    #[test]
    fn test_missing_mirror_is_fatal_and_recorded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MockStore::new();
        let result = Git2Indexer::new().index_mirror(&config(&dir.path().join("gone"), 10), &store);
        assert!(matches!(result, Err(InboxError::Extraction(_))));
        assert!(store.state.lock().unwrap().last_error.is_some());
    }
}

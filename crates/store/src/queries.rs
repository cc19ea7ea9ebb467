use rusqlite::{params, OptionalExtension};
use std::time::{SystemTime, UNIX_EPOCH};

use inboxmux_types::{
    IndexBatch, IndexStats, Message, Result, RootLookup, SkippedCommit, Store, ThreadSummary,
    Watermark,
};

use crate::SqliteStore;

// ── Helpers ───────────────────────────────────────────────────────────────

const MESSAGE_COLUMNS: &str =
    "message_id, subject, from_addr, from_name, date_sent, commit_id, root_message_id";

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        message_id: row.get(0)?,
        subject: row.get(1)?,
        from_addr: row.get(2)?,
        from_name: row.get(3)?,
        date_sent: row.get(4)?,
        commit_id: row.get(5)?,
        root_message_id: row.get(6)?,
    })
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// `%needle%` with LIKE wildcards escaped (used with `ESCAPE '\'`).
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

// ── impl RootLookup ───────────────────────────────────────────────────────

impl RootLookup for SqliteStore {
    fn root_of(&self, message_id: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let root = conn
            .query_row(
                "SELECT root_message_id FROM messages WHERE message_id = ?1",
                params![message_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(root)
    }
}

// ── impl Store ────────────────────────────────────────────────────────────

impl Store for SqliteStore {
    // ── Indexer state ─────────────────────────────────────────────────────

    fn get_watermark(&self) -> Result<Option<Watermark>> {
        let conn = self.conn()?;
        let row: Option<(Option<String>, i64)> = conn
            .query_row(
                "SELECT last_commit, position FROM ingest_state WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(match row {
            Some((Some(commit_id), position)) => Some(Watermark {
                commit_id,
                position: position.max(0) as u64,
            }),
            _ => None,
        })
    }

    fn commit_batch(&self, batch: &IndexBatch) -> Result<()> {
        let mut conn = self.conn()?;
        let now = now_secs();

        // Dropping `tx` on any early return rolls the whole batch back.
        let tx = conn.transaction()?;
        {
            let mut upsert = tx.prepare(
                "INSERT INTO messages
                    (message_id, subject, from_addr, from_name, date_sent, commit_id, root_message_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(message_id) DO UPDATE SET
                    subject = excluded.subject,
                    from_addr = excluded.from_addr,
                    from_name = excluded.from_name,
                    date_sent = excluded.date_sent,
                    commit_id = excluded.commit_id,
                    root_message_id = excluded.root_message_id",
            )?;
            for m in &batch.messages {
                upsert.execute(params![
                    m.message_id,
                    m.subject,
                    m.from_addr,
                    m.from_name,
                    m.date_sent,
                    m.commit_id,
                    m.root_message_id,
                ])?;
            }

            let mut skip = tx.prepare(
                "INSERT INTO skipped_commits (commit_id, reason, recorded_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(commit_id) DO UPDATE SET
                    reason = excluded.reason,
                    recorded_at = excluded.recorded_at",
            )?;
            for s in &batch.skipped {
                skip.execute(params![s.commit_id, s.reason, now])?;
            }

            tx.execute(
                "INSERT INTO ingest_state (id, last_commit, position, last_indexed_at, last_error)
                 VALUES (1, ?1, ?2, ?3, NULL)
                 ON CONFLICT(id) DO UPDATE SET
                    last_commit = excluded.last_commit,
                    position = excluded.position,
                    last_indexed_at = excluded.last_indexed_at,
                    last_error = NULL",
                params![
                    batch.watermark.commit_id,
                    batch.watermark.position as i64,
                    now,
                ],
            )?;
        }
        tx.commit()?;

        log::debug!(
            "committed {} messages, {} skips, watermark {}",
            batch.messages.len(),
            batch.skipped.len(),
            batch.watermark.commit_id
        );
        Ok(())
    }

    fn record_error(&self, error: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO ingest_state (id, last_error) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET last_error = excluded.last_error",
            params![error],
        )?;
        Ok(())
    }

    // ── Serving queries ───────────────────────────────────────────────────

    fn get_message(&self, message_id: &str) -> Result<Option<Message>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM messages WHERE message_id = ?1", MESSAGE_COLUMNS);
        let result = conn
            .query_row(&sql, params![message_id], row_to_message)
            .optional()?;
        Ok(result)
    }

    fn thread_messages(&self, root_message_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM messages
             WHERE root_message_id = ?1
             ORDER BY date_sent, message_id",
            MESSAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: rusqlite::Result<Vec<Message>> =
            stmt.query_map(params![root_message_id], row_to_message)?.collect();
        Ok(rows?)
    }

    fn thread_containing(&self, message_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM messages
             WHERE root_message_id = (
                 SELECT root_message_id FROM messages WHERE message_id = ?1
             )
             ORDER BY date_sent, message_id",
            MESSAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: rusqlite::Result<Vec<Message>> =
            stmt.query_map(params![message_id], row_to_message)?.collect();
        Ok(rows?)
    }

    fn recent_messages(&self, limit: usize) -> Result<Vec<Message>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM messages
             ORDER BY date_sent DESC, message_id
             LIMIT ?1",
            MESSAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: rusqlite::Result<Vec<Message>> =
            stmt.query_map(params![limit as i64], row_to_message)?.collect();
        Ok(rows?)
    }

    fn search_threads(&self, query: Option<&str>, limit: usize) -> Result<Vec<ThreadSummary>> {
        let conn = self.conn()?;
        let pattern = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(like_pattern);

        // First non-reply, non-reroll message of each matching thread.
        let mut stmt = conn.prepare(
            r"WITH filtered AS (
                SELECT message_id, subject, from_name, from_addr, date_sent, root_message_id
                FROM messages
                WHERE subject IS NOT NULL
                  AND subject NOT LIKE 'Re:%'
                  AND subject NOT GLOB '* v[2-9][] ]*'
                  AND (?1 IS NULL
                       OR subject LIKE ?1 ESCAPE '\'
                       OR from_name LIKE ?1 ESCAPE '\'
                       OR from_addr LIKE ?1 ESCAPE '\')
            ),
            ranked AS (
                SELECT *, ROW_NUMBER() OVER (
                    PARTITION BY root_message_id ORDER BY date_sent ASC, message_id
                ) AS rn
                FROM filtered
            ),
            thread_counts AS (
                SELECT root_message_id, COUNT(*) AS thread_count
                FROM messages
                GROUP BY root_message_id
            )
            SELECT r.message_id, r.root_message_id, r.subject, r.from_name, r.from_addr,
                   r.date_sent, t.thread_count
            FROM ranked r
            JOIN thread_counts t ON t.root_message_id = r.root_message_id
            WHERE r.rn = 1
            ORDER BY r.date_sent DESC
            LIMIT ?2",
        )?;

        let rows: rusqlite::Result<Vec<ThreadSummary>> = stmt
            .query_map(params![pattern, limit as i64], |row| {
                Ok(ThreadSummary {
                    message_id: row.get(0)?,
                    root_message_id: row.get(1)?,
                    subject: row.get(2)?,
                    from_name: row.get(3)?,
                    from_addr: row.get(4)?,
                    date_sent: row.get(5)?,
                    message_count: row.get::<_, i64>(6)? as usize,
                })
            })?
            .collect();
        Ok(rows?)
    }

    // ── Admin ─────────────────────────────────────────────────────────────

    fn list_skipped(&self, limit: usize) -> Result<Vec<SkippedCommit>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT commit_id, reason FROM skipped_commits
             ORDER BY recorded_at DESC, commit_id
             LIMIT ?1",
        )?;
        let rows: rusqlite::Result<Vec<SkippedCommit>> = stmt
            .query_map(params![limit as i64], |row| {
                Ok(SkippedCommit {
                    commit_id: row.get(0)?,
                    reason: row.get(1)?,
                })
            })?
            .collect();
        Ok(rows?)
    }

    fn stats(&self) -> Result<IndexStats> {
        let (message_count, thread_count, skipped_count) = {
            let conn = self.conn()?;
            let (messages, threads): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT root_message_id) FROM messages",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let skipped: i64 =
                conn.query_row("SELECT COUNT(*) FROM skipped_commits", [], |row| row.get(0))?;
            (messages as usize, threads as usize, skipped as usize)
        };

        let watermark = self.get_watermark()?;

        let conn = self.conn()?;
        let state: Option<(Option<i64>, Option<String>)> = conn
            .query_row(
                "SELECT last_indexed_at, last_error FROM ingest_state WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (last_indexed_at, last_error) = state.unwrap_or((None, None));

        Ok(IndexStats {
            message_count,
            thread_count,
            skipped_count,
            watermark,
            last_indexed_at,
            last_error,
        })
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use inboxmux_ingest::header::normalize_message_id;
use inboxmux_ingest::{build_thread, thread_inputs, Git2Indexer, Mirror};
use inboxmux_store::SqliteStore;
use inboxmux_types::{IndexConfig, IndexSummary, Indexer, Message, Store, DEFAULT_BATCH_SIZE};

#[derive(Parser)]
#[command(name = "inboxmux", about = "Thread index over a public-inbox git mirror")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty index database.
    Init {
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Index new commits of the mirror.
    Index {
        #[arg(long)]
        mirror: Option<PathBuf>,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long = "batch-size")]
        batch_size: Option<usize>,
        /// Ignore the watermark and re-index the whole history.
        #[arg(long)]
        full: bool,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    Show {
        message_id: String,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print the reply tree of the thread containing a message.
    Thread {
        message_id: String,
        #[arg(long)]
        mirror: Option<PathBuf>,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    Search {
        query: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: usize,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    Status {
        /// How many skipped commits to list.
        #[arg(long, default_value_t = 10)]
        skipped: usize,
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

// ── Configuration ─────────────────────────────────────────────────────────

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn db_path_from(flag: Option<PathBuf>, env: Option<String>, home: Option<String>) -> PathBuf {
    if let Some(p) = flag {
        return p;
    }
    if let Some(v) = env {
        return PathBuf::from(v);
    }
    PathBuf::from(home.unwrap_or_else(|| ".".into()))
        .join(".inboxmux")
        .join("db.sqlite3")
}

fn resolve_db_path(flag: Option<PathBuf>) -> PathBuf {
    db_path_from(flag, env_var("INBOXMUX_DB"), env_var("HOME"))
}

fn resolve_mirror(flag: Option<PathBuf>) -> Result<PathBuf> {
    flag.or_else(|| env_var("INBOXMUX_MIRROR").map(PathBuf::from))
        .ok_or_else(|| anyhow::anyhow!("no mirror given: pass --mirror or set INBOXMUX_MIRROR"))
}

fn resolve_branch(flag: Option<String>) -> Option<String> {
    flag.or_else(|| env_var("INBOXMUX_BRANCH"))
}

fn batch_size_from(flag: Option<usize>, env: Option<String>) -> Result<usize> {
    let size = match (flag, env) {
        (Some(n), _) => n,
        (None, Some(v)) => v
            .trim()
            .parse()
            .with_context(|| format!("INBOXMUX_BATCH_SIZE is not a number: {:?}", v))?,
        (None, None) => DEFAULT_BATCH_SIZE,
    };
    if size == 0 {
        anyhow::bail!("batch size must be at least 1");
    }
    Ok(size)
}

fn resolve_batch_size(flag: Option<usize>) -> Result<usize> {
    batch_size_from(flag, env_var("INBOXMUX_BATCH_SIZE"))
}

fn open_store(db: Option<PathBuf>) -> Result<SqliteStore> {
    let db_path = resolve_db_path(db);
    SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))
}

fn parse_id(raw: &str) -> Result<String> {
    normalize_message_id(raw).ok_or_else(|| anyhow::anyhow!("empty message id"))
}

// ── Output ────────────────────────────────────────────────────────────────

fn format_timestamp(ts: i64) -> String {
    match chrono::DateTime::from_timestamp(ts, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "invalid date".to_string(),
    }
}

fn format_date(date: Option<i64>) -> String {
    date.map(format_timestamp)
        .unwrap_or_else(|| "-".to_string())
}

fn sender(message: &Message) -> &str {
    message
        .from_name
        .as_deref()
        .or(message.from_addr.as_deref())
        .unwrap_or("(unknown)")
}

fn print_summary(summary: &IndexSummary) {
    println!(
        "Scanned {} commits: {} messages indexed, {} skipped, {} without a message ({} batches)",
        summary.commits_scanned,
        summary.messages_indexed,
        summary.skipped.len(),
        summary.commits_without_message,
        summary.batches_committed
    );
    for s in &summary.skipped {
        eprintln!("  skipped {}: {}", s.commit_id, s.reason);
    }
    match summary.watermark {
        Some(ref w) => println!("Watermark: {} (position {})", w.commit_id, w.position),
        None => println!("Watermark: none (mirror is empty)"),
    }
}

fn index(
    store: &SqliteStore,
    mirror: PathBuf,
    branch: Option<String>,
    batch_size: usize,
    full: bool,
) -> Result<IndexSummary> {
    let config = IndexConfig {
        branch,
        batch_size,
        from_scratch: full,
        ..IndexConfig::new(mirror)
    };
    Git2Indexer::new()
        .index_mirror(&config, store)
        .with_context(|| format!("Failed to index {}", config.mirror_path.display()))
}

fn print_thread(store: &SqliteStore, mirror: &Path, branch: Option<&str>, id: &str) -> Result<bool> {
    let rows = store
        .thread_containing(id)
        .with_context(|| format!("Failed to load thread of {}", id))?;
    if rows.is_empty() {
        return Ok(false);
    }
    let mirror = Mirror::open(mirror, branch)
        .with_context(|| format!("Failed to open mirror {}", mirror.display()))?;

    for entry in build_thread(thread_inputs(Some(&mirror), rows)) {
        let m = &entry.message;
        println!(
            "{}{}  {}  {}  <{}>",
            "  ".repeat(entry.depth),
            entry.display_subject.as_deref().unwrap_or("\u{2193}"),
            sender(m),
            format_date(m.date_sent),
            m.message_id
        );
    }
    Ok(true)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db } => {
            let db_path = resolve_db_path(db);
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
            println!("Initialized inboxmux database at {}", db_path.display());
        }

        Commands::Index { mirror, branch, batch_size, full, json, db } => {
            let mirror = resolve_mirror(mirror)?;
            let batch_size = resolve_batch_size(batch_size)?;
            let store = open_store(db)?;
            let summary = index(&store, mirror, resolve_branch(branch), batch_size, full)?;
            if json {
                let out = serde_json::to_string_pretty(&summary)
                    .context("Failed to serialize summary to JSON")?;
                println!("{}", out);
            } else {
                print_summary(&summary);
            }
        }

        Commands::Show { message_id, db } => {
            let store = open_store(db)?;
            let id = parse_id(&message_id)?;
            match store.get_message(&id).context("Failed to get message")? {
                None => {
                    eprintln!("Message not found");
                    std::process::exit(1);
                }
                Some(message) => {
                    let json = serde_json::to_string_pretty(&message)
                        .context("Failed to serialize message to JSON")?;
                    println!("{}", json);
                }
            }
        }

        Commands::Thread { message_id, mirror, branch, db } => {
            let mirror = resolve_mirror(mirror)?;
            let store = open_store(db)?;
            let id = parse_id(&message_id)?;
            let branch = resolve_branch(branch);
            if !print_thread(&store, &mirror, branch.as_deref(), &id)? {
                eprintln!("Message not found");
                std::process::exit(1);
            }
        }

        Commands::Recent { limit, db } => {
            let store = open_store(db)?;
            let rows = store.recent_messages(limit).context("Failed to list messages")?;
            for m in &rows {
                println!(
                    "{}  {:<24}  {}  <{}>",
                    format_date(m.date_sent),
                    sender(m),
                    m.subject.as_deref().unwrap_or("(no subject)"),
                    m.message_id
                );
            }
        }

        Commands::Search { query, limit, db } => {
            let store = open_store(db)?;
            let threads = store
                .search_threads(query.as_deref(), limit)
                .context("Failed to search threads")?;
            println!("{:<19}  {:>5}  SUBJECT", "DATE", "MSGS");
            for t in &threads {
                println!(
                    "{:<19}  {:>5}  {}  <{}>",
                    format_date(t.date_sent),
                    t.message_count,
                    t.subject.as_deref().unwrap_or("(no subject)"),
                    t.message_id
                );
            }
        }

        Commands::Status { skipped, db } => {
            let store = open_store(db)?;
            let stats = store.stats().context("Failed to read index stats")?;

            println!("Messages:     {}", stats.message_count);
            println!("Threads:      {}", stats.thread_count);
            println!("Skipped:      {}", stats.skipped_count);
            match stats.watermark {
                Some(ref w) => println!("Watermark:    {} (position {})", w.commit_id, w.position),
                None => println!("Watermark:    none"),
            }
            let last = stats
                .last_indexed_at
                .map(format_timestamp)
                .unwrap_or_else(|| "never".to_string());
            println!("Last indexed: {}", last);
            if let Some(ref e) = stats.last_error {
                println!("Last error:   {}", e);
            }

            if skipped > 0 && stats.skipped_count > 0 {
                let list = store
                    .list_skipped(skipped)
                    .context("Failed to list skipped commits")?;
                println!();
                println!("{:<40}  REASON", "COMMIT");
                for s in &list {
                    println!("{:<40}  {}", s.commit_id, s.reason);
                }
            }
        }
    }

    Ok(())
}

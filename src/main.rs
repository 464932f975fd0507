//! Zentinel session maintenance tool
//!
//! Inspects, deletes and purges session documents in a redb session
//! repository, or runs the stale-document cleanup loop.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use http::header::COOKIE;
use http::Request;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use zentinel_session_store::repository::cleanup::evict_once;
use zentinel_session_store::repository::{spawn_cleanup_task, DEFAULT_CLEANUP_INTERVAL_SECS};
use zentinel_session_store::session::DEFAULT_MAX_AGE_SECS;
use zentinel_session_store::{
    CookieOptions, CookieOptionsJson, DocumentRepository, KeyPair, RedbRepository, SessionId,
    SessionStore,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "zentinel-sessions")]
#[command(about = "Maintenance tool for Zentinel session documents")]
struct Args {
    /// Path to the redb session database
    #[arg(
        long,
        default_value = "/var/lib/zentinel/sessions.redb",
        env = "SESSION_DB_PATH"
    )]
    db: PathBuf,

    /// Key generations, newest first (comma-separated hashhex[:blockhex])
    #[arg(long, env = "SESSION_KEYS")]
    keys: Option<String>,

    /// Cookie option overrides as JSON (e.g. {"max-age": 86400})
    #[arg(long, env = "SESSION_COOKIE_OPTIONS")]
    cookie_options: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, env = "SESSION_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a session cookie and print its values as JSON
    Inspect {
        /// Cookie name
        #[arg(long)]
        name: String,
        /// Cookie value as sent by the browser
        #[arg(long)]
        cookie: String,
    },
    /// Delete one session document by hex id
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Print the number of stored session documents
    Count,
    /// Delete documents not modified within max age
    Purge {
        #[arg(long, default_value_t = DEFAULT_MAX_AGE_SECS)]
        max_age: i64,
    },
    /// Run the cleanup loop until interrupted
    Watch {
        #[arg(long, default_value_t = DEFAULT_MAX_AGE_SECS)]
        max_age: i64,
        #[arg(long, default_value_t = DEFAULT_CLEANUP_INTERVAL_SECS)]
        interval: u64,
    },
}

/// Parse comma-separated key generations.
fn parse_key_pairs(keys: &str) -> Result<Vec<KeyPair>> {
    keys.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(KeyPair::from_hex_pair)
        .collect()
}

fn cookie_options(args: &Args) -> Result<CookieOptions> {
    let mut options = CookieOptions::default();
    if let Some(ref json) = args.cookie_options {
        let overrides: CookieOptionsJson =
            serde_json::from_str(json).context("Invalid cookie options JSON")?;
        overrides.apply_to(&mut options);
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "{}={},zentinel_session_store={}",
            env!("CARGO_CRATE_NAME"),
            log_level,
            log_level
        ))
        .json()
        .init();

    let repository: Arc<dyn DocumentRepository> = Arc::new(
        RedbRepository::open(args.db.clone())
            .with_context(|| format!("Failed to open session repository at {:?}", args.db))?,
    );
    info!(path = ?args.db, "Session repository opened");

    match args.command {
        Command::Inspect { ref name, ref cookie } => {
            let keys = args
                .keys
                .as_deref()
                .ok_or_else(|| anyhow!("--keys is required to decode cookies"))?;
            let key_pairs = parse_key_pairs(keys)?;
            let store = SessionStore::new(repository, Some(cookie_options(&args)?), &key_pairs)?;

            let req = Request::builder()
                .header(COOKIE, format!("{}={}", name, cookie))
                .body(())?;
            let (session, error) = store.new_session(&req, name);
            if let Some(e) = error {
                return Err(e.into());
            }

            let output = serde_json::json!({
                "id": session.id().map(|id| id.to_hex()),
                "created_at": session.id().map(|id| id.timestamp().to_rfc3339()),
                "values": session.values,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Delete { ref id } => {
            let id: SessionId = id.parse()?;
            if repository.delete_by_id(id)? {
                info!(session_id = %id, "Session deleted");
            } else {
                warn!(session_id = %id, "Session not found");
            }
        }
        Command::Count => {
            println!("{}", repository.document_count()?);
        }
        Command::Purge { max_age } => {
            let evicted = evict_once(repository.as_ref(), max_age)?;
            info!(evicted, max_age, "Purge completed");
        }
        Command::Watch { max_age, interval } => {
            info!(max_age, interval, "Starting session cleanup task");
            let handle = spawn_cleanup_task(repository, max_age, interval);
            tokio::signal::ctrl_c().await?;
            handle.abort();
            info!("Session cleanup task stopped");
        }
    }

    Ok(())
}

//! Glean: a reactive local cache for Nostr reading.
//!
//! Each load subcommand opens relay subscriptions for one record kind,
//! ingests them into the local store, and prints every snapshot of the
//! matching live query as a JSON line on stdout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use glean_cache::{
    ArticleOptions, BookmarkListOptions, EncryptedNoteOptions, HighlightOptions, NoteOptions,
    SqliteTableStore, SyncConfig, SyncContext, ZapOptions,
};
use glean_nostr::{DEFAULT_RELAYS, RelayPool, RelayPoolConfig};
use miette::{IntoDiagnostic, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod decode;
mod follow;

#[derive(Parser)]
#[command(name = "glean")]
#[command(about = "Reactive local cache for Nostr reading", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Relay URLs (comma separated)
    #[arg(long = "relay", env = "GLEAN_RELAYS", value_delimiter = ',', global = true)]
    relays: Vec<String>,

    /// SQLite database path
    #[arg(long, env = "GLEAN_DB", global = true)]
    db: Option<PathBuf>,

    /// Keep the cache in memory, even if a database path is configured
    #[arg(long, global = true)]
    memory: bool,

    /// Value of the `client` tag this application writes
    #[arg(long, env = "GLEAN_CLIENT_NAME", default_value = "glean", global = true)]
    client_name: String,

    /// Extra highlight ids to suppress (comma separated)
    #[arg(long, env = "GLEAN_BLACKLIST", value_delimiter = ',', global = true)]
    blacklist: Vec<String>,

    /// Upper bound for point fetches, in seconds
    #[arg(long, default_value = "10", global = true)]
    fetch_timeout_secs: u64,

    /// Exit once stored events are loaded instead of following updates
    #[arg(long, global = true)]
    once: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load highlights
    Highlights {
        /// Article reference (naddr, nevent, note, query key or URL)
        #[arg(long)]
        article: Option<String>,

        /// Author or booster (npub or hex), repeatable
        #[arg(long)]
        author: Vec<String>,

        /// Page the highlights were taken from
        #[arg(long)]
        url: Option<String>,

        /// Highlight id, repeatable
        #[arg(long)]
        id: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Load long-form articles
    Articles {
        /// Article reference (naddr, nevent, note, query key or URL)
        #[arg(long)]
        reference: Option<String>,

        #[arg(long)]
        author: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Load short notes
    Notes {
        #[arg(long)]
        author: Vec<String>,

        /// Event or coordinate being replied to
        #[arg(long)]
        reply_to: Option<String>,

        /// Event being quoted
        #[arg(long)]
        quote_of: Option<String>,

        /// Note id, repeatable; only uncached ids are fetched
        #[arg(long)]
        id: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Load bookmark lists
    Bookmarks {
        #[arg(long)]
        author: Vec<String>,

        /// List reference (naddr or query key)
        #[arg(long)]
        reference: Option<String>,
    },

    /// Load encrypted direct messages (payloads stay encrypted)
    Dms {
        /// Sender or recipient
        #[arg(long)]
        pubkey: String,

        #[arg(long)]
        reply_to: Option<String>,
    },

    /// Load a user profile
    Profile {
        /// Public key (npub or hex)
        key: String,
    },

    /// Load zap receipts
    Zaps {
        #[arg(long)]
        payee: Option<String>,

        /// Zapped event id
        #[arg(long)]
        note: Option<String>,
    },

    /// Decode a reference and print its query key
    Decode {
        reference: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries JSON lines
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "glean=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let global = cli.global;

    if let Commands::Decode { reference } = &cli.command {
        return decode::run(reference);
    }

    let ctx = build_context(&global)?;
    let once = global.once;

    match cli.command {
        Commands::Highlights {
            article,
            author,
            url,
            id,
            limit,
        } => {
            let mut options = HighlightOptions::new().authors(author).ids(id);
            if let Some(article) = article {
                options = options.article(article);
            }
            if let Some(url) = url {
                options = options.url(url);
            }
            if let Some(limit) = limit {
                options = options.limit(limit);
            }
            let loaded = ctx.highlights().load(options).await.into_diagnostic()?;
            follow::run(&ctx, loaded, once).await
        }

        Commands::Articles {
            reference,
            author,
            limit,
        } => {
            let mut options = ArticleOptions::new().authors(author);
            if let Some(reference) = reference {
                options = options.reference(reference);
            }
            if let Some(limit) = limit {
                options = options.limit(limit);
            }
            let loaded = ctx.articles().load(options).await.into_diagnostic()?;
            follow::run(&ctx, loaded, once).await
        }

        Commands::Notes {
            author,
            reply_to,
            quote_of,
            id,
            limit,
        } => {
            let mut options = NoteOptions::new().authors(author).ids(id);
            if let Some(reply_to) = reply_to {
                options = options.reply_to(reply_to);
            }
            if let Some(quote_of) = quote_of {
                options = options.quote_of(quote_of);
            }
            if let Some(limit) = limit {
                options = options.limit(limit);
            }
            let loaded = ctx.notes().load(options).await.into_diagnostic()?;
            follow::run(&ctx, loaded, once).await
        }

        Commands::Bookmarks { author, reference } => {
            let mut options = BookmarkListOptions::new().authors(author);
            if let Some(reference) = reference {
                options = options.reference(reference);
            }
            let loaded = ctx.bookmark_lists().load(options).await.into_diagnostic()?;
            follow::run(&ctx, loaded, once).await
        }

        Commands::Dms { pubkey, reply_to } => {
            let mut options = EncryptedNoteOptions::new().pubkey(pubkey);
            if let Some(reply_to) = reply_to {
                options = options.reply_to(reply_to);
            }
            let loaded = ctx.encrypted_notes().load(options).await.into_diagnostic()?;
            follow::run(&ctx, loaded, once).await
        }

        Commands::Profile { key } => {
            let loaded = ctx.profiles().load(&key).await.into_diagnostic()?;
            follow::run(&ctx, loaded, once).await
        }

        Commands::Zaps { payee, note } => {
            let mut options = ZapOptions::new();
            if let Some(payee) = payee {
                options = options.payee(payee);
            }
            if let Some(note) = note {
                options = options.zapped_note(note);
            }
            let loaded = ctx.zaps().load(options).await.into_diagnostic()?;
            follow::run(&ctx, loaded, once).await
        }

        Commands::Decode { .. } => Ok(()),
    }
}

fn build_context(global: &GlobalArgs) -> Result<SyncContext> {
    let relays = if global.relays.is_empty() {
        DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect()
    } else {
        global.relays.clone()
    };
    info!(relays = ?relays, "using relays");

    let pool = RelayPool::new(RelayPoolConfig {
        relays,
        fetch_timeout: Duration::from_secs(global.fetch_timeout_secs),
        ..RelayPoolConfig::default()
    });

    let mut builder = SyncContext::builder(Arc::new(pool)).config(SyncConfig {
        client_name: global.client_name.clone(),
        blacklist: global.blacklist.clone(),
        ..SyncConfig::default()
    });

    match (&global.db, global.memory) {
        (Some(path), false) => {
            let store = SqliteTableStore::open(path).into_diagnostic()?;
            builder = builder.table_store(Arc::new(store));
        }
        _ => info!("using in-memory store"),
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relays_are_comma_separated() {
        let cli = Cli::try_parse_from([
            "glean",
            "--relay",
            "wss://a.example,wss://b.example",
            "profile",
            "npub1x",
        ])
        .unwrap();
        assert_eq!(cli.global.relays, vec!["wss://a.example", "wss://b.example"]);
        assert!(matches!(cli.command, Commands::Profile { .. }));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "glean",
            "highlights",
            "--author",
            "a",
            "--author",
            "b",
            "--once",
            "--memory",
        ])
        .unwrap();
        assert!(cli.global.once);
        assert!(cli.global.memory);
        assert_eq!(cli.global.client_name, "glean");
        let Commands::Highlights { author, .. } = cli.command else {
            panic!("expected highlights");
        };
        assert_eq!(author, vec!["a", "b"]);
    }
}

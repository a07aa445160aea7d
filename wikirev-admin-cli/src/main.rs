//! Wikirev Administration CLI

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wikirev_core::{PageEdit, SqliteStore, WikiConfig, WikiPages};

#[derive(Parser, Debug)]
#[command(name = "wikirev-admin")]
#[command(author = "Wikirev Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Wiki page revision store administration")]
struct Cli {
    /// SQLite database file
    #[arg(long, default_value = "wiki.db")]
    db: PathBuf,

    /// JSON configuration file
    #[arg(long, default_value = "wiki-config.json")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a user and print its id
    AddUser { name: String },

    /// Add a revision to a page
    Add {
        page: String,
        #[arg(short, long)]
        author: i64,
        /// Markup text; read from --file when absent
        #[arg(short, long)]
        markup: Option<String>,
        #[arg(short, long, conflicts_with = "markup")]
        file: Option<PathBuf>,
        #[arg(long)]
        minor: bool,
        #[arg(long)]
        message: Option<String>,
        /// RFC 3339 instant the edit started at; defaults to now
        #[arg(long)]
        started_at: Option<String>,
    },

    /// Print the current revision, or a specific one
    Show {
        page: String,
        #[arg(short, long)]
        revision: Option<u32>,
    },

    /// Print every revision of a page
    History { page: String },

    /// Delete every revision of a page
    Delete { page: String },

    /// Delete a single revision
    DeleteRevision { page: String, revision: u32 },

    /// Restore the deleted revisions of a page
    Undelete { page: String },

    /// Rename a page
    Move { from: String, to: String },

    /// Rename a page and all of its sub-pages
    MoveAll { from: String, to: String },

    /// List pages nothing links to
    Orphans,

    /// List links to pages that do not exist
    BrokenLinks,

    /// List pages linking to a page
    Referrers { page: String },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_started_at(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid --started-at value '{}'", raw))?;
    Ok(parsed.with_timezone(&Utc))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = WikiConfig::load(&cli.config)?;
    let store = Arc::new(
        SqliteStore::open(&cli.db)
            .with_context(|| format!("failed to open database {:?}", cli.db))?,
    );
    let pages = WikiPages::with_store(store.clone(), config);

    match cli.command {
        Commands::AddUser { name } => {
            let id = store.add_user(&name).await?;
            println!("{}", id);
        }

        Commands::Add {
            page,
            author,
            markup,
            file,
            minor,
            message,
            started_at,
        } => {
            let markup = match (markup, file) {
                (Some(markup), _) => markup,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {:?}", path))?,
                (None, None) => bail!("either --markup or --file is required"),
            };
            let mut edit = PageEdit::new(page.as_str(), markup, author).minor(minor);
            if let Some(message) = message {
                edit = edit.message(message);
            }
            if let Some(raw) = started_at {
                edit = edit.started_at(parse_started_at(&raw)?);
            }
            match pages.add(edit).await? {
                Some(revision) => print_json(&revision)?,
                None => bail!("'{}' was changed after the edit started", page),
            }
        }

        Commands::Show { page, revision } => match pages.page(&page, revision).await? {
            Some(revision) => print_json(&revision)?,
            None => bail!("page '{}' not found", page),
        },

        Commands::History { page } => print_json(&pages.history(&page).await?)?,

        Commands::Delete { page } => match pages.delete_page(&page).await? {
            Some(count) => println!("Deleted {} revisions of '{}'", count, page),
            None => bail!("'{}' was changed concurrently, nothing deleted", page),
        },

        Commands::DeleteRevision { page, revision } => {
            if !pages.delete_revision(&page, revision).await? {
                bail!("'{}' was changed concurrently, nothing deleted", page);
            }
            println!("Deleted revision {} of '{}'", revision, page);
        }

        Commands::Undelete { page } => {
            if !pages.undelete(&page).await? {
                bail!("'{}' was changed concurrently, nothing restored", page);
            }
            println!("Undeleted '{}'", page);
        }

        Commands::Move { from, to } => {
            if !pages.move_page(&from, &to).await? {
                bail!("'{}' was changed concurrently, not moved", from);
            }
            println!("Moved '{}' to '{}'", from, to);
        }

        Commands::MoveAll { from, to } => {
            if !pages.move_all(&from, &to).await? {
                bail!("'{}' was changed concurrently, not moved", from);
            }
            println!("Moved '{}' and its sub-pages to '{}'", from, to);
        }

        Commands::Orphans => print_json(&pages.orphans().await?)?,

        Commands::BrokenLinks => print_json(&pages.broken_links().await?)?,

        Commands::Referrers { page } => print_json(&pages.referrers(&page).await?)?,
    }

    Ok(())
}

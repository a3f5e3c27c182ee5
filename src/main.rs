use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

use veritas::api::{ArticleSource, GraphqlClient};
use veritas::article::{Article, Keyword};
use veritas::config::Config;
use veritas::feed::{FeedController, FeedSnapshot, Phase};
use veritas::keywords::KeywordsController;
use veritas::saved::{SavedArticles, SavedIdStore};
use veritas::storage::{Database, DatabaseError};
use veritas::util::{display_width, fit_width, single_line};

const DEFAULT_COLUMNS: usize = 100;

/// Get the config directory path (~/.config/veritas/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("veritas"))
}

fn ensure_private_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
            tracing::warn!(path = %dir.display(), error = %e, "Failed to set config directory permissions to 0700");
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "veritas", version, about = "News feed reader for the Veritas API")]
struct Args {
    /// Config file (default: ~/.config/veritas/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the most recent articles
    Recent {
        /// Number of pages to load
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        pages: u32,

        /// Only show articles matching this text
        #[arg(long, value_name = "TERM")]
        search: Option<String>,
    },
    /// List trending keywords
    Keywords,
    /// Manage saved articles
    Saved {
        #[command(subcommand)]
        action: SavedAction,
    },
}

#[derive(Subcommand, Debug)]
enum SavedAction {
    /// List saved article ids
    List,
    /// Save an article
    Add { id: String },
    /// Remove a saved article
    Remove { id: String },
    /// Save the article if it is not saved, otherwise remove it
    Toggle { id: String },
    /// Remove every saved article
    Clear,
    /// Fetch and print the saved articles
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::debug!(?config, "Effective configuration");

    match args.command {
        Command::Recent { pages, search } => {
            let source = connect(&config)?;
            run_recent(source, &config, pages, search, args.json).await
        }
        Command::Keywords => {
            let source = connect(&config)?;
            run_keywords(source, args.json).await
        }
        Command::Saved { action } => {
            ensure_private_dir(&config_dir)?;
            let db = open_database(&config_dir.join("saved.db")).await?;
            run_saved(db, action, &config, args.json).await
        }
    }
}

fn connect(config: &Config) -> Result<Arc<dyn ArticleSource>> {
    let mut client = GraphqlClient::new(&config.endpoint, config.request_timeout())
        .context("Failed to create API client")?;
    if let Some(token) = config.api_token() {
        client = client.with_api_token(token);
    }
    Ok(Arc::new(client))
}

async fn open_database(path: &Path) -> Result<Database> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: {}", DatabaseError::InstanceLocked);
            std::process::exit(1);
        }
        Err(e) => Err(e).context("Failed to open database"),
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn run_recent(
    source: Arc<dyn ArticleSource>,
    config: &Config,
    pages: u32,
    search: Option<String>,
    json: bool,
) -> Result<()> {
    let feed = FeedController::new(source, config.feed_options());
    let mut updates = feed.subscribe();

    feed.load_initial();
    let mut snapshot = wait_until_idle(&mut updates).await?;
    if snapshot.phase == Phase::Error {
        let err = snapshot
            .error
            .clone()
            .map_or_else(|| anyhow::anyhow!("Feed failed to load"), anyhow::Error::new);
        return Err(err);
    }

    for page in 1..pages {
        if !feed.load_more() {
            tracing::debug!(page, "No more pages");
            break;
        }
        snapshot = wait_until_idle(&mut updates).await?;
    }

    if let Some(term) = search {
        feed.set_search_term(term.clone());
        snapshot = updates
            .wait_for(|s| s.debounced_query == term)
            .await
            .context("Feed controller stopped")?
            .clone();
    }

    let visible = snapshot.visible_items();
    if json {
        println!("{}", serde_json::to_string_pretty(&visible)?);
    } else {
        print_articles(&visible);
        let more = if snapshot.has_more { ", more available" } else { "" };
        eprintln!("{} of {} articles{}", visible.len(), snapshot.items.len(), more);
    }

    feed.shutdown();
    Ok(())
}

async fn run_keywords(source: Arc<dyn ArticleSource>, json: bool) -> Result<()> {
    let keywords = KeywordsController::new(source);
    keywords.refresh().await.context("Failed to load keywords")?;
    let state = keywords.state();

    if json {
        println!("{}", serde_json::to_string_pretty(state.value.as_slice())?);
    } else {
        print_keywords(&state.value);
    }
    Ok(())
}

async fn run_saved(db: Database, action: SavedAction, config: &Config, json: bool) -> Result<()> {
    match action {
        SavedAction::List => {
            let ids = db.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ids)?);
            } else {
                ids.iter().for_each(|id| println!("{id}"));
            }
        }
        SavedAction::Add { id } => {
            db.add(&id).await?;
            println!("Saved {id}");
        }
        SavedAction::Remove { id } => {
            db.remove(&id).await?;
            println!("Removed {id}");
        }
        SavedAction::Toggle { id } => {
            let verb = if db.toggle(&id).await? { "Saved" } else { "Removed" };
            println!("{verb} {id}");
        }
        SavedAction::Clear => {
            db.clear().await?;
            println!("Cleared saved articles");
        }
        SavedAction::Show => {
            let saved = SavedArticles::new(Arc::new(db), connect(config)?);
            saved.reload().await.context("Failed to load saved articles")?;
            let state = saved.state();
            let articles: Vec<&Article> = state.value.iter().collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&articles)?);
            } else if articles.is_empty() {
                eprintln!("No saved articles");
            } else {
                print_articles(&articles);
            }
        }
    }
    Ok(())
}

async fn wait_until_idle(updates: &mut watch::Receiver<FeedSnapshot>) -> Result<FeedSnapshot> {
    let snapshot = updates
        .wait_for(|s| !s.is_busy())
        .await
        .context("Feed controller stopped")?;
    Ok(snapshot.clone())
}

// ============================================================================
// Output
// ============================================================================

fn terminal_columns() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.parse().ok())
        .filter(|&c| c > 0)
        .unwrap_or(DEFAULT_COLUMNS)
}

fn print_articles(articles: &[&Article]) {
    let columns = terminal_columns();
    for article in articles {
        let source = fit_width(&single_line(&article.source), 14).into_owned();
        let pad = 14usize.saturating_sub(display_width(&source));
        let prefix = format!(
            "{}  {}{}  ",
            article.published_at.format("%Y-%m-%d %H:%M"),
            source,
            " ".repeat(pad)
        );
        let title = single_line(&article.title);
        let room = columns.saturating_sub(display_width(&prefix));
        println!("{prefix}{}", fit_width(&title, room));
    }
}

fn print_keywords(keywords: &[Keyword]) {
    let columns = terminal_columns();
    for keyword in keywords {
        let line = format!(
            "{:>4}  {}",
            keyword.articles.len(),
            single_line(&keyword.keyword)
        );
        println!("{}", fit_width(&line, columns));
    }
}

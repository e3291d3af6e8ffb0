//! hoard - inspect and manage a clipboard history database
//!
//! Logs go to stderr; set RUST_LOG (e.g. RUST_LOG=hoard=debug) for detail.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use hoard::config::default_config_path;
use hoard::models::format_size;
use hoard::{
    ClipItem, ClipKind, ClipPayload, ClipboardHistory, HistoryApi, HistoryConfig, HistoryQuery,
    ListOrder, MemoryClipboard, Observation,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(author, version, about = "Clipboard history manager", long_about = None)]
struct Cli {
    /// History database (overrides the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Config file (defaults to <config dir>/hoard/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of a table
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List history, pinned items first
    List {
        #[command(flatten)]
        filter: FilterArgs,
        /// Order purely by last use, ignoring pins
        #[arg(long)]
        recency: bool,
    },
    /// Case-insensitive substring search
    Search {
        keyword: String,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Print one item's full content
    Show { id: i64 },
    Pin { id: i64 },
    Unpin { id: i64 },
    Delete { id: i64 },
    /// Delete unpinned history
    Clear {
        /// Also delete pinned items
        #[arg(long)]
        all: bool,
    },
    /// Storage statistics
    Info,
    /// Record content as if it had been copied
    Capture {
        /// Text to record
        text: Option<String>,
        /// Record a file list instead
        #[arg(long = "file", conflicts_with_all = ["text", "image"])]
        files: Vec<String>,
        /// Record an image file's bytes
        #[arg(long, conflicts_with = "text")]
        image: Option<PathBuf>,
    },
    /// Change the cap on unpinned items
    SetMax { max: usize },
}

#[derive(clap::Args, Debug)]
struct FilterArgs {
    /// Only items created in the last N days
    #[arg(long)]
    days: Option<u32>,
    #[arg(long, value_enum)]
    kind: Option<KindArg>,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long, default_value_t = 0)]
    offset: usize,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Text,
    Image,
    Files,
}

impl From<KindArg> for ClipKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Text => ClipKind::Text,
            KindArg::Image => ClipKind::Image,
            KindArg::Files => ClipKind::FileList,
        }
    }
}

impl FilterArgs {
    fn apply(&self, mut query: HistoryQuery) -> HistoryQuery {
        if let Some(days) = self.days {
            query = query.last_days(days, Utc::now());
        }
        if let Some(kind) = self.kind {
            query = query.kind(kind.into());
        }
        match self.limit {
            Some(limit) => query.page(limit, self.offset),
            None => HistoryQuery {
                offset: self.offset,
                ..query
            },
        }
    }
}

fn load_config(cli: &Cli) -> Result<HistoryConfig> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => default_config_path().ok(),
    };
    let mut config = match path {
        Some(path) => HistoryConfig::load(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => HistoryConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.database_path = Some(db.clone());
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_items(items: &[ClipItem], json: bool) -> Result<()> {
    if json {
        return print_json(&items);
    }
    if items.is_empty() {
        println!("(no items)");
        return Ok(());
    }
    for item in items {
        let marker = if item.pinned { "*" } else { " " };
        println!(
            "{:>6} {} {}  {}",
            item.id,
            marker,
            item.last_seen_at.format("%Y-%m-%d %H:%M"),
            item.preview
        );
    }
    Ok(())
}

fn print_item(item: &ClipItem, json: bool) -> Result<()> {
    if json {
        return print_json(item);
    }
    print_items(std::slice::from_ref(item), false)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let clipboard = Arc::new(MemoryClipboard::new());
    let history = ClipboardHistory::open(config, Arc::clone(&clipboard)).context("opening history")?;

    match &cli.command {
        Commands::List { filter, recency } => {
            let order = if *recency {
                ListOrder::RecencyOnly
            } else {
                ListOrder::PinnedFirst
            };
            let items = history.query(filter.apply(HistoryQuery::new().order(order))).await?;
            print_items(&items, cli.json)?;
        }
        Commands::Search { keyword, filter } => {
            let items = history.query(filter.apply(HistoryQuery::new().keyword(keyword.clone()))).await?;
            print_items(&items, cli.json)?;
        }
        Commands::Show { id } => {
            let item = history.get_item(*id)?;
            if cli.json {
                print_json(&item)?;
            } else {
                match &item.payload {
                    ClipPayload::Text(text) => println!("{}", text),
                    ClipPayload::FileList(paths) => paths.iter().for_each(|p| println!("{}", p)),
                    ClipPayload::Image(bytes) => println!("{} ({})", item.preview, format_size(bytes.len() as u64)),
                }
            }
        }
        Commands::Pin { id } => print_item(&history.pin(*id)?, cli.json)?,
        Commands::Unpin { id } => print_item(&history.unpin(*id)?, cli.json)?,
        Commands::Delete { id } => {
            history.delete(*id)?;
            println!("Deleted {}", id);
        }
        Commands::Clear { all } => {
            let deleted = history.clear(*all)?;
            println!("Deleted {} item(s)", deleted);
        }
        Commands::Info => {
            let info = history.storage_info()?;
            if cli.json {
                print_json(&info)?;
            } else {
                println!("Items:     {} ({} pinned, {} unpinned)", info.item_count, info.pinned_count, info.unpinned_count);
                println!("Cap:       {} unpinned", info.max_unpinned_items);
                println!("Content:   {}", format_size(info.total_bytes));
                println!("Database:  {}", format_size(info.database_bytes));
                for (kind, count) in &info.kind_counts {
                    println!("  {:<10} {}", kind.database_type(), count);
                }
            }
        }
        Commands::Capture { text, files, image } => {
            let payload = if let Some(path) = image {
                let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
                ClipPayload::Image(bytes)
            } else if !files.is_empty() {
                ClipPayload::FileList(files.clone())
            } else if let Some(text) = text {
                ClipPayload::Text(text.clone())
            } else {
                bail!("nothing to capture: pass text, --file or --image");
            };

            clipboard.set(payload);
            let mut monitor = history.monitor();
            match monitor.tick().await {
                Observation::Captured(outcome) => {
                    if cli.json {
                        print_json(&outcome)?;
                    } else {
                        println!("{:?} item {}", outcome.status, outcome.item.id);
                        if !outcome.evicted.is_empty() {
                            println!("Evicted {:?}", outcome.evicted);
                        }
                    }
                }
                Observation::Ignored => println!("Nothing to record (blank content)"),
                Observation::Rejected(e) => return Err(e.into()),
                other => bail!("capture did not complete: {:?}", other),
            }
        }
        Commands::SetMax { max } => {
            let evicted = history.set_max_unpinned_items(*max)?;
            println!("Cap set to {}; evicted {} item(s)", max, evicted.len());
        }
    }

    Ok(())
}

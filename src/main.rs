mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use circles::config::CirclesConfig;

#[derive(Parser)]
#[command(name = "circles", version, about = "Personalized semantic search over circles of notes")]
struct Cli {
    /// Owner to act as. Falls back to CIRCLES_OWNER, then to the local default owner.
    #[arg(long, global = true)]
    owner: Option<Uuid>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture a new item and show the circles it likely belongs to
    Add {
        content: String,
        /// Why this item matters
        #[arg(long)]
        meaning: Option<String>,
    },
    /// List the owner's items
    Items,
    /// Set or clear an item's meaning
    Meaning {
        item_id: i64,
        /// New meaning; omit to clear
        meaning: Option<String>,
    },
    /// Manage circles
    Circle {
        #[command(subcommand)]
        action: CircleAction,
    },
    /// Place an item in a circle
    Assign { item_id: i64, circle_id: i64 },
    /// Take an item out of a circle
    Unassign { item_id: i64, circle_id: i64 },
    /// Accept a predicted circle for an item
    Accept {
        item_id: i64,
        circle_id: i64,
        /// Confidence of the accepted prediction, in [0, 1]
        #[arg(long)]
        confidence: f32,
    },
    /// Delete an item
    Delete { item_id: i64 },
    /// Predict circles for an existing item
    Predict { item_id: i64 },
    /// Personalized search
    Search {
        query: String,
        /// Number of results (defaults to retrieval.default_top_k)
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
        /// Print a prompt context block instead of a result list
        #[arg(long)]
        context: bool,
        /// Token budget for --context
        #[arg(long)]
        max_tokens: Option<usize>,
    },
    /// Suggest items that fit a circle but are not in it yet
    Suggest {
        circle_id: i64,
        #[arg(long, short = 'k', default_value_t = 10)]
        top_k: usize,
    },
    /// Show store and index statistics
    Stats {
        /// Count across all owners
        #[arg(long)]
        all: bool,
    },
    /// Embed missing items and rebuild the vector index
    Reindex {
        /// Re-embed every item with the current provider and rebuild all centroids
        #[arg(long)]
        reembed: bool,
    },
}

#[derive(Subcommand)]
enum CircleAction {
    /// Create a circle
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List circles with member counts
    List,
    /// Delete a circle; its items are kept
    Delete { circle_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = CirclesConfig::load()?;

    // Log to stderr so stdout stays clean for --json output.
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let owner = cli::resolve_owner(cli.owner)?;
    let engine = cli::open_engine(config).await?;
    let out = cli::Output { json: cli.json };

    match cli.command {
        Command::Add { content, meaning } => {
            cli::items::add(&engine, out, owner, content, meaning).await?
        }
        Command::Items => cli::items::list(&engine, out, owner).await?,
        Command::Meaning { item_id, meaning } => {
            cli::items::set_meaning(&engine, owner, item_id, meaning).await?
        }
        Command::Circle { action } => match action {
            CircleAction::Create { name, description } => {
                cli::circle::create(&engine, out, owner, name, description).await?
            }
            CircleAction::List => cli::circle::list(&engine, out, owner).await?,
            CircleAction::Delete { circle_id } => {
                cli::circle::delete(&engine, owner, circle_id).await?
            }
        },
        Command::Assign { item_id, circle_id } => {
            cli::circle::assign(&engine, out, owner, item_id, circle_id).await?
        }
        Command::Unassign { item_id, circle_id } => {
            cli::circle::unassign(&engine, owner, item_id, circle_id).await?
        }
        Command::Accept {
            item_id,
            circle_id,
            confidence,
        } => cli::circle::accept(&engine, out, owner, item_id, circle_id, confidence).await?,
        Command::Delete { item_id } => cli::items::delete(&engine, owner, item_id).await?,
        Command::Predict { item_id } => cli::items::predict(&engine, out, owner, item_id).await?,
        Command::Search {
            query,
            top_k,
            context,
            max_tokens,
        } => {
            let top_k = top_k.unwrap_or(engine.config().retrieval.default_top_k);
            if context {
                cli::search::context(&engine, owner, query, top_k, max_tokens).await?
            } else {
                cli::search::search(&engine, out, owner, query, top_k).await?
            }
        }
        Command::Suggest { circle_id, top_k } => {
            cli::search::suggest(&engine, out, owner, circle_id, top_k).await?
        }
        Command::Stats { all } => {
            cli::stats::stats(&engine, out, (!all).then_some(owner)).await?
        }
        Command::Reindex { reembed } => cli::reindex::reindex(&engine, reembed).await?,
    }

    cli::close_engine(&engine).await
}

//! # catalog-rag CLI (`crag`)
//!
//! Manages the product catalog and its vector index, runs retrieval and
//! chat turns, and starts the JSON HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! crag --config ./config/crag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crag init` | Create the catalog and vector index schemas |
//! | `crag products add` | Insert a product and index it |
//! | `crag products list` | List catalog products |
//! | `crag products get <id>` | Show one product |
//! | `crag products update <id> --set <json>` | Change columns and re-index |
//! | `crag products delete --filter <json>` | Delete products and their index entries |
//! | `crag search "<query>"` | Retrieve matching ids and texts |
//! | `crag chat "<text>"` | One conversation turn grounded on retrieval |
//! | `crag index audit` | Compare catalog ids with indexed ids |
//! | `crag index rebuild` | Rebuild the index from the catalog |
//! | `crag serve` | Start the HTTP server |
//! | `crag completions <shell>` | Print a shell completion script |
//!
//! ## Examples
//!
//! ```bash
//! crag init
//! crag products add --name Ring --color gold --price 100 --description "18k"
//! crag products delete --filter '{"color": "gold"}'
//! crag search "anillos dorados"
//! crag chat "¿Qué anillos tenéis por menos de 150?" --thread demo
//! ```

mod audit;
mod catalog;
mod config;
mod conversation;
mod db;
mod embedding;
mod http;
mod index;
mod llm;
mod migrate;
mod orchestrator;
mod retriever;
mod server;
mod service;
mod sqlite_index;
mod synthesizer;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

use catalog_rag_core::filter::MetadataFilter;
use catalog_rag_core::models::ProductRecord;

use crate::service::{NewProduct, ProductService};

/// catalog-rag: retrieval-augmented chat over a SQLite product catalog.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/crag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "crag",
    about = "catalog-rag: retrieval-augmented chat over a SQLite product catalog",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/crag.toml")]
    config: PathBuf,

    /// Log at debug level. `RUST_LOG` still applies per module.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the catalog table and the vector index. Idempotent.
    Init,

    /// Manage catalog products. Every write is mirrored into the index.
    Products {
        #[command(subcommand)]
        action: ProductAction,
    },

    /// Retrieve the ids and texts of products matching a question.
    Search {
        query: String,
    },

    /// Run one conversation turn.
    ///
    /// Threads live in the process, so a thread id only carries history
    /// within one `crag serve`; from the CLI each call starts fresh.
    Chat {
        text: String,

        /// Conversation thread id. A new one is generated when omitted.
        #[arg(long)]
        thread: Option<String>,
    },

    /// Inspect or repair the vector index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Start the JSON HTTP server on `[server].bind`.
    Serve,

    /// Print a shell completion script to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ProductAction {
    /// Insert a product and index it.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        color: String,
        #[arg(long)]
        price: f64,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List all products.
    List,
    /// Show one product.
    Get { id: i64 },
    /// Change columns of one product, e.g. `--set '{"price": 120}'`.
    Update {
        id: i64,
        #[arg(long)]
        set: String,
    },
    /// Delete products matching a metadata filter, e.g. `--filter '{"color": "gold"}'`.
    Delete {
        #[arg(long)]
        filter: String,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Report catalog rows missing from the index and orphaned index items.
    Audit {
        /// Exit with an error when the index has drifted.
        #[arg(long)]
        strict: bool,
    },
    /// Replace the index with freshly rendered catalog rows.
    Rebuild,
}

/// Initialize logger based on verbose flag
fn init_logger(verbose: bool) {
    let mut log_builder = env_logger::Builder::from_default_env();
    if verbose {
        log_builder.filter_level(log::LevelFilter::Debug);
    } else {
        log_builder.filter_level(log::LevelFilter::Info);
    }
    log_builder.init();
}

fn print_product(p: &ProductRecord) {
    println!(
        "{:>5}  {:<24} {:<10} {:>10}  {}",
        p.id, p.name, p.color, p.price, p.description
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "crag", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Catalog and vector index initialized.");
        }
        Commands::Products { action } => {
            let service = ProductService::open(&cfg).await?;
            run_products(&service, action).await?;
        }
        Commands::Search { query } => {
            let service = ProductService::open(&cfg).await?;
            let retrieval = service.search(&query).await?;
            if retrieval.is_empty() {
                println!("No results.");
            }
            for (id, text) in retrieval.ids.iter().zip(&retrieval.texts) {
                println!("{:>5}  {}", id, text);
            }
        }
        Commands::Chat { text, thread } => {
            let service = ProductService::open(&cfg).await?;
            let thread = thread.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let reply = service.chat(&text, &thread).await?;
            println!("{}", reply);
            println!();
            println!("thread: {}", thread);
        }
        Commands::Index { action } => {
            let service = ProductService::open(&cfg).await?;
            match action {
                IndexAction::Audit { strict } => {
                    let report = service.audit().await?;
                    if report.is_consistent() {
                        println!("Index is consistent with the catalog.");
                    } else {
                        println!("missing from index: {:?}", report.missing_from_index);
                        println!("orphaned in index:  {:?}", report.orphaned_in_index);
                        println!("Run `crag index rebuild` to repair.");
                    }
                    if strict {
                        report.into_result()?;
                    }
                }
                IndexAction::Rebuild => {
                    let count = service.rebuild_index().await?;
                    println!("Rebuilt index with {} item(s).", count);
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn run_products(service: &ProductService, action: ProductAction) -> anyhow::Result<()> {
    match action {
        ProductAction::Add {
            name,
            color,
            price,
            description,
        } => {
            let record = service
                .create_product(&NewProduct {
                    name,
                    color,
                    price,
                    description,
                })
                .await?;
            println!("Added product {}.", record.id);
        }
        ProductAction::List => {
            let products = service.list_products().await?;
            if products.is_empty() {
                println!("No products.");
            }
            for p in &products {
                print_product(p);
            }
        }
        ProductAction::Get { id } => {
            let product = service.get_product(id).await?;
            println!("{}", serde_json::to_string_pretty(&product)?);
        }
        ProductAction::Update { id, set } => {
            let changes: catalog::Row =
                serde_json::from_str(&set).context("--set must be a JSON object")?;
            let record = service.update_product(id, &changes).await?;
            print_product(&record);
        }
        ProductAction::Delete { filter } => {
            let value: serde_json::Value =
                serde_json::from_str(&filter).context("--filter must be JSON")?;
            let filter = MetadataFilter::from_json(&value)?;
            let deleted = service.delete_products(&filter).await?;
            println!("Deleted {} product(s): {:?}", deleted.len(), deleted);
        }
    }
    Ok(())
}

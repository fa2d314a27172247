//! # po-intake CLI
//!
//! Pulls purchase orders out of a mailbox: order-related emails are picked
//! out, their PDF attachments and linked PDFs are downloaded, the documents
//! are turned into structured orders and stored in SQLite.
//!
//! ## Usage
//!
//! ```bash
//! po-intake --config ./config/po-intake.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `po-intake init` | Create the SQLite database and run schema migrations |
//! | `po-intake ingest --since --until` | Fetch order documents for one time window |
//! | `po-intake process <pdf>` | Extract and store one PDF |
//! | `po-intake poll` | Run the poll scheduler in the foreground |
//! | `po-intake orders list` | List stored orders |
//! | `po-intake orders get <id>` | Show one order with its line items |
//! | `po-intake orders delete <id>` | Delete an order |
//! | `po-intake stats` | Order counts and totals |
//! | `po-intake serve` | HTTP API plus background scheduler |
//!
//! Logging goes to stderr through `tracing`; set `RUST_LOG` to override the
//! default `po_intake=info` filter.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use po_intake::{config, ingest, migrate, orders, process, scheduler, server};
use po_intake_core::store::{OrderQuery, SortField, SortOrder};

/// po-intake: email-driven purchase order ingestion.
#[derive(Parser)]
#[command(
    name = "po-intake",
    about = "po-intake: email-driven purchase order ingestion",
    version,
    long_about = "po-intake polls a mailbox for order-related emails, downloads the PDF \
    purchase orders they carry or link to, extracts structured order data from each \
    document and reconciles it into a SQLite order store keyed on the purchase order id."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/po-intake.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Fetch order documents for one time window.
    ///
    /// Lists messages received in `[since, until)`, keeps the order-related
    /// ones and downloads their PDFs into the download directory.
    Ingest {
        /// Window start: `YYYY-MM-DD` or RFC 3339. Defaults to one poll
        /// interval before `--until`.
        #[arg(long)]
        since: Option<String>,

        /// Window end (exclusive): `YYYY-MM-DD` (whole day included) or
        /// RFC 3339. Defaults to now.
        #[arg(long)]
        until: Option<String>,

        /// Also extract and store every accepted document.
        #[arg(long)]
        process: bool,
    },

    /// Extract and store a single PDF.
    Process {
        /// Path to the PDF.
        path: PathBuf,
    },

    /// Run the poll scheduler in the foreground until Ctrl-C.
    Poll,

    /// Inspect stored orders.
    Orders {
        #[command(subcommand)]
        action: OrdersAction,
    },

    /// Show order counts and totals.
    Stats,

    /// Start the HTTP API (and the scheduler, if `autostart` is set).
    Serve,
}

#[derive(Subcommand)]
enum OrdersAction {
    /// List orders, most recent order date first by default.
    List {
        /// Substring match on PO id, buyer or supplier.
        #[arg(long)]
        search: Option<String>,

        /// Only orders with a line item whose model id contains this.
        #[arg(long)]
        model_id: Option<String>,

        /// Only orders with a line item whose color contains this.
        #[arg(long)]
        color: Option<String>,

        /// Only orders with a line item of exactly this size.
        #[arg(long)]
        size: Option<String>,

        /// order_date, total_amount or item_count.
        #[arg(long, default_value = "order_date")]
        sort_by: SortField,

        /// asc or desc.
        #[arg(long, default_value = "desc")]
        sort_order: SortOrder,

        #[arg(long, default_value = "50")]
        limit: i64,

        #[arg(long, default_value = "0")]
        offset: i64,
    },
    /// Show one order by id or purchase order id.
    Get { id: String },
    /// Delete one order and its line items.
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("po_intake=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            since,
            until,
            process,
        } => {
            ingest::run_ingest(&cfg, since, until, process).await?;
        }
        Commands::Process { path } => {
            process::run_process(&cfg, &path).await?;
        }
        Commands::Poll => {
            scheduler::run_poll(&cfg).await?;
        }
        Commands::Orders { action } => match action {
            OrdersAction::List {
                search,
                model_id,
                color,
                size,
                sort_by,
                sort_order,
                limit,
                offset,
            } => {
                orders::run_list(
                    &cfg,
                    OrderQuery {
                        search,
                        model_id,
                        color,
                        size,
                        sort_by,
                        sort_order,
                        limit,
                        offset,
                    },
                )
                .await?;
            }
            OrdersAction::Get { id } => {
                orders::run_get(&cfg, &id).await?;
            }
            OrdersAction::Delete { id } => {
                orders::run_delete(&cfg, &id).await?;
            }
        },
        Commands::Stats => {
            orders::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

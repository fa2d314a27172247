//! # po-intake
//!
//! Email-driven purchase order ingestion.
//!
//! A poll scheduler looks at a trailing time window of a mailbox, keeps the
//! emails that look order-related, downloads the PDF purchase orders they
//! carry or link to, turns each PDF into a structured order through a
//! document-extraction service and reconciles the result into SQLite, keyed
//! on the purchase order id.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │ Mailbox  │──▶│  Classify +  │──▶│  Extractor  │──▶│  SQLite  │
//! │Gmail/EML │   │ Fetch (PDF)  │   │  (Gemini)   │   │  upsert  │
//! └──────────┘   └──────────────┘   └─────────────┘   └────┬─────┘
//!                                                          │
//!                                 ┌────────────────────────┤
//!                                 ▼                        ▼
//!                           ┌──────────┐             ┌──────────┐
//!                           │   CLI    │             │   HTTP   │
//!                           └──────────┘             └──────────┘
//! ```
//!
//! Pure logic (MIME walk, link harvesting, classification, content sniffing,
//! line-item fan-out, the repository contract) lives in `po-intake-core`.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`repository`] | SQLite order repository |
//! | [`mailbox`] | Mailbox providers (Gmail, `.eml` directory) |
//! | [`fetch`] | Bounded, content-sniffed document fetching |
//! | [`ingest`] | Per-window ingestion pipeline |
//! | [`extractor`] | PDF → order extraction |
//! | [`process`] | Extract + upsert for one document |
//! | [`scheduler`] | Fixed-interval poll scheduler |
//! | [`orders`] | Order inspection commands |
//! | [`server`] | HTTP API |

pub mod config;
pub mod db;
pub mod extractor;
pub mod fetch;
pub mod ingest;
pub mod mailbox;
pub mod migrate;
pub mod orders;
pub mod process;
pub mod repository;
pub mod scheduler;
pub mod server;

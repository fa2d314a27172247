//! # po-intake core
//!
//! Storage-free, network-free logic of the purchase-order intake pipeline:
//! data models, MIME body extraction, link harvesting, order-email
//! classification, content sniffing, line-item fan-out and the order
//! repository contract with an in-memory implementation.
//!
//! This crate contains no tokio, sqlx or HTTP client dependencies; the
//! `po-intake` crate layers mailboxes, downloads, SQLite and scheduling on
//! top of it.

pub mod classify;
pub mod links;
pub mod mime;
pub mod models;
pub mod reconcile;
pub mod sniff;
pub mod store;

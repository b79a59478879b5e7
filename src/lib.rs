//! # sokman
//!
//! Systematic literature mapping manager for SoK papers
//!
//! ## Modules
//!
//! - [`db`] - SQLite store for publications, authors, tags and their relations
//! - [`dblp`] - DBLP search and record API client
//! - [`dump`] - Streaming reader for the local DBLP XML dump
//! - [`semanticscholar`] - Semantic Scholar paper API client
//! - [`commands`] - Operator commands (search, import, snowball, repair, ...)
//! - [`graph`] - DOT export of citation and tag graphs
//! - [`interchange`] - JSON dataset dump and load
//! - [`server`] - JSON admin API
//! - [`choices`] - Remembered rejections of search and snowball results
//! - [`prompt`] - Interactive yes/no prompting
//! - [`config`] - `sokman.toml` and environment configuration
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sokman::{commands, db::Database, dblp::DblpClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let db = Database::open(std::path::Path::new("db.sqlite3"))?;
//!     let dblp = DblpClient::new()?;
//!     let keys = vec!["DBLP:conf/ccs/EgeleBFK13".to_string()];
//!     let source = commands::import::RecordSource::Api(&dblp);
//!     commands::import::run(&db, source, &keys, None, &mut std::io::stdout()).await?;
//!     Ok(())
//! }
//! ```

pub mod choices;
pub mod commands;
pub mod config;
pub mod db;
pub mod dblp;
pub mod dump;
pub mod error;
pub mod graph;
pub mod interchange;
pub mod models;
pub mod prompt;
pub mod semanticscholar;
pub mod server;

pub use error::{Result, SokError};

//! Staged-edit engine for browsing and editing MySQL and PostgreSQL tables.

pub mod cli;
pub mod config;
pub mod count;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod filter;
pub mod ledger;
pub mod models;
pub mod pagination;
pub mod planner;
pub mod runner;
pub mod schema_diff;
pub mod sql;
pub mod structure;
pub mod transaction;
pub mod utils;
pub mod view;

pub use error::{Error, Result};

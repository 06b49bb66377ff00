//! Pricewatch - price-drop alerts for Walmart and Target
//!
//! This crate provides the core functionality for the `pricewatch` CLI tool.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`model`] - Data types (User, Product, Observation, AlertState, Money)
//! - [`storage`] - SQLite database layer
//! - [`probe`] - Retailer page probes with retry and timeout
//! - [`gate`] - Per-retailer concurrency limits
//! - [`locations`] - Expands users into shipping and pickup check sites
//! - [`alerts`] - Deduplicating alert decisions
//! - [`checker`] - Check runs and the interval scheduler
//! - [`notify`] - Alert delivery (Discord, log)
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod alerts;
pub mod checker;
pub mod cli;
pub mod config;
pub mod error;
pub mod gate;
pub mod locations;
pub mod model;
pub mod notify;
pub mod probe;
pub mod storage;
pub mod validate;

pub use error::{Error, Result};

//! # Claude Usage
//!
//! Token usage and cost aggregation over Claude CLI session logs.
//!
//! ## Overview
//!
//! The library reads a projects root (one subdirectory per project, each holding
//! `.jsonl` record files), prices every record and folds the results into:
//! - Daily and monthly totals
//! - Per-model totals
//! - Per-project summaries
//! - A flat per-record list used for hour and date filtering
//!
//! A full pass can also be delegated to the `usage-processor` executable; the
//! [`hybrid::Coordinator`] falls back to the in-process pipeline whenever that
//! path fails, and caches results with a TTL and an optional content
//! fingerprint.
//!
//! ## Features
//!
//! - `colors` (default): Enables terminal color output via owo-colors

/// Aggregation engine: folds, hour filters, hourly profile
pub mod aggregate;

/// Report and view cache with TTL and fingerprint invalidation
pub mod cache;

/// Command-line argument parsing
pub mod cli;

/// Settings from environment and flags
pub mod config;

/// Text and JSON rendering
pub mod display;

/// Error taxonomy and the error envelope
pub mod error;

/// Content fingerprint over record files
pub mod fingerprint;

/// External-or-in-process execution
pub mod hybrid;

/// Directory walking and tolerant record parsing
pub mod ingest;

/// tracing subscriber setup
pub mod logging;

/// Records, metrics and the aggregate contract
pub mod models;

/// Model pricing catalogue and cost computation
pub mod pricing;

/// View selection and filters
pub mod query;

/// Paths, env parsing and number formatting
pub mod utils;

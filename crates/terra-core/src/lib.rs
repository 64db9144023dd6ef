//! # terra-core
//!
//! File-transfer ledger for the neurobooth data flow.
//!
//! Session recordings are produced on a primary volume, mirrored to durable
//! storage tiers, and eventually removed from the primary volume once their
//! survival elsewhere is confirmed. Every step is recorded in a ledger table
//! so that re-running any step is safe:
//!
//! - [`dataflow::write_files`] records files that already exist at their
//!   primary location
//! - [`dataflow::copy_files`] mirrors a directory, records pending copies and
//!   verifies them by content digest (or size and modification time for
//!   large write-once recordings)
//! - [`dataflow::delete_files`] frees space on a near-capacity volume, only
//!   for files with a verified copy on a durable destination
//!
//! ## Layout
//!
//! - [`store`]: generic table wrapper (introspection, queries, upserts)
//! - [`ledger`]: the typed ledger and manifest schemas
//! - [`manifest`]: the sensor-file manifest consumed by the dataflow
//! - [`dataflow`]: discovery, copy, verification and deletion
//! - [`config`]: TOML configuration for the `terra` binary

pub mod config;
pub mod dataflow;
pub mod ledger;
pub mod manifest;
pub mod store;

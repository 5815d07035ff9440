//! aerodb-exchange - Intermediate-result exchange between cluster nodes
//!
//! A query stage streams rows through a `Broadcaster` into result files on
//! one or more nodes. Any node may pull a named result into its own
//! namespace with a `Fetcher`, and a `ResultReader` decodes the files back
//! into rows. Result files live in per-transaction namespace directories
//! that are removed when the owning transaction ends.

pub mod broadcast;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod connection;
pub mod encoding;
pub mod errors;
pub mod fetch;
pub mod namespace;
pub mod observability;
pub mod reader;
pub mod redistribute;
pub mod result_file;
pub mod server;

pub use broadcast::{BroadcastOutcome, Broadcaster, DestinationSet, TransferProgress};
pub use config::ExchangeConfig;
pub use errors::{ExchangeError, ExchangeResult};
pub use fetch::{fetch_results, BatchFetchReport, FetchOutcome, Fetcher};
pub use namespace::TransactionContext;
pub use reader::{ReadOutcome, ResultReader};
pub use result_file::ResultId;
pub use server::ResultServer;

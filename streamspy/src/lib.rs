//! # streamspy
//!
//! Buffered stream observation and polling expectations for integration
//! tests.
//!
//! streamspy lets a test declare expectations against asynchronously
//! arriving events, then waits, with bounded retries, until those
//! expectations are satisfied or a timeout elapses. A background
//! consumer feeds every received message into a bounded per-topic
//! buffer; queries search the buffer retrospectively, so a message that
//! arrived before the test asked for it is still found.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde::Deserialize;
//! use streamspy::{ChannelSource, Client, ConsumerConfig};
//!
//! #[derive(Debug, Deserialize)]
//! struct OrderCreated {
//!     order_id: String,
//!     status: String,
//! }
//!
//! # async fn example() -> streamspy::Result<()> {
//! let (source, _handle) = ChannelSource::new(64);
//! let mut client = Client::connect(
//!     ConsumerConfig::new(["broker-1:9092"], ["orders"]),
//!     source,
//! )
//! .await?;
//!
//! let result = client
//!     .query::<OrderCreated>("orders")
//!     .filter("type", "ORDER_CREATED")
//!     .filter("order_id", "o-42")
//!     .unique()
//!     .await?;
//! assert!(result.found);
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Owns the buffer and consumer; entry point for queries |
//! | [`Query`] | Per-invocation fluent builder of filters and expectations |
//! | [`MessageBuffer`] | Bounded, per-topic, concurrency-safe event store |
//! | [`StreamConsumer`] | Background task feeding the buffer from a broker |
//! | [`BrokerSource`] | Contract a broker client must satisfy |
//! | [`FilterSet`] | Path-addressed constraints selecting matching events |
//! | [`CheckResult`] | Outcome of one predicate: success, retryability, reason |
//! | [`PollingSummary`] | Record of one polling run (attempts, elapsed, outcome) |
//!
//! ## Polling Model
//!
//! The [`poll`] engine runs a fetch operation repeatedly, evaluating
//! checks in declaration order against each result. Retryable failures
//! (nothing found yet, transient transport errors, a count shortfall)
//! sleep and retry with exponential backoff and jitter; fatal failures
//! (shape mismatches, uniqueness violations, misconfigured topics) stop
//! immediately no matter how much budget remains. The engine runs on the
//! calling task; nothing is spawned per query.
//!
//! ## Between Tests
//!
//! Buffers live for the whole test process. Call
//! [`Client::clear_all`] (or [`Client::clear_topic`]) between test cases
//! to avoid cross-test leakage; topic registration and capacity are
//! kept.

mod buffer;
mod check;
mod client;
mod config;
mod consumer;
mod error;
mod event;
mod filter;
pub mod finder;
pub mod poll;
mod query;
mod report;
mod source;

pub use buffer::{MessageBuffer, TopicBuffer};
pub use check::{Check, CheckResult};
pub use client::Client;
pub use config::{Backoff, ConsumerConfig, PollConfig};
pub use consumer::{ConsumerState, StreamConsumer};
pub use error::Error;
pub use event::StreamEvent;
pub use filter::FilterSet;
pub use finder::FindResult;
pub use poll::{ExecutionMode, PollingSummary};
pub use query::{Query, QueryResult, SearchHit};
pub use report::{RecordingSink, ReportSink, TracingSink};
pub use source::{BrokerSource, ChannelSource, SourceHandle, SourceMessage};

/// Convenience alias for `Result<T, streamspy::Error>`.
pub type Result<T = ()> = std::result::Result<T, Error>;

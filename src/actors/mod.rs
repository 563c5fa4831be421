//! Actor-based monitoring pipeline.
//!
//! Each actor runs as an independent async task communicating via Tokio
//! channels: `mpsc` command channels (with `oneshot` replies) for
//! request/response, `broadcast` channels for fan-out events.
//!
//! ## Architecture overview
//!
//! ```text
//!                     Supervisor
//!                         |
//!          +--------------+--------------+
//!          |              |              |
//!      Scraper-1      Scraper-2  ...  Scraper-N
//!          |              |              |
//!          +--------------+--------------+
//!                         |
//!                 broadcast<SampleEvent>
//!                         |
//!              +----------+----------+
//!              |                     |
//!        StorageActor           AlertActor
//! ```
//!
//! ## Actor types
//!
//! - **ScraperActor**: polls one Target's Actuator endpoints on an interval
//! - **SupervisorActor**: owns the Scraper set, diffs it on config reload
//! - **AlertActor**: evaluates rules, manages cooldown/dedup, dispatches
//! - **StorageActor**: owns the storage backend, batches writes, runs retention

pub mod alert;
pub mod dropqueue;
pub mod messages;
pub mod scraper;
pub mod storage;
pub mod supervisor;

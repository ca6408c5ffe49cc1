//! Client side of tabsync.
//!
//! This crate provides the conditional-request sync client and the
//! visibility-aware poll scheduler used by the CLI.

pub mod poll;
pub mod sync;

pub use poll::{ManualVisibility, PollPhase, PollScheduler, Refresh, VisibilitySignal};

pub use sync::{
    FetchOutcome, Fetched, HttpTransport, MetricsSnapshot, OriginResponse, SyncClient, TabRequest, Transport,
    TransportConfig, TransportError,
};

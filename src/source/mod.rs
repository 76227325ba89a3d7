//! Events API access: the HTTP client and the paging poller built on it

pub mod client;
pub mod poller;

pub use client::{EventSource, HttpEventSource, DEFAULT_EVENTS_ENDPOINT};
pub use poller::{Fetched, PollerConfig, SourcePoller};

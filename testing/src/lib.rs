//! # Taskflow Analytics Testing
//!
//! In-memory stand-ins for the external systems the analytics service talks to.
//!
//! This crate provides:
//! - [`InMemoryRecordStore`]: fixed counts per owner, with call counting, failure
//!   injection and artificial latency
//! - [`InMemoryTransport`]: a scripted message transport; publish payloads, fail dials,
//!   drop sessions and inspect acknowledgements
//!
//! ## Example
//!
//! ```ignore
//! use taskflow_analytics_testing::{InMemoryRecordStore, InMemoryTransport};
//!
//! #[tokio::test(start_paused = true)]
//! async fn reconnects_after_outage() {
//!     let transport = InMemoryTransport::new();
//!     transport.fail_next_dials(3);
//!
//!     let connector = TransportConnector::new(Arc::new(transport.clone()), cache, shutdown);
//!     let handle = connector.spawn();
//!
//!     transport.wait_until_sessions_opened(1).await;
//!     assert_eq!(transport.dial_instants().len(), 4);
//! }
//! ```

/// In-memory record store
pub mod record_store;

/// Scripted in-memory transport
pub mod transport;

pub use record_store::InMemoryRecordStore;
pub use transport::InMemoryTransport;

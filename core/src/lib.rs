//! # Taskflow Analytics Core
//!
//! Core types for the Taskflow analytics read side.
//!
//! The service answers "how many completed / pending todos does user X have" and keeps
//! an in-memory cache of those answers fresh by consuming change events published by the
//! todo service whenever a todo is created, updated, completed or deleted.
//!
//! ## Building Blocks
//!
//! - [`event`]: tolerant decoding of raw change-event payloads into [`ChangeEvent`]
//! - [`cache`]: the concurrent owner → [`Aggregate`] cache with race-free invalidation
//! - [`resolver`]: cache-aside lookup that recomputes aggregates through a [`RecordStore`]
//! - [`record_store`]: the narrow `count_by_owner` capability of the backing store
//! - [`transport`]: the capability set a message transport must expose (connect, receive,
//!   acknowledge, close)
//!
//! ## Data Flow
//!
//! ```text
//! ┌────────────┐  bytes   ┌─────────┐ owner ┌───────────────┐
//! │ Transport  │ ───────▶ │ decode  │ ────▶ │ cache         │
//! │ (session)  │          └─────────┘       │  .invalidate  │
//! └────────────┘                            └───────▲───────┘
//!                                                   │ get / fill
//!                          HTTP ───────▶ resolver ──┘──▶ RecordStore
//! ```
//!
//! Nothing in this crate performs network I/O on its own; concrete transports and stores
//! live in `taskflow-analytics-redpanda` and `taskflow-analytics-postgres`, and the
//! supervising background tasks live in `taskflow-analytics-runtime`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod event;
pub mod record_store;
pub mod resolver;
pub mod transport;

pub use cache::{Aggregate, AnalyticsCache, FillTicket};
pub use event::{ChangeEvent, DecodeError, EventKind, decode};
pub use record_store::{RecordStore, StoreError};
pub use resolver::{AggregateResolver, CacheStatus};
pub use transport::{ConsumerSession, Delivery, DeliveryTag, Transport, TransportError};

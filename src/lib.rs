//! Keeps a local view in sync with a fleet of sandboxes.
//!
//! One event stream is held open per running sandbox; incoming events are
//! routed to cache invalidations. Sessions are arranged into parent/child
//! trees, pending permissions and questions are aggregated fleet-wide, and
//! new sandboxes are driven through startup with bounded polling.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod fleet;
pub mod hierarchy;
pub mod http_server;
pub mod interaction;
pub mod model;
pub mod progress;
pub mod router;
pub mod sse;
pub mod startup;
pub mod state;
pub mod stream;
pub mod subscription;

pub use cache::{CacheKey, Invalidator, StaleTracker};
pub use error::{Error, Result};
pub use model::Source;
pub use subscription::SubscriptionManager;

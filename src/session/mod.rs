//! Protocol-independent session machinery
//!
//! - [`state`] - pure connection state machine
//! - [`journal`] - append-only event log with push and snapshot readers
//! - [`subscription`] - topic subscription bookkeeping
//! - `connection` - the core every binding wraps

pub(crate) mod connection;
pub mod journal;
pub mod state;
pub mod subscription;

pub use journal::{Event, EventKind, Journal};
pub use state::{can_send, next_state, CloseOutcome, ConnectionState, Signal};
pub use subscription::{QosLevel, Subscription, SubscriptionRegistry};

//! Job registry and the event stream of its committed mutations.

pub mod events;
pub mod store;

pub use events::{JobEvent, JobEventBroadcaster, JobEventKind};
pub use store::{JobCounts, JobRegistry};

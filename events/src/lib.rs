//! In-process publish/subscribe for kernel lifecycle events.
//!
//! Publishing fans the event out to every subscriber over an independent
//! unbounded channel, so one slow consumer never blocks the publisher or
//! its peers. The subscriber list is copy-on-write: `publish` iterates a
//! snapshot without holding any lock.

mod bus;
mod collector;

pub use bus::{EventBus, EventStream};
pub use collector::EventCollector;

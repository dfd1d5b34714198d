//! Capability-aware model routing.
//!
//! The router maps a task type to an ordered list of provider candidates,
//! tracks provider availability behind a probe cache, enforces an
//! outbound timeout with one structural retry for transient failures, and
//! accumulates per-provider cost and token tallies.

pub mod providers;
pub mod router;

pub use providers::{AnthropicMessagesClient, EndpointConfig, OpenAiChatClient, StaticProvider};
pub use router::{ModelRouter, ModelStats, RouterResponse};

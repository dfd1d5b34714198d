//! Orchestration for the conductor kernel.
//!
//! The workflow engine runs named linear step graphs through the agent
//! registry; the smart router classifies free-form input and picks the
//! best registered agent, falling back to a direct model-router call.

pub mod smart_router;
pub mod workflow;

pub use smart_router::SmartRouter;
pub use workflow::WorkflowEngine;

//! The download orchestrator.
//!
//! A controller multiplexes a fixed pool of worker agents over a dynamic job
//! queue. Coordination is message passing only: each agent owns a
//! bidirectional line channel to the controller, and the job graph is
//! mutated exclusively on the controller side in response to agent messages.

pub mod blacklist;
pub mod controller;
pub mod extract;
pub mod paths;
pub mod queue;
pub mod sink;
pub mod validate;
pub mod worker;

pub use blacklist::Blacklist;
pub use controller::Controller;
pub use queue::JobQueue;

//! Scheduler runner -- owns the queue, the layer registry and the loops.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructor, executor registration, submission and status
//! - `dispatch`: the dispatch loop moving queued tasks into layer pools
//! - `lifecycle`: start/stop, pool draining and the status ticker

mod core;
mod dispatch;
mod lifecycle;
#[cfg(test)]
mod tests;

pub use self::core::Scheduler;

//! In-process progress event bus.
//!
//! Fan-out of [`sreel_models::JobEvent`]s keyed by job id. Each job's
//! channel keeps the latest envelope so late-joining subscribers never
//! see a blank stream, and a strictly monotonic per-job sequence.
//! Publishers never block on subscriber throughput: a subscriber that
//! falls behind the ring buffer is dropped with a lag signal.

pub mod bus;

pub use bus::{Delivery, EventBus, Subscription};

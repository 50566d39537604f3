//! Sliding-window statistics used by latency control.

pub mod mov_histogram;
pub mod mov_stats;
pub mod ring_queue;

pub use mov_histogram::MovHistogram;
pub use mov_stats::MovStats;
pub use ring_queue::RingQueue;

//! Metrics reported by peers.
//!
//! Plain zero-default structs, filled by the pipelines and handed to the
//! caller through sink callbacks so no allocation crosses the API.

use crate::core::time::Nanos;

/// Aggregate metrics of one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotMetrics {
    /// Remote participants currently connected.
    pub connection_count: usize,
}

/// Metrics of one connection (remote participant).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionMetrics {
    /// Source id (ssrc) of the participant.
    pub source_id: u32,
    /// End-to-end latency from capture to mix; 0 when no control endpoint
    /// supplies capture timestamps.
    pub e2e_latency: Nanos,
    /// Media buffered in the incoming queue.
    pub niq_latency: Nanos,
    /// Short-term variation of the incoming queue length.
    pub jitter: Nanos,
    /// Packets that should have arrived according to seqnums.
    pub expected_packets: u64,
    /// Packets that never made it to playback.
    pub lost_packets: u64,
    /// Packets that arrived after their playback position.
    pub late_packets: u64,
    /// Packets reconstructed by FEC.
    pub recovered_packets: u64,
}

//! Packet loss concealment hook.
//!
//! Unrepairable losses reach the depacketizer as gaps; a user-registered
//! plugin may fill them with synthesized audio instead of silence.

/// Loss concealment strategy consulted for every gap.
pub trait PlcPlugin: Send {
    /// Fill `out` for a lost region. `history` holds the most recently
    /// decoded interleaved samples, oldest first; it may be empty.
    fn fill_gap(&mut self, out: &mut [f32], history: &[f32]);
}

/// Default concealment: silence.
#[derive(Default)]
pub struct ZeroPlc;

impl PlcPlugin for ZeroPlc {
    fn fill_gap(&mut self, out: &mut [f32], _history: &[f32]) {
        out.iter_mut().for_each(|s| *s = 0.0);
    }
}
